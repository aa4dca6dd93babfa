//! Training coordinator.
//!
//! Walks a checkout, embeds snippets in batches, and publishes a fresh
//! index for one repository:
//!
//! ```text
//! spawn_blocking(walk) ──mpsc<Vec<Snippet>>──▶ embed ─▶ add_snippets ─▶ build_index(replace)
//! ```
//!
//! | Table state | Call | Result |
//! |-------------|------|--------|
//! | untrained | any | trains, `Ok(true)` |
//! | indexed | `pretrained_ok` | no-op, `Ok(false)` |
//! | indexed | `retrain` | full rebuild, `Ok(true)` |
//! | indexed | neither | `AlreadyTrained` |
//! | run in flight | any | `TrainingInProgress` |
//!
//! A failed run discards its staged rows, so the published index is left
//! exactly as it was.

use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;

use snippet_search_core::embedding::EmbeddingProvider;
use snippet_search_core::error::{EngineError, EngineResult};
use snippet_search_core::models::{RepoKey, Snippet};
use snippet_search_core::store::SnippetTable;

use crate::config::Config;
use crate::extract::Extractor;
use crate::registry::{Engine, EngineRegistry, TrainOutcome};

/// Batches buffered between the walker and the ingest loop.
const CHANNEL_DEPTH: usize = 4;

pub struct TrainingCoordinator {
    registry: Arc<EngineRegistry>,
    embedder: Arc<dyn EmbeddingProvider>,
    extractor: Extractor,
    repo_root: PathBuf,
    batch_size: usize,
    warmup_concurrency: usize,
}

impl TrainingCoordinator {
    pub fn new(
        config: &Config,
        registry: Arc<EngineRegistry>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            registry,
            embedder,
            extractor: Extractor::from_config(&config.training)?,
            repo_root: config.storage.repo_root.clone(),
            batch_size: config.training.batch_size.max(1),
            warmup_concurrency: config.training.warmup_concurrency.max(1),
        })
    }

    pub fn registry(&self) -> &Arc<EngineRegistry> {
        &self.registry
    }

    pub fn repo_path(&self, key: &RepoKey) -> PathBuf {
        self.repo_root.join(&key.owner).join(&key.repo)
    }

    /// Fail with `NotFound` unless the checkout for `key` exists.
    pub fn require_checkout(&self, key: &RepoKey) -> EngineResult<PathBuf> {
        key.validate()?;
        let path = self.repo_path(key);
        if !path.is_dir() {
            return Err(EngineError::NotFound(format!(
                "local checkout of {} (download it first with POST /download {{\"user\": \"{}\"}})",
                key, key.owner
            )));
        }
        Ok(path)
    }

    /// Train `key` from its checkout under the repository root.
    ///
    /// Returns `true` iff a training run executed.
    pub async fn train(
        &self,
        key: &RepoKey,
        retrain: bool,
        pretrained_ok: bool,
    ) -> EngineResult<bool> {
        let path = self.require_checkout(key)?;
        self.train_from(key, &path, self.extractor.clone(), retrain, pretrained_ok)
            .await
    }

    /// Train `key` from an explicit directory with an explicit extraction
    /// policy.
    pub async fn train_from(
        &self,
        key: &RepoKey,
        repo_path: &Path,
        extractor: Extractor,
        retrain: bool,
        pretrained_ok: bool,
    ) -> EngineResult<bool> {
        key.validate()?;
        if !repo_path.is_dir() {
            return Err(EngineError::NotFound(format!(
                "repository directory {}",
                repo_path.display()
            )));
        }

        let engine = self.registry.get_or_create(key).await?;
        let _guard = engine
            .try_begin_training()
            .ok_or_else(|| EngineError::TrainingInProgress(key.clone()))?;

        if engine.is_trained().await? {
            if pretrained_ok {
                tracing::debug!(index = %key, "already trained, skipping");
                engine.record(TrainOutcome::Skipped { at: Utc::now() });
                return Ok(false);
            }
            if !retrain {
                return Err(EngineError::AlreadyTrained(key.clone()));
            }
        }

        tracing::info!(index = %key, path = %repo_path.display(), retrain, "training started");
        match self.ingest(&engine, repo_path, extractor).await {
            Ok(rows) => {
                engine.record(TrainOutcome::Trained {
                    rows,
                    at: Utc::now(),
                });
                tracing::info!(index = %key, rows, "training complete");
                self.persist_manifest().await;
                Ok(true)
            }
            Err(e) => {
                if let Err(discard) = engine.table().discard_staged().await {
                    tracing::error!(index = %key, error = %discard, "failed to discard staged rows");
                }
                engine.record(TrainOutcome::Failed {
                    message: e.to_string(),
                    at: Utc::now(),
                });
                tracing::error!(index = %key, error = %e, "training failed");
                self.persist_manifest().await;
                Err(e)
            }
        }
    }

    async fn persist_manifest(&self) {
        if let Err(e) = self.registry.persist().await {
            tracing::warn!(error = %e, "failed to persist manifest");
        }
    }

    async fn ingest(
        &self,
        engine: &Engine,
        repo_path: &Path,
        extractor: Extractor,
    ) -> EngineResult<usize> {
        let table = engine.table();
        table.begin_generation().await?;

        let (tx, mut rx) = mpsc::channel::<Vec<Snippet>>(CHANNEL_DEPTH);
        let root = repo_path.to_path_buf();
        let batch_size = self.batch_size;
        let walker = tokio::task::spawn_blocking(move || -> EngineResult<usize> {
            let mut batch = Vec::with_capacity(batch_size);
            let mut seen = 0;
            for snippet in extractor.into_snippets(root)? {
                batch.push(snippet);
                seen += 1;
                if batch.len() >= batch_size {
                    let full = std::mem::replace(&mut batch, Vec::with_capacity(batch_size));
                    if tx.blocking_send(full).is_err() {
                        // ingest loop gave up
                        return Ok(seen);
                    }
                }
            }
            if !batch.is_empty() {
                let _ = tx.blocking_send(batch);
            }
            Ok(seen)
        });

        let mut reused = 0;
        while let Some(batch) = rx.recv().await {
            let (vectors, hits) = self.vectors_for(table.as_ref(), &batch).await?;
            reused += hits;
            table.add_snippets(&batch, &vectors).await?;
        }

        let seen = walker
            .await
            .map_err(|e| EngineError::Store(anyhow::anyhow!("extraction task failed: {}", e)))??;
        tracing::debug!(index = %engine.key(), snippets = seen, reused, "walk finished");

        table.build_index(true).await?;
        Ok(table.row_count().await?)
    }

    /// Embed the snippets whose text is not already indexed. Returns the
    /// full vector list and how many came from the cache.
    async fn vectors_for(
        &self,
        table: &dyn SnippetTable,
        batch: &[Snippet],
    ) -> EngineResult<(Vec<Vec<f32>>, usize)> {
        let cached = table.cached_vectors(batch).await?;
        let misses: Vec<String> = batch
            .iter()
            .zip(&cached)
            .filter(|(_, c)| c.is_none())
            .map(|(s, _)| s.text.clone())
            .collect();
        let hits = batch.len() - misses.len();

        let mut fresh = if misses.is_empty() {
            Vec::new()
        } else {
            self.embedder.embed(&misses).await?
        }
        .into_iter();

        let mut vectors = Vec::with_capacity(batch.len());
        for entry in cached {
            match entry.or_else(|| fresh.next()) {
                Some(v) => vectors.push(v),
                None => {
                    return Err(EngineError::Store(anyhow::anyhow!(
                        "embedder returned fewer vectors than requested"
                    )))
                }
            }
        }
        Ok((vectors, hits))
    }

    /// Warm-load `keys` with `pretrained_ok`, bounded by
    /// `training.warmup_concurrency`. Failures are logged and skipped.
    ///
    /// Returns how many repositories were actually trained.
    pub async fn warm_up(self: &Arc<Self>, keys: Vec<RepoKey>) -> usize {
        let semaphore = Arc::new(Semaphore::new(self.warmup_concurrency));
        let mut set = JoinSet::new();

        for key in keys {
            let coordinator = Arc::clone(self);
            let semaphore = semaphore.clone();
            set.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok()?;
                match coordinator.train(&key, false, true).await {
                    Ok(trained) => Some(trained),
                    Err(e) => {
                        tracing::warn!(index = %key, error = %e, "warm-up failed");
                        None
                    }
                }
            });
        }

        let mut trained = 0;
        while let Some(res) = set.join_next().await {
            if let Ok(Some(true)) = res {
                trained += 1;
            }
        }
        trained
    }

    /// Start a retraining run in the background. Returns once the run has
    /// been validated and claimed, so conflicts surface to the caller.
    pub async fn spawn_retrain(self: &Arc<Self>, key: RepoKey) -> EngineResult<()> {
        self.require_checkout(&key)?;
        let engine = self.registry.get_or_create(&key).await?;
        if engine.is_training() {
            return Err(EngineError::TrainingInProgress(key));
        }

        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = coordinator.train(&key, true, false).await {
                tracing::warn!(index = %key, error = %e, "background training did not complete");
            }
        });
        Ok(())
    }
}
