//! Engine registry: one live [`Engine`] per `(owner, repo)`.
//!
//! The registry is an explicit service object shared through `Arc` by the
//! HTTP server, the training coordinator, and the CLI. Get-or-create is
//! serialized by a `tokio::sync::Mutex`, so concurrent first requests for
//! the same key receive the same handle.
//!
//! Every key ever registered is persisted to a JSON manifest
//! (`[{"user": ..., "repo": ...}]`) so the service can warm-load its
//! indexes on the next start. Engines are only registered once a checkout
//! exists, so a key whose training failed stays listed and is retried by
//! the next warm-up.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use snippet_search_core::error::EngineResult;
use snippet_search_core::models::RepoKey;
use snippet_search_core::store::{SnippetTable, TableStore};

/// Result of the most recent training attempt on an engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TrainOutcome {
    Trained { rows: usize, at: DateTime<Utc> },
    Skipped { at: DateTime<Utc> },
    Failed { message: String, at: DateTime<Utc> },
}

/// A repository's search engine: its table plus training bookkeeping.
pub struct Engine {
    key: RepoKey,
    table: Arc<dyn SnippetTable>,
    training: AtomicBool,
    last_outcome: Mutex<Option<TrainOutcome>>,
}

/// Clears the engine's in-flight flag when dropped.
pub struct TrainingGuard {
    engine: Arc<Engine>,
}

impl Drop for TrainingGuard {
    fn drop(&mut self) {
        self.engine.training.store(false, Ordering::Release);
    }
}

impl Engine {
    fn new(key: RepoKey, table: Arc<dyn SnippetTable>) -> Self {
        Self {
            key,
            table,
            training: AtomicBool::new(false),
            last_outcome: Mutex::new(None),
        }
    }

    pub fn key(&self) -> &RepoKey {
        &self.key
    }

    pub fn table(&self) -> &Arc<dyn SnippetTable> {
        &self.table
    }

    pub fn is_training(&self) -> bool {
        self.training.load(Ordering::Acquire)
    }

    /// Claim the engine for one training run. `None` if a run is in flight.
    pub fn try_begin_training(self: &Arc<Self>) -> Option<TrainingGuard> {
        self.training
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| TrainingGuard {
                engine: Arc::clone(self),
            })
    }

    pub fn record(&self, outcome: TrainOutcome) {
        if let Ok(mut last) = self.last_outcome.lock() {
            *last = Some(outcome);
        }
    }

    pub fn last_outcome(&self) -> Option<TrainOutcome> {
        self.last_outcome.lock().ok().and_then(|last| last.clone())
    }

    pub async fn is_trained(&self) -> EngineResult<bool> {
        Ok(self.table.has_index().await?)
    }
}

pub struct EngineRegistry {
    store: Arc<dyn TableStore>,
    engines: tokio::sync::Mutex<HashMap<RepoKey, Arc<Engine>>>,
    manifest_path: PathBuf,
}

impl EngineRegistry {
    pub fn new(store: Arc<dyn TableStore>, manifest_path: PathBuf) -> Self {
        Self {
            store,
            engines: tokio::sync::Mutex::new(HashMap::new()),
            manifest_path,
        }
    }

    /// Return the engine for `key`, opening its table on first use.
    pub async fn get_or_create(&self, key: &RepoKey) -> EngineResult<Arc<Engine>> {
        let mut engines = self.engines.lock().await;
        if let Some(engine) = engines.get(key) {
            return Ok(engine.clone());
        }
        let table = self.store.open_table(key).await?;
        let engine = Arc::new(Engine::new(key.clone(), table));
        engines.insert(key.clone(), engine.clone());
        tracing::debug!(index = %key, "registered engine");
        Ok(engine)
    }

    pub async fn get(&self, key: &RepoKey) -> Option<Arc<Engine>> {
        self.engines.lock().await.get(key).cloned()
    }

    /// All registered keys, sorted.
    pub async fn keys(&self) -> Vec<RepoKey> {
        let mut keys: Vec<RepoKey> = self.engines.lock().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn manifest_path(&self) -> &Path {
        &self.manifest_path
    }

    pub async fn persist(&self) -> Result<()> {
        let keys = self.keys().await;
        write_manifest(&self.manifest_path, &keys)?;
        tracing::debug!(entries = keys.len(), path = %self.manifest_path.display(), "persisted manifest");
        Ok(())
    }
}

/// Read a manifest. A missing file is an empty manifest.
pub fn load_manifest(path: &Path) -> Result<Vec<RepoKey>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read manifest: {}", path.display()))?;
    serde_json::from_str(&data)
        .with_context(|| format!("Failed to parse manifest: {}", path.display()))
}

/// Atomically replace the manifest (temp file + rename).
pub fn write_manifest(path: &Path, keys: &[RepoKey]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }
    let data = serde_json::to_string_pretty(keys)?;
    let tmp_path = path.with_extension(format!("{}.tmp", uuid::Uuid::new_v4().simple()));
    std::fs::write(&tmp_path, data)
        .with_context(|| format!("Failed to write {}", tmp_path.display()))?;
    std::fs::rename(&tmp_path, path)
        .with_context(|| format!("Failed to replace manifest: {}", path.display()))?;
    Ok(())
}
