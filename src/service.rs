//! Service wiring shared by the HTTP server and the CLI.
//!
//! [`Services`] owns the table store, engine registry, training
//! coordinator, download jobs, embedder, and re-rankers built from one
//! [`Config`], and exposes the request-level operations both front ends
//! need.

use anyhow::Result;
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use snippet_search_core::embedding::EmbeddingProvider;
use snippet_search_core::error::{EngineError, EngineResult};
use snippet_search_core::models::{RepoKey, ResultRecord};
use snippet_search_core::rerank::Reranker;
use snippet_search_core::search::{project, search_table, BlobLinks, SearchParams, SearchRequest};
use snippet_search_core::store::memory::InMemoryTableStore;
use snippet_search_core::store::TableStore;

use crate::config::Config;
use crate::db;
use crate::download::DownloadJobs;
use crate::embedding::create_provider;
use crate::hosting::{self, GitHubClient, HostingClient};
use crate::migrate;
use crate::registry::{load_manifest, EngineRegistry, TrainOutcome};
use crate::rerank::build_rerankers;
use crate::sqlite_store::SqliteTableStore;
use crate::train::TrainingCoordinator;

/// One row of `snips indexes`.
#[derive(Debug, Clone, Serialize)]
pub struct IndexStatus {
    pub index: String,
    pub trained: bool,
    pub training: bool,
    pub rows: usize,
    pub last_outcome: Option<TrainOutcome>,
}

pub struct Services {
    pub config: Arc<Config>,
    pub registry: Arc<EngineRegistry>,
    pub coordinator: Arc<TrainingCoordinator>,
    pub downloads: Arc<DownloadJobs>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub rerankers: Vec<Arc<dyn Reranker>>,
    pub links: BlobLinks,
    sqlite: Option<Arc<SqliteTableStore>>,
}

impl Services {
    /// Build every service with the GitHub hosting client.
    pub async fn build(config: Config) -> Result<Self> {
        let hosting = Arc::new(GitHubClient::new(&config.hosting)?);
        Self::with_hosting(config, hosting).await
    }

    pub async fn with_hosting(config: Config, hosting: Arc<dyn HostingClient>) -> Result<Self> {
        let embedder = create_provider(&config.embedding)?;
        let (store, sqlite): (Arc<dyn TableStore>, Option<Arc<SqliteTableStore>>) =
            match config.storage.backend.as_str() {
                "memory" => (Arc::new(InMemoryTableStore::new()) as Arc<dyn TableStore>, None),
                _ => {
                    let pool = db::connect(&config).await?;
                    migrate::migrate_pool(&pool).await?;
                    let sqlite = Arc::new(SqliteTableStore::new(
                        pool,
                        embedder.model_name(),
                        embedder.dims(),
                    ));
                    (sqlite.clone() as Arc<dyn TableStore>, Some(sqlite))
                }
            };

        let registry = Arc::new(EngineRegistry::new(
            store,
            config.storage.manifest_path.clone(),
        ));
        let coordinator = Arc::new(TrainingCoordinator::new(
            &config,
            registry.clone(),
            embedder.clone(),
        )?);
        let downloads = Arc::new(DownloadJobs::new(
            hosting,
            config.storage.repo_root.clone(),
            config.download.clone(),
        ));

        Ok(Self {
            rerankers: build_rerankers(&config)?,
            links: hosting::links(&config.hosting),
            config: Arc::new(config),
            registry,
            coordinator,
            downloads,
            embedder,
            sqlite,
        })
    }

    pub fn repo_path(&self, key: &RepoKey) -> PathBuf {
        self.config.storage.repo_path(&key.owner, &key.repo)
    }

    /// Register every known index without training: manifest entries plus
    /// tables already trained in the SQLite store.
    pub async fn register_known(&self) -> Result<Vec<RepoKey>> {
        let mut keys: BTreeSet<RepoKey> = load_manifest(&self.config.storage.manifest_path)?
            .into_iter()
            .collect();
        if let Some(sqlite) = &self.sqlite {
            keys.extend(sqlite.trained_keys().await?);
        }
        keys.retain(|key| match key.validate() {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(index = %key, error = %e, "ignoring manifest entry");
                false
            }
        });
        for key in &keys {
            self.registry.get_or_create(key).await?;
        }
        Ok(keys.into_iter().collect())
    }

    /// Register known indexes and rebuild any whose table is empty.
    pub async fn warm_up(&self) -> Result<usize> {
        let keys = self.register_known().await?;
        tracing::info!(indexes = keys.len(), "warm-loading indexes");
        Ok(self.coordinator.warm_up(keys).await)
    }

    /// Resolve an `"owner/repo"` token to its trained state.
    pub async fn is_trained(&self, index: &str) -> EngineResult<bool> {
        let key = RepoKey::from_str(index)?;
        let engine = self
            .registry
            .get(&key)
            .await
            .ok_or_else(|| EngineError::NotFound(format!("index {}", key)))?;
        engine.is_trained().await
    }

    pub async fn search(
        &self,
        key: &RepoKey,
        request: &SearchRequest<'_>,
    ) -> EngineResult<Vec<ResultRecord>> {
        let engine = self
            .registry
            .get(key)
            .await
            .ok_or_else(|| EngineError::NotFound(format!("index {}", key)))?;
        let params = SearchParams {
            candidate_multiplier: self.config.search.candidate_multiplier,
            default_limit: self.config.search.default_limit,
        };
        let hits = search_table(
            engine.table().as_ref(),
            self.embedder.as_ref(),
            &self.rerankers,
            request,
            &params,
        )
        .await?;
        Ok(project(&hits, key, &self.repo_path(key), &self.links))
    }

    pub async fn indexes(&self) -> Result<Vec<IndexStatus>> {
        let mut out = Vec::new();
        for key in self.registry.keys().await {
            if let Some(engine) = self.registry.get(&key).await {
                out.push(IndexStatus {
                    index: key.token(),
                    trained: engine.table().has_index().await?,
                    training: engine.is_training(),
                    rows: engine.table().row_count().await?,
                    last_outcome: engine.last_outcome(),
                });
            }
        }
        Ok(out)
    }
}
