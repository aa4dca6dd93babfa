//! Configuration parsing and validation.
//!
//! Snippet Search is configured via a TOML file (default: `config/snips.toml`).
//! Every section is optional; omitted values fall back to the defaults below.
//!
//! # Example Configuration
//!
//! ```toml
//! [server]
//! bind = "127.0.0.1:8080"
//!
//! [storage]
//! repo_root = "./data/repos"
//! manifest_path = "./data/manifest.json"
//! db_path = "./data/snips.sqlite"
//! backend = "sqlite"
//!
//! [embedding]
//! provider = "hashing"
//! dims = 256
//!
//! [training]
//! batch_size = 64
//! exclude_dirs = ["fixtures"]
//! exclude_globs = ["*.min.js"]
//!
//! [search]
//! default_limit = 5
//! rerankers = ["keyword"]
//!
//! [hosting]
//! api_url = "https://api.github.com"
//! web_url = "https://github.com"
//!
//! [download]
//! max_concurrency = 4
//! max_retries = 3
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub training: TrainingConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub reranker: RerankerConfig,
    #[serde(default)]
    pub hosting: HostingConfig,
    #[serde(default)]
    pub download: DownloadConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Clones live at `{repo_root}/{user}/{repo}`.
    #[serde(default = "default_repo_root")]
    pub repo_root: PathBuf,
    #[serde(default = "default_manifest_path")]
    pub manifest_path: PathBuf,
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    /// `"sqlite"` or `"memory"`.
    #[serde(default = "default_backend")]
    pub backend: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            repo_root: default_repo_root(),
            manifest_path: default_manifest_path(),
            db_path: default_db_path(),
            backend: default_backend(),
        }
    }
}

fn default_repo_root() -> PathBuf {
    PathBuf::from("./data/repos")
}
fn default_manifest_path() -> PathBuf {
    PathBuf::from("./data/manifest.json")
}
fn default_db_path() -> PathBuf {
    PathBuf::from("./data/snips.sqlite")
}
fn default_backend() -> String {
    "sqlite".to_string()
}

impl StorageConfig {
    /// Local checkout path for one repository.
    pub fn repo_path(&self, owner: &str, repo: &str) -> PathBuf {
        self.repo_root.join(owner).join(repo)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `"hashing"`, `"openai"`, or `"disabled"`.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Base URL of an OpenAI-compatible embeddings API.
    #[serde(default = "default_embedding_url")]
    pub base_url: String,
    /// Environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            base_url: default_embedding_url(),
            api_key_env: default_api_key_env(),
        }
    }
}

fn default_provider() -> String {
    "hashing".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_embedding_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct TrainingConfig {
    /// Snippets buffered per `add_snippets` call.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
    /// Directory names pruned in addition to the built-in list.
    #[serde(default)]
    pub exclude_dirs: Vec<String>,
    /// Globs matched against file base names.
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default = "default_warmup_concurrency")]
    pub warmup_concurrency: usize,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_file_bytes: default_max_file_bytes(),
            exclude_dirs: Vec::new(),
            exclude_globs: Vec::new(),
            warmup_concurrency: default_warmup_concurrency(),
        }
    }
}

fn default_max_file_bytes() -> u64 {
    1024 * 1024
}
fn default_warmup_concurrency() -> usize {
    2
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    #[serde(default = "default_limit")]
    pub default_limit: usize,
    #[serde(default = "default_candidate_multiplier")]
    pub candidate_multiplier: usize,
    /// Applied in order: `"keyword"`, `"cross-encoder"`.
    #[serde(default)]
    pub rerankers: Vec<String>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
            candidate_multiplier: default_candidate_multiplier(),
            rerankers: Vec::new(),
        }
    }
}

fn default_limit() -> usize {
    5
}
fn default_candidate_multiplier() -> usize {
    4
}

#[derive(Debug, Deserialize, Clone)]
pub struct RerankerConfig {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_reranker_timeout")]
    pub timeout_secs: u64,
}

impl Default for RerankerConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            model: None,
            timeout_secs: default_reranker_timeout(),
        }
    }
}

fn default_reranker_timeout() -> u64 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct HostingConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_web_url")]
    pub web_url: String,
    /// Branch segment used in result links.
    #[serde(default = "default_branch")]
    pub branch: String,
    /// Environment variable holding an optional API token.
    #[serde(default = "default_token_env")]
    pub token_env: String,
}

impl Default for HostingConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            web_url: default_web_url(),
            branch: default_branch(),
            token_env: default_token_env(),
        }
    }
}

fn default_api_url() -> String {
    "https://api.github.com".to_string()
}
fn default_web_url() -> String {
    "https://github.com".to_string()
}
fn default_branch() -> String {
    "HEAD".to_string()
}
fn default_token_env() -> String {
    "GITHUB_TOKEN".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct DownloadConfig {
    #[serde(default = "default_download_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_download_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_backoff")]
    pub base_backoff_secs: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_download_concurrency(),
            max_retries: default_download_retries(),
            base_backoff_secs: default_base_backoff(),
            max_backoff_secs: default_max_backoff(),
        }
    }
}

fn default_download_concurrency() -> usize {
    4
}
fn default_download_retries() -> u32 {
    3
}
fn default_base_backoff() -> u64 {
    2
}
fn default_max_backoff() -> u64 {
    60
}

impl Config {
    /// Default configuration, used when no config file is present and by
    /// tests that override individual paths.
    pub fn minimal() -> Self {
        Self::default()
    }

    /// Configuration rooted in `dir`: repos, manifest, and database all live
    /// beneath it.
    pub fn rooted_at(dir: &Path) -> Self {
        let mut config = Self::minimal();
        config.storage.repo_root = dir.join("repos");
        config.storage.manifest_path = dir.join("manifest.json");
        config.storage.db_path = dir.join("snips.sqlite");
        config
    }
}

/// Check the invariants `load_config` enforces on a parsed configuration.
pub fn validate(config: &Config) -> Result<()> {
    match config.storage.backend.as_str() {
        "sqlite" | "memory" => {}
        other => anyhow::bail!(
            "Unknown storage backend: '{}'. Must be sqlite or memory.",
            other
        ),
    }

    match config.embedding.provider.as_str() {
        "hashing" | "disabled" => {}
        "openai" => {
            if config.embedding.model.is_none() {
                anyhow::bail!("embedding.model must be specified when provider is 'openai'");
            }
            if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
                anyhow::bail!("embedding.dims must be > 0 when provider is 'openai'");
            }
        }
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be hashing, openai, or disabled.",
            other
        ),
    }
    if config.embedding.dims == Some(0) {
        anyhow::bail!("embedding.dims must be > 0");
    }
    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }

    if config.training.batch_size == 0 {
        anyhow::bail!("training.batch_size must be > 0");
    }
    if config.training.warmup_concurrency == 0 {
        anyhow::bail!("training.warmup_concurrency must be > 0");
    }
    for pattern in &config.training.exclude_globs {
        globset::Glob::new(pattern)
            .with_context(|| format!("Invalid training.exclude_globs pattern: {}", pattern))?;
    }

    if config.search.default_limit == 0 {
        anyhow::bail!("search.default_limit must be >= 1");
    }
    if config.search.candidate_multiplier == 0 {
        anyhow::bail!("search.candidate_multiplier must be >= 1");
    }
    for name in &config.search.rerankers {
        match name.as_str() {
            "keyword" => {}
            "cross-encoder" => {
                if config.reranker.base_url.is_none() {
                    anyhow::bail!("reranker.base_url is required for the cross-encoder reranker");
                }
            }
            other => anyhow::bail!(
                "Unknown reranker: '{}'. Must be keyword or cross-encoder.",
                other
            ),
        }
    }

    if config.download.max_concurrency == 0 {
        anyhow::bail!("download.max_concurrency must be > 0");
    }
    if config.download.max_backoff_secs < config.download.base_backoff_secs {
        anyhow::bail!("download.max_backoff_secs must be >= download.base_backoff_secs");
    }

    Ok(())
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}
