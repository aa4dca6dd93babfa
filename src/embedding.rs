//! Embedding provider implementations.
//!
//! The [`EmbeddingProvider`] trait lives in `snippet-search-core`. This
//! module adds the providers that need configuration or network access:
//!
//! - [`HashingEmbedder`] (core): deterministic feature hashing, no model.
//! - [`DisabledProvider`]: every call fails, so training and search report
//!   an error instead of indexing garbage.
//! - [`OpenAIProvider`]: any OpenAI-compatible `/embeddings` endpoint,
//!   batched by `embedding.batch_size`.
//!
//! ```rust,no_run
//! # use snippet_search::config::EmbeddingConfig;
//! # use snippet_search::embedding::create_provider;
//! let config = EmbeddingConfig::default(); // provider = "hashing"
//! let provider = create_provider(&config).unwrap();
//! assert_eq!(provider.model_name(), "fnv1a-hashing");
//! ```
//!
//! Requests that fail with 429, a 5xx status, or a transport error are
//! retried up to `embedding.max_retries` times with doubling delays
//! (0.5s, 1s, 2s, ... capped at 16s). Other 4xx responses fail at once.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

pub use snippet_search_core::embedding::{EmbeddingProvider, HashingEmbedder};

use crate::config::EmbeddingConfig;

/// Provider for deployments that only serve already-built indexes.
pub struct DisabledProvider;

#[async_trait]
impl EmbeddingProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        bail!("Embedding provider is disabled")
    }
}

/// Delay before the first retry; doubles per attempt up to [`RETRY_CAP`].
const RETRY_BASE: Duration = Duration::from_millis(500);
const RETRY_CAP: Duration = Duration::from_secs(16);

#[derive(Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

/// Client for an OpenAI-compatible `/embeddings` endpoint.
///
/// The API key is read from `embedding.api_key_env`; without one the
/// request is sent unauthenticated, which local compatible servers accept.
pub struct OpenAIProvider {
    model: String,
    dims: usize,
    batch_size: usize,
    max_retries: u32,
    endpoint: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl OpenAIProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let Some(model) = config.model.clone() else {
            bail!("embedding.model is required for the openai provider");
        };
        let Some(dims) = config.dims.filter(|d| *d > 0) else {
            bail!("embedding.dims is required for the openai provider");
        };
        let api_key = std::env::var(&config.api_key_env).ok().filter(|k| !k.is_empty());
        if api_key.is_none() {
            tracing::warn!(var = %config.api_key_env, "no embedding API key set, sending unauthenticated requests");
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            model,
            dims,
            batch_size: config.batch_size.max(1),
            max_retries: config.max_retries,
            endpoint: format!("{}/embeddings", config.base_url.trim_end_matches('/')),
            api_key,
            client,
        })
    }

    async fn request(&self, texts: &[String]) -> Result<reqwest::Response> {
        let mut req = self.client.post(&self.endpoint).json(&EmbeddingsRequest {
            model: &self.model,
            input: texts,
        });
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        Ok(req.send().await?)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut attempt = 0u32;
        loop {
            let failure = match self.request(texts).await {
                Ok(resp) if resp.status().is_success() => {
                    let parsed: EmbeddingsResponse = resp.json().await?;
                    return into_vectors(parsed, texts.len(), self.dims);
                }
                Ok(resp) => {
                    let status = resp.status();
                    let text = resp.text().await.unwrap_or_default();
                    let err = anyhow!("embeddings API returned {}: {}", status, text);
                    if !is_retryable(status) {
                        return Err(err);
                    }
                    err
                }
                Err(e) => e,
            };

            attempt += 1;
            if attempt > self.max_retries {
                return Err(failure.context(format!("embedding failed after {} attempts", attempt)));
            }
            let delay = retry_delay(attempt);
            tracing::warn!(attempt, ?delay, error = %failure, "retrying embeddings request");
            tokio::time::sleep(delay).await;
        }
    }
}

fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Delay before retry number `attempt` (1-based).
fn retry_delay(attempt: u32) -> Duration {
    RETRY_BASE
        .saturating_mul(1u32 << (attempt - 1).min(16))
        .min(RETRY_CAP)
}

/// Order vectors by their `index` field and check count and width.
fn into_vectors(resp: EmbeddingsResponse, expected: usize, dims: usize) -> Result<Vec<Vec<f32>>> {
    let mut indexed: Vec<(usize, Vec<f32>)> = resp
        .data
        .into_iter()
        .enumerate()
        .map(|(pos, d)| (d.index.unwrap_or(pos), d.embedding))
        .collect();
    indexed.sort_by_key(|(index, _)| *index);

    if indexed.len() != expected {
        bail!(
            "embeddings API returned {} vectors for {} inputs",
            indexed.len(),
            expected
        );
    }
    if let Some((_, v)) = indexed.iter().find(|(_, v)| v.len() != dims) {
        bail!("embeddings API returned {} dims, expected {}", v.len(), dims);
    }
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            out.extend(self.embed_batch(batch).await?);
        }
        Ok(out)
    }
}

/// Create the configured [`EmbeddingProvider`].
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"hashing"` | [`HashingEmbedder`] with `embedding.dims` (default 256) |
/// | `"disabled"` | [`DisabledProvider`] |
/// | `"openai"` | [`OpenAIProvider`] |
pub fn create_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "hashing" => Ok(Arc::new(match config.dims {
            Some(dims) => HashingEmbedder::new(dims),
            None => HashingEmbedder::default(),
        })),
        "disabled" => Ok(Arc::new(DisabledProvider)),
        "openai" => Ok(Arc::new(OpenAIProvider::new(config)?)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_hashing_provider_uses_dims() {
        let mut config = EmbeddingConfig::default();
        config.dims = Some(32);
        let provider = create_provider(&config).unwrap();
        assert_eq!(provider.model_name(), HashingEmbedder::MODEL_NAME);
        assert_eq!(provider.dims(), 32);
    }

    #[tokio::test]
    async fn test_disabled_provider_errors() {
        let mut config = EmbeddingConfig::default();
        config.provider = "disabled".to_string();
        let provider = create_provider(&config).unwrap();
        let err = provider.embed(&["x".to_string()]).await.unwrap_err();
        assert!(err.to_string().contains("disabled"));
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let mut config = EmbeddingConfig::default();
        config.provider = "word2vec".to_string();
        assert!(create_provider(&config).is_err());
    }

    #[test]
    fn test_vectors_ordered_by_index_and_checked() {
        let resp: EmbeddingsResponse = serde_json::from_value(serde_json::json!({
            "data": [
                {"index": 1, "embedding": [0.0, 1.0]},
                {"index": 0, "embedding": [1.0, 0.0]}
            ]
        }))
        .unwrap();
        let vecs = into_vectors(resp, 2, 2).unwrap();
        assert_eq!(vecs, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);

        let short: EmbeddingsResponse =
            serde_json::from_value(serde_json::json!({"data": [{"embedding": [1.0]}]})).unwrap();
        assert!(into_vectors(short, 2, 1).is_err());
        let narrow: EmbeddingsResponse =
            serde_json::from_value(serde_json::json!({"data": [{"embedding": [1.0]}]})).unwrap();
        assert!(into_vectors(narrow, 1, 3).is_err());
    }

    #[test]
    fn test_retry_delay_doubles_and_caps() {
        assert_eq!(retry_delay(1), Duration::from_millis(500));
        assert_eq!(retry_delay(2), Duration::from_secs(1));
        assert_eq!(retry_delay(4), Duration::from_secs(4));
        assert_eq!(retry_delay(10), RETRY_CAP);
    }

    #[test]
    fn test_openai_requires_model_and_dims() {
        let mut config = EmbeddingConfig::default();
        config.provider = "openai".to_string();
        assert!(OpenAIProvider::new(&config).is_err());
        config.model = Some("m".to_string());
        assert!(OpenAIProvider::new(&config).is_err());
        config.dims = Some(2);
        assert!(OpenAIProvider::new(&config).is_ok());
    }

    #[tokio::test]
    async fn test_openai_retries_server_errors() {
        use axum::{http::StatusCode as AxumStatus, routing::post, Json, Router};
        use std::sync::atomic::{AtomicU32, Ordering};

        let calls = Arc::new(AtomicU32::new(0));
        let seen = calls.clone();
        let app = Router::new().route(
            "/v1/embeddings",
            post(move |Json(body): Json<serde_json::Value>| {
                let seen = seen.clone();
                async move {
                    if seen.fetch_add(1, Ordering::SeqCst) == 0 {
                        return Err(AxumStatus::SERVICE_UNAVAILABLE);
                    }
                    let n = body["input"].as_array().map(|a| a.len()).unwrap_or(0);
                    let data: Vec<serde_json::Value> = (0..n)
                        .map(|i| serde_json::json!({"index": i, "embedding": [i as f32, 1.0]}))
                        .collect();
                    Ok(Json(serde_json::json!({ "data": data })))
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let config = EmbeddingConfig {
            provider: "openai".to_string(),
            model: Some("test-model".to_string()),
            dims: Some(2),
            batch_size: 2,
            max_retries: 2,
            base_url: format!("http://{}/v1", addr),
            api_key_env: "SNIPS_TEST_UNSET_KEY".to_string(),
            ..EmbeddingConfig::default()
        };
        let provider = OpenAIProvider::new(&config).unwrap();
        let texts: Vec<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
        let vecs = provider.embed(&texts).await.unwrap();

        assert_eq!(vecs, vec![vec![0.0, 1.0], vec![1.0, 1.0], vec![0.0, 1.0]]);
        // one failed attempt plus two batches
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
