//! Re-ranker construction and the cross-encoder re-ranker.
//!
//! The cross-encoder posts every `(query, snippet)` pair in one request to
//! an OpenAI-compatible `/v1/rerank` endpoint, sigmoid-normalizes the raw
//! relevance logits, and blends them into the similarity ranking with
//! [`blend_position_aware`].

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use snippet_search_core::models::SearchHit;
use snippet_search_core::rerank::{blend_position_aware, KeywordReranker, Reranker};

use crate::config::{Config, RerankerConfig};

/// Characters of snippet text sent per document.
const MAX_DOCUMENT_CHARS: usize = 2000;

pub struct CrossEncoderReranker {
    url: String,
    model: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl CrossEncoderReranker {
    pub fn new(config: &RerankerConfig) -> Result<Self> {
        let base_url = config
            .base_url
            .as_deref()
            .context("Reranker base_url not configured")?;
        Ok(Self {
            url: format!("{}/v1/rerank", base_url.trim_end_matches('/')),
            model: config.model.clone().unwrap_or_else(|| "default".to_string()),
            timeout: Duration::from_secs(config.timeout_secs),
            client: reqwest::Client::builder()
                .connect_timeout(Duration::from_secs(5))
                .build()?,
        })
    }
}

/// Maps raw logits to `(0, 1)`.
pub fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

#[derive(Serialize)]
struct RerankRequest<'a> {
    model: &'a str,
    query: &'a str,
    documents: Vec<String>,
    top_n: usize,
}

#[derive(Deserialize)]
struct RerankResponse {
    results: Vec<RerankResultRaw>,
}

#[derive(Deserialize)]
struct RerankResultRaw {
    index: usize,
    relevance_score: f64,
}

/// Sigmoid-normalized score per document. Documents the endpoint left
/// out, or indexed out of range, sit at the sigmoid midpoint.
fn normalized_scores(n: usize, results: &[RerankResultRaw]) -> Vec<f64> {
    let mut scores = vec![sigmoid(0.0); n];
    for r in results {
        if let Some(slot) = scores.get_mut(r.index) {
            *slot = sigmoid(r.relevance_score);
        }
    }
    scores
}

#[async_trait]
impl Reranker for CrossEncoderReranker {
    fn name(&self) -> &str {
        "cross-encoder"
    }

    async fn rerank(&self, query: &str, mut hits: Vec<SearchHit>) -> Result<Vec<SearchHit>> {
        if hits.is_empty() {
            return Ok(hits);
        }

        let documents: Vec<String> = hits
            .iter()
            .map(|h| h.snippet.text.chars().take(MAX_DOCUMENT_CHARS).collect())
            .collect();
        let body = RerankRequest {
            model: &self.model,
            query,
            documents,
            top_n: hits.len(),
        };

        let resp = self
            .client
            .post(&self.url)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .context("Failed to reach reranker endpoint")?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("Reranker returned {status}: {text}");
        }
        let parsed: RerankResponse = resp
            .json()
            .await
            .context("Failed to parse reranker response")?;

        let scores = normalized_scores(hits.len(), &parsed.results);
        blend_position_aware(&mut hits, &scores);
        Ok(hits)
    }
}

/// Instantiate the re-rankers listed in `search.rerankers`, in order.
pub fn build_rerankers(config: &Config) -> Result<Vec<Arc<dyn Reranker>>> {
    config
        .search
        .rerankers
        .iter()
        .map(|name| -> Result<Arc<dyn Reranker>> {
            match name.as_str() {
                "keyword" => Ok(Arc::new(KeywordReranker::new())),
                "cross-encoder" => Ok(Arc::new(CrossEncoderReranker::new(&config.reranker)?)),
                other => anyhow::bail!("Unknown reranker: {}", other),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::post;
    use axum::{Json, Router};
    use snippet_search_core::language::Language;
    use snippet_search_core::models::Snippet;

    #[test]
    fn test_sigmoid() {
        assert!((sigmoid(0.0) - 0.5).abs() < 1e-9);
        assert!(sigmoid(10.0) > 0.999);
        assert!((sigmoid(2.5) + sigmoid(-2.5) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_build_rerankers_in_order() {
        let mut config = Config::minimal();
        config.search.rerankers = vec!["keyword".to_string(), "cross-encoder".to_string()];
        config.reranker.base_url = Some("http://127.0.0.1:1".to_string());
        let rerankers = build_rerankers(&config).unwrap();
        let names: Vec<&str> = rerankers.iter().map(|r| r.name()).collect();
        assert_eq!(names, vec!["keyword", "cross-encoder"]);

        config.search.rerankers = vec!["cross-encoder".to_string()];
        config.reranker.base_url = None;
        assert!(build_rerankers(&config).is_err());
    }

    async fn fake_rerank(Json(req): Json<serde_json::Value>) -> Json<serde_json::Value> {
        // Score documents mentioning "needle" high, everything else low
        let docs = req["documents"].as_array().cloned().unwrap_or_default();
        let results: Vec<serde_json::Value> = docs
            .iter()
            .enumerate()
            .map(|(i, d)| {
                let score = if d.as_str().unwrap_or("").contains("needle") { 8.0 } else { -8.0 };
                serde_json::json!({ "index": i, "relevance_score": score })
            })
            .collect();
        Json(serde_json::json!({ "results": results }))
    }

    #[test]
    fn test_omitted_documents_score_neutral() {
        let results = vec![
            RerankResultRaw {
                index: 0,
                relevance_score: 4.0,
            },
            RerankResultRaw {
                index: 7,
                relevance_score: 9.0,
            },
        ];
        let scores = normalized_scores(3, &results);
        assert!(scores[0] > 0.98);
        assert_eq!(scores[1], 0.5);
        assert_eq!(scores[2], 0.5);
    }

    #[tokio::test]
    async fn test_cross_encoder_promotes_relevant_hit() {
        let app = Router::new().route("/v1/rerank", post(fake_rerank));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let reranker = CrossEncoderReranker::new(&RerankerConfig {
            base_url: Some(format!("http://{}", addr)),
            ..RerankerConfig::default()
        })
        .unwrap();

        let hits: Vec<SearchHit> = ["hay", "hay", "hay", "needle here"]
            .iter()
            .enumerate()
            .map(|(i, text)| SearchHit {
                snippet: Snippet {
                    filename: format!("/r/f{}.py", i),
                    language: Language::Python,
                    text: text.to_string(),
                    bytes: 0,
                },
                score: 0.5 - i as f64 * 0.01,
            })
            .collect();

        let out = reranker.rerank("needle", hits).await.unwrap();
        assert_eq!(out.len(), 4);
        assert!(out[0].snippet.text.contains("needle"));
    }
}
