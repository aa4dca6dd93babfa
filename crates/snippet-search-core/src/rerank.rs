//! Secondary scoring stages applied after similarity search.
//!
//! A [`Reranker`] receives the ranked hits and returns them re-scored and
//! re-ordered. Re-rankers are applied in sequence by the query engine.
//!
//! Scores are combined with a position-aware blend so that the first-stage
//! ranking keeps more weight at the top of the list:
//!
//! | Rank | First stage | Re-ranker |
//! |------|-------------|-----------|
//! | 1–3  | 75% | 25% |
//! | 4–10 | 60% | 40% |
//! | 11+  | 40% | 60% |

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashSet;

use crate::embedding::tokenize;
use crate::models::SearchHit;
use crate::store::sort_hits;

#[async_trait]
pub trait Reranker: Send + Sync {
    /// Short identifier used in configuration (e.g. `"keyword"`).
    fn name(&self) -> &str;

    async fn rerank(&self, query: &str, hits: Vec<SearchHit>) -> Result<Vec<SearchHit>>;
}

/// Blend `scores` (parallel to `hits`, already in rank order) into each
/// hit's score and re-sort.
pub fn blend_position_aware(hits: &mut [SearchHit], scores: &[f64]) {
    for (i, (hit, rerank)) in hits.iter_mut().zip(scores).enumerate() {
        let (first_w, rerank_w) = if i < 3 {
            (0.75, 0.25)
        } else if i < 10 {
            (0.60, 0.40)
        } else {
            (0.40, 0.60)
        };
        hit.score = first_w * hit.score + rerank_w * rerank;
    }
    sort_hits(hits);
}

/// Lexical re-ranker: rewards snippets that literally contain the query's
/// identifier tokens, with an extra bonus when the file name matches.
#[derive(Debug, Default, Clone)]
pub struct KeywordReranker;

impl KeywordReranker {
    pub fn new() -> Self {
        Self
    }

    /// Overlap score in `[0, 1]`.
    pub fn score(query_tokens: &HashSet<String>, hit: &SearchHit) -> f64 {
        if query_tokens.is_empty() {
            return 0.0;
        }
        let text_tokens: HashSet<String> = tokenize(&hit.snippet.text).into_iter().collect();
        let base = hit
            .snippet
            .filename
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or_default();
        let name_tokens: HashSet<String> = tokenize(base).into_iter().collect();

        let in_text = query_tokens
            .iter()
            .filter(|t| text_tokens.contains(*t))
            .count() as f64;
        let in_name = query_tokens
            .iter()
            .filter(|t| name_tokens.contains(*t))
            .count() as f64;
        let n = query_tokens.len() as f64;
        (0.8 * in_text / n + 0.2 * in_name / n).min(1.0)
    }
}

#[async_trait]
impl Reranker for KeywordReranker {
    fn name(&self) -> &str {
        "keyword"
    }

    async fn rerank(&self, query: &str, mut hits: Vec<SearchHit>) -> Result<Vec<SearchHit>> {
        let query_tokens: HashSet<String> = tokenize(query).into_iter().collect();
        if query_tokens.is_empty() || hits.is_empty() {
            return Ok(hits);
        }
        let scores: Vec<f64> = hits
            .iter()
            .map(|h| Self::score(&query_tokens, h))
            .collect();
        blend_position_aware(&mut hits, &scores);
        Ok(hits)
    }
}
