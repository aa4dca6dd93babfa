//! Query engine: similarity search, re-ranking, and result projection.
//!
//! The engine operates entirely through the [`SnippetTable`],
//! [`EmbeddingProvider`] and [`Reranker`] traits.
//!
//! # Pipeline
//!
//! 1. Reject untrained tables with [`EngineError::NotFound`].
//! 2. Embed the query and fetch `limit × candidate_multiplier` nearest rows,
//!    optionally restricted to one language.
//! 3. Apply each re-ranker in order.
//! 4. Deduplicate by full filename, keeping the best-ranked occurrence.
//! 5. Truncate to `limit`.
//! 6. Project into [`ResultRecord`]s: preview text, hosting link built from
//!    the repo-relative path, then the filename reduced to its base name.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use crate::embedding::{embed_query, EmbeddingProvider};
use crate::error::{EngineError, EngineResult};
use crate::language::Language;
use crate::models::{RepoKey, ResultRecord, SearchHit};
use crate::rerank::Reranker;
use crate::store::SnippetTable;

/// Result count used when the caller gives none, or a non-positive one.
pub const DEFAULT_LIMIT: usize = 5;
/// Lines kept in a result preview.
pub const PREVIEW_LINES: usize = 5;

/// Retrieval tuning parameters, decoupled from application config.
#[derive(Debug, Clone)]
pub struct SearchParams {
    /// Candidates fetched per requested result, so dedup and re-ranking
    /// still have enough distinct files.
    pub candidate_multiplier: usize,
    pub default_limit: usize,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            candidate_multiplier: 4,
            default_limit: DEFAULT_LIMIT,
        }
    }
}

/// Bundles the caller-supplied inputs of one search.
#[derive(Debug, Clone)]
pub struct SearchRequest<'a> {
    pub query: &'a str,
    pub language: Option<&'a str>,
    pub limit: Option<i64>,
}

/// Builds hosting-platform URLs for repository files.
pub trait LinkBuilder: Send + Sync {
    fn link(&self, key: &RepoKey, relative_path: &str) -> String;
}

/// `{web_url}/{owner}/{repo}/blob/{branch}/{path}` links, the GitHub scheme.
#[derive(Debug, Clone)]
pub struct BlobLinks {
    pub web_url: String,
    pub branch: String,
}

impl LinkBuilder for BlobLinks {
    fn link(&self, key: &RepoKey, relative_path: &str) -> String {
        format!(
            "{}/{}/{}/blob/{}/{}",
            self.web_url.trim_end_matches('/'),
            key.owner,
            key.repo,
            self.branch,
            relative_path.replace('\\', "/").trim_start_matches('/')
        )
    }
}

/// Resolve the caller's limit: absent or non-positive means `default`.
pub fn effective_limit(limit: Option<i64>, default: usize) -> usize {
    match limit {
        Some(n) if n > 0 => n as usize,
        _ => default,
    }
}

/// First `lines` lines of `text`, each right-trimmed, joined by `\n`.
pub fn preview(text: &str, lines: usize) -> String {
    text.lines()
        .take(lines)
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Keep only the first occurrence of each filename, preserving order.
pub fn dedup_by_filename(hits: Vec<SearchHit>) -> Vec<SearchHit> {
    let mut seen = HashSet::new();
    hits.into_iter()
        .filter(|h| seen.insert(h.snippet.filename.clone()))
        .collect()
}

/// Path of `filename` relative to `repo_root`; paths outside the root are
/// returned unchanged.
pub fn relative_path(filename: &str, repo_root: &Path) -> String {
    Path::new(filename)
        .strip_prefix(repo_root)
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_else(|_| filename.to_string())
}

pub fn base_name(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string())
}

/// Project ranked hits into client records.
///
/// The link is derived from the full repo-relative path before the
/// filename is reduced to its base name.
pub fn project(
    hits: &[SearchHit],
    key: &RepoKey,
    repo_root: &Path,
    links: &dyn LinkBuilder,
) -> Vec<ResultRecord> {
    hits.iter()
        .map(|hit| {
            let rel = relative_path(&hit.snippet.filename, repo_root);
            let link = links.link(key, &rel);
            ResultRecord {
                text: preview(&hit.snippet.text, PREVIEW_LINES),
                language: hit.snippet.language.name().to_string(),
                filename: base_name(&hit.snippet.filename),
                link,
            }
        })
        .collect()
}

/// Run a ranked search against one repository table.
///
/// Returns deduplicated hits in final rank order, at most `limit` long.
pub async fn search_table(
    table: &dyn SnippetTable,
    embedder: &dyn EmbeddingProvider,
    rerankers: &[Arc<dyn Reranker>],
    request: &SearchRequest<'_>,
    params: &SearchParams,
) -> EngineResult<Vec<SearchHit>> {
    if request.query.trim().is_empty() {
        return Err(EngineError::InvalidRequest(
            "query must not be empty".to_string(),
        ));
    }

    let language = match request.language {
        None => None,
        Some(name) if name.trim().is_empty() => None,
        Some(name) => Some(Language::from_name(name).ok_or_else(|| {
            EngineError::InvalidRequest(format!("unsupported language: {}", name))
        })?),
    };

    if !table.has_index().await? {
        return Err(EngineError::NotFound(format!(
            "trained index for {}",
            table.key()
        )));
    }

    let limit = effective_limit(request.limit, params.default_limit);
    let candidates = limit.saturating_mul(params.candidate_multiplier.max(1));

    let query_vec = embed_query(embedder, request.query).await?;
    let mut hits = table.nearest(&query_vec, candidates, language).await?;

    for reranker in rerankers {
        hits = reranker.rerank(request.query, hits).await?;
    }

    let mut hits = dedup_by_filename(hits);
    hits.truncate(limit);
    Ok(hits)
}
