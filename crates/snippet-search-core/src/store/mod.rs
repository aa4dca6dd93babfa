//! Table storage abstraction.
//!
//! A [`TableStore`] hands out one [`SnippetTable`] per `(owner, repo)`.
//! Tables hold snippet rows plus their embedding vectors and expose a
//! similarity index that is only ever visible once fully built.
//!
//! # Generations
//!
//! Each training run stages its rows under a new generation:
//!
//! ```text
//! begin_generation ─▶ add_snippets × N ─▶ build_index(replace)  ─▶ published
//!                                     └─▶ discard_staged        ─▶ unchanged
//! ```
//!
//! Readers ([`nearest`](SnippetTable::nearest),
//! [`row_count`](SnippetTable::row_count)) only see the published
//! generation, so a search racing a training run observes either the old
//! index or the new one.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use crate::language::Language;
use crate::models::{RepoKey, SearchHit, Snippet};

/// One repository's vector table.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`begin_generation`](SnippetTable::begin_generation) | Start staging a new row set |
/// | [`add_snippets`](SnippetTable::add_snippets) | Append rows to the staged set (no dedup) |
/// | [`build_index`](SnippetTable::build_index) | Build and publish the similarity index |
/// | [`discard_staged`](SnippetTable::discard_staged) | Drop staged rows after a failed run |
/// | [`has_index`](SnippetTable::has_index) | Whether a completed index is published |
/// | [`row_count`](SnippetTable::row_count) | Rows in the published generation |
/// | [`nearest`](SnippetTable::nearest) | Ranked cosine-similarity search |
/// | [`cached_vectors`](SnippetTable::cached_vectors) | Reuse vectors of unchanged snippets |
#[async_trait]
pub trait SnippetTable: Send + Sync {
    fn key(&self) -> &RepoKey;

    /// Start a new staged generation, discarding any previous unpublished
    /// rows. Returns the generation number.
    async fn begin_generation(&self) -> Result<u64>;

    /// Append snippets with their vectors (parallel slices) to the staged
    /// generation, starting one if needed.
    async fn add_snippets(&self, snippets: &[Snippet], vectors: &[Vec<f32>]) -> Result<()>;

    /// Build the similarity index.
    ///
    /// With a staged generation the index is built over the staged rows and
    /// published atomically; older rows are then removed. Without one,
    /// `replace = true` rebuilds the index over the published rows.
    /// `replace = false` is a no-op when an index already exists.
    async fn build_index(&self, replace: bool) -> Result<()>;

    /// Drop the staged generation, leaving the published state untouched.
    async fn discard_staged(&self) -> Result<()>;

    async fn has_index(&self) -> Result<bool>;

    async fn row_count(&self) -> Result<usize>;

    /// Return up to `limit` rows of the published index ordered by
    /// descending cosine similarity, optionally restricted to `language`.
    async fn nearest(
        &self,
        query_vec: &[f32],
        limit: usize,
        language: Option<Language>,
    ) -> Result<Vec<SearchHit>>;

    /// Vectors the published index already holds for snippets with the
    /// same text, aligned with `snippets`. `None` means the text must be
    /// embedded. Tables without a cache miss on every entry.
    async fn cached_vectors(&self, snippets: &[Snippet]) -> Result<Vec<Option<Vec<f32>>>> {
        Ok(vec![None; snippets.len()])
    }
}

/// Factory for per-repository tables.
#[async_trait]
pub trait TableStore: Send + Sync {
    /// Open the table for `key`, creating it if it does not exist.
    /// Repeated calls address the same logical table.
    async fn open_table(&self, key: &RepoKey) -> Result<Arc<dyn SnippetTable>>;
}

/// Reject mismatched snippet/vector batches before touching storage.
pub fn check_batch(snippets: &[Snippet], vectors: &[Vec<f32>]) -> Result<()> {
    if snippets.len() != vectors.len() {
        anyhow::bail!(
            "snippet batch has {} rows but {} vectors",
            snippets.len(),
            vectors.len()
        );
    }
    Ok(())
}

/// Order hits by score, best first. Ties keep their insertion order.
pub fn sort_hits(hits: &mut [SearchHit]) {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}
