//! In-memory [`TableStore`] implementation for tests and the `memory`
//! storage backend.
//!
//! Uses `HashMap` and `Vec` behind `std::sync::RwLock`. The published
//! index is an immutable `Arc` snapshot; searches clone the `Arc` and never
//! hold the table lock while scoring.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::language::Language;
use crate::models::{RepoKey, SearchHit, Snippet};

use super::{check_batch, sort_hits, SnippetTable, TableStore};

#[derive(Clone)]
struct Row {
    generation: u64,
    snippet: Snippet,
    vector: Vec<f32>,
}

#[derive(Default)]
struct TableState {
    rows: Vec<Row>,
    published: Option<u64>,
    staged: Option<u64>,
    next_generation: u64,
    index: Option<Arc<Vec<Row>>>,
}

impl TableState {
    fn stage(&mut self) -> u64 {
        let generation = self.next_generation;
        self.next_generation += 1;
        if let Some(old) = self.staged.replace(generation) {
            self.rows.retain(|r| r.generation != old);
        }
        generation
    }

    fn stage_and_take(&mut self) -> u64 {
        let g = self.stage();
        self.staged = None;
        g
    }
}

/// A single repository table held in memory.
pub struct InMemoryTable {
    key: RepoKey,
    state: RwLock<TableState>,
}

impl InMemoryTable {
    pub fn new(key: RepoKey) -> Self {
        Self {
            key,
            state: RwLock::new(TableState::default()),
        }
    }

    /// Total rows held, staged generations included.
    pub fn raw_row_count(&self) -> usize {
        self.state.read().map(|s| s.rows.len()).unwrap_or(0)
    }
}

fn poisoned() -> anyhow::Error {
    anyhow!("table lock poisoned")
}

#[async_trait]
impl SnippetTable for InMemoryTable {
    fn key(&self) -> &RepoKey {
        &self.key
    }

    async fn begin_generation(&self) -> Result<u64> {
        let mut state = self.state.write().map_err(|_| poisoned())?;
        Ok(state.stage())
    }

    async fn add_snippets(&self, snippets: &[Snippet], vectors: &[Vec<f32>]) -> Result<()> {
        check_batch(snippets, vectors)?;
        let mut state = self.state.write().map_err(|_| poisoned())?;
        let staged = state.staged;
        let generation = match staged {
            Some(g) => g,
            None => state.stage(),
        };
        state
            .rows
            .extend(snippets.iter().zip(vectors).map(|(s, v)| Row {
                generation,
                snippet: s.clone(),
                vector: v.clone(),
            }));
        Ok(())
    }

    async fn build_index(&self, replace: bool) -> Result<()> {
        let mut state = self.state.write().map_err(|_| poisoned())?;
        if !replace && state.index.is_some() {
            return Ok(());
        }
        let staged = state.staged.take();
        let published = state.published;
        let target = match (staged, published) {
            (Some(g), _) => g,
            (None, Some(g)) => g,
            // nothing ever staged: an empty table indexes to nothing
            (None, None) => state.stage_and_take(),
        };
        let snapshot: Vec<Row> = state
            .rows
            .iter()
            .filter(|r| r.generation == target)
            .cloned()
            .collect();
        state.index = Some(Arc::new(snapshot));
        state.published = Some(target);
        state.rows.retain(|r| r.generation == target);
        Ok(())
    }

    async fn discard_staged(&self) -> Result<()> {
        let mut state = self.state.write().map_err(|_| poisoned())?;
        if let Some(g) = state.staged.take() {
            state.rows.retain(|r| r.generation != g);
        }
        Ok(())
    }

    async fn has_index(&self) -> Result<bool> {
        let state = self.state.read().map_err(|_| poisoned())?;
        Ok(state.index.is_some())
    }

    async fn row_count(&self) -> Result<usize> {
        let state = self.state.read().map_err(|_| poisoned())?;
        Ok(state.index.as_ref().map(|rows| rows.len()).unwrap_or(0))
    }

    async fn nearest(
        &self,
        query_vec: &[f32],
        limit: usize,
        language: Option<Language>,
    ) -> Result<Vec<SearchHit>> {
        let index = {
            let state = self.state.read().map_err(|_| poisoned())?;
            match &state.index {
                Some(index) => index.clone(),
                None => return Ok(Vec::new()),
            }
        };
        let mut hits: Vec<SearchHit> = index
            .iter()
            .filter(|r| language.map_or(true, |l| r.snippet.language == l))
            .map(|r| SearchHit {
                snippet: r.snippet.clone(),
                score: cosine_similarity(query_vec, &r.vector) as f64,
            })
            .collect();
        sort_hits(&mut hits);
        hits.truncate(limit);
        Ok(hits)
    }
}

/// [`TableStore`] keeping every table in process memory.
#[derive(Default)]
pub struct InMemoryTableStore {
    tables: Mutex<HashMap<RepoKey, Arc<InMemoryTable>>>,
}

impl InMemoryTableStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TableStore for InMemoryTableStore {
    async fn open_table(&self, key: &RepoKey) -> Result<Arc<dyn SnippetTable>> {
        let mut tables = self.tables.lock().map_err(|_| poisoned())?;
        let table = tables
            .entry(key.clone())
            .or_insert_with(|| Arc::new(InMemoryTable::new(key.clone())))
            .clone();
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snippet(name: &str, lang: Language, text: &str) -> Snippet {
        Snippet {
            filename: format!("/repos/alice/demo/{}", name),
            language: lang,
            text: text.to_string(),
            bytes: text.len() as u64,
        }
    }

    fn table() -> InMemoryTable {
        InMemoryTable::new(RepoKey::new("alice", "demo"))
    }

    #[tokio::test]
    async fn test_untrained_table_has_no_index() {
        let t = table();
        assert!(!t.has_index().await.unwrap());
        assert_eq!(t.row_count().await.unwrap(), 0);
        assert!(t.nearest(&[1.0], 5, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rows_invisible_until_index_built() {
        let t = table();
        t.begin_generation().await.unwrap();
        t.add_snippets(&[snippet("a.py", Language::Python, "x")], &[vec![1.0, 0.0]])
            .await
            .unwrap();
        assert!(!t.has_index().await.unwrap());
        assert_eq!(t.row_count().await.unwrap(), 0);

        t.build_index(true).await.unwrap();
        assert!(t.has_index().await.unwrap());
        assert_eq!(t.row_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_add_does_not_deduplicate() {
        let t = table();
        let s = snippet("a.py", Language::Python, "x");
        t.add_snippets(&[s.clone(), s], &[vec![1.0], vec![1.0]])
            .await
            .unwrap();
        t.build_index(true).await.unwrap();
        assert_eq!(t.row_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_new_generation_replaces_old_rows() {
        let t = table();
        t.begin_generation().await.unwrap();
        t.add_snippets(&[snippet("old.py", Language::Python, "x")], &[vec![1.0]])
            .await
            .unwrap();
        t.build_index(true).await.unwrap();

        t.begin_generation().await.unwrap();
        t.add_snippets(
            &[
                snippet("new1.py", Language::Python, "y"),
                snippet("new2.py", Language::Python, "z"),
            ],
            &[vec![1.0], vec![1.0]],
        )
        .await
        .unwrap();
        // old index still served while the new one is staged
        assert_eq!(t.row_count().await.unwrap(), 1);
        t.build_index(true).await.unwrap();

        let hits = t.nearest(&[1.0], 10, None).await.unwrap();
        let names: Vec<&str> = hits.iter().map(|h| h.snippet.filename.as_str()).collect();
        assert_eq!(hits.len(), 2);
        assert!(names.iter().all(|n| n.contains("new")));
        assert_eq!(t.raw_row_count(), 2);
    }

    #[tokio::test]
    async fn test_discard_staged_keeps_published_state() {
        let t = table();
        t.add_snippets(&[snippet("a.py", Language::Python, "x")], &[vec![1.0]])
            .await
            .unwrap();
        t.build_index(true).await.unwrap();

        t.begin_generation().await.unwrap();
        t.add_snippets(&[snippet("b.py", Language::Python, "y")], &[vec![1.0]])
            .await
            .unwrap();
        t.discard_staged().await.unwrap();

        assert_eq!(t.row_count().await.unwrap(), 1);
        assert_eq!(t.raw_row_count(), 1);
    }

    #[tokio::test]
    async fn test_build_without_replace_is_noop_when_indexed() {
        let t = table();
        t.add_snippets(&[snippet("a.py", Language::Python, "x")], &[vec![1.0]])
            .await
            .unwrap();
        t.build_index(true).await.unwrap();
        t.add_snippets(&[snippet("b.py", Language::Python, "y")], &[vec![1.0]])
            .await
            .unwrap();
        t.build_index(false).await.unwrap();
        assert_eq!(t.row_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_nearest_ranks_and_filters_language() {
        let t = table();
        t.add_snippets(
            &[
                snippet("a.py", Language::Python, "x"),
                snippet("b.rs", Language::Rust, "y"),
                snippet("c.py", Language::Python, "z"),
            ],
            &[vec![1.0, 0.0], vec![1.0, 0.1], vec![0.0, 1.0]],
        )
        .await
        .unwrap();
        t.build_index(true).await.unwrap();

        let all = t.nearest(&[1.0, 0.0], 10, None).await.unwrap();
        assert!(all[0].snippet.filename.ends_with("a.py"));
        assert!(all[0].score >= all[1].score && all[1].score >= all[2].score);

        let py = t
            .nearest(&[1.0, 0.0], 10, Some(Language::Python))
            .await
            .unwrap();
        assert_eq!(py.len(), 2);
        assert!(py.iter().all(|h| h.snippet.language == Language::Python));

        let limited = t.nearest(&[1.0, 0.0], 1, None).await.unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn test_mismatched_batch_rejected() {
        let t = table();
        let err = t
            .add_snippets(&[snippet("a.py", Language::Python, "x")], &[])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("vectors"));
    }

    #[tokio::test]
    async fn test_store_returns_same_table() {
        let store = InMemoryTableStore::new();
        let key = RepoKey::new("alice", "demo");
        let a = store.open_table(&key).await.unwrap();
        a.add_snippets(&[snippet("a.py", Language::Python, "x")], &[vec![1.0]])
            .await
            .unwrap();
        a.build_index(true).await.unwrap();
        let b = store.open_table(&key).await.unwrap();
        assert_eq!(b.row_count().await.unwrap(), 1);
    }
}
