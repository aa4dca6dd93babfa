//! SQLite-backed [`TableStore`].
//!
//! All repository tables share the `snippets` and `table_state` tables
//! created by [`migrate`](crate::migrate); rows are keyed by the
//! `"owner/repo"` token. Vectors are stored as little-endian `f32` BLOBs
//! and scored in process with cosine similarity.
//!
//! Generation bookkeeping lives in `table_state`:
//!
//! | Column | Meaning |
//! |--------|---------|
//! | `published` | Generation served to readers, `NULL` while untrained |
//! | `staged` | Generation currently receiving rows, if any |
//! | `next_generation` | Counter for the next staged generation |
//! | `model`, `dims` | Embedding model that produced the published vectors |
//!
//! Publishing a generation and deleting older rows happen in one
//! transaction, so a restart never observes a half-replaced index. A
//! published generation only counts while its `model` and `dims` match
//! the running embedder; otherwise the table reads as untrained and the
//! next warm-up rebuilds it.
//!
//! Readers resolve the published generation inside the same statement
//! that reads the rows, so a concurrent publish is never torn.
//!
//! Every row carries the SHA-256 of its text. A retrain reuses the stored
//! vector of any snippet whose text is unchanged.

use anyhow::Result;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use sqlx::{Sqlite, SqlitePool, Transaction};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use snippet_search_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use snippet_search_core::language::Language;
use snippet_search_core::models::{RepoKey, SearchHit, Snippet};
use snippet_search_core::store::{check_batch, sort_hits, SnippetTable, TableStore};

/// Subquery yielding the live published generation. Binds, in order: the
/// repo token, the model name, the dims.
const LIVE_GENERATION: &str =
    "(SELECT published FROM table_state WHERE repo_key = ? AND model = ? AND dims = ?)";

/// Columns of one `table_state` row.
#[derive(Debug, Clone, Default)]
struct Generations {
    published: Option<i64>,
    staged: Option<i64>,
    next_generation: i64,
    model: Option<String>,
    dims: Option<i64>,
}

pub struct SqliteTableStore {
    pool: SqlitePool,
    model: String,
    dims: i64,
    tables: Mutex<HashMap<RepoKey, Arc<SqliteTable>>>,
}

impl SqliteTableStore {
    /// Wrap a pool whose schema has already been migrated. Indexes built
    /// by any other `model`/`dims` pair are treated as untrained.
    pub fn new(pool: SqlitePool, model: impl Into<String>, dims: usize) -> Self {
        Self {
            pool,
            model: model.into(),
            dims: dims as i64,
            tables: Mutex::new(HashMap::new()),
        }
    }

    /// Keys of every table with a live published index, sorted.
    pub async fn trained_keys(&self) -> Result<Vec<RepoKey>> {
        let tokens: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT repo_key FROM table_state
            WHERE published IS NOT NULL AND model = ? AND dims = ?
            ORDER BY repo_key
            "#,
        )
        .bind(&self.model)
        .bind(self.dims)
        .fetch_all(&self.pool)
        .await?;
        Ok(tokens
            .iter()
            .filter_map(|t| RepoKey::from_str(t).ok())
            .collect())
    }
}

#[async_trait]
impl TableStore for SqliteTableStore {
    async fn open_table(&self, key: &RepoKey) -> Result<Arc<dyn SnippetTable>> {
        let mut tables = self
            .tables
            .lock()
            .map_err(|_| anyhow::anyhow!("table map lock poisoned"))?;
        let table = tables
            .entry(key.clone())
            .or_insert_with(|| {
                Arc::new(SqliteTable {
                    key: key.clone(),
                    token: key.token(),
                    pool: self.pool.clone(),
                    model: self.model.clone(),
                    dims: self.dims,
                    write_lock: tokio::sync::Mutex::new(()),
                })
            })
            .clone();
        Ok(table)
    }
}

/// One repository's rows inside the shared SQLite schema.
pub struct SqliteTable {
    key: RepoKey,
    token: String,
    pool: SqlitePool,
    model: String,
    dims: i64,
    /// Serializes generation changes from this process.
    write_lock: tokio::sync::Mutex<()>,
}

impl SqliteTable {
    async fn load_state(&self, tx: &mut Transaction<'_, Sqlite>) -> Result<Generations> {
        let row: Option<(Option<i64>, Option<i64>, i64, Option<String>, Option<i64>)> =
            sqlx::query_as(
                r#"
                SELECT published, staged, next_generation, model, dims
                FROM table_state WHERE repo_key = ?
                "#,
            )
            .bind(&self.token)
            .fetch_optional(&mut **tx)
            .await?;
        Ok(row
            .map(|(published, staged, next_generation, model, dims)| Generations {
                published,
                staged,
                next_generation,
                model,
                dims,
            })
            .unwrap_or_default())
    }

    /// The published generation, if it was built by the running model.
    fn live(&self, state: &Generations) -> Option<i64> {
        let same_model =
            state.model.as_deref() == Some(self.model.as_str()) && state.dims == Some(self.dims);
        state.published.filter(|_| same_model)
    }

    async fn store_state(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        state: &Generations,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO table_state
                (repo_key, published, staged, next_generation, model, dims, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(repo_key) DO UPDATE SET
                published = excluded.published,
                staged = excluded.staged,
                next_generation = excluded.next_generation,
                model = excluded.model,
                dims = excluded.dims,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&self.token)
        .bind(state.published)
        .bind(state.staged)
        .bind(state.next_generation)
        .bind(&state.model)
        .bind(state.dims)
        .bind(chrono::Utc::now().timestamp())
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn delete_generation(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        generation: i64,
    ) -> Result<()> {
        sqlx::query("DELETE FROM snippets WHERE repo_key = ? AND generation = ?")
            .bind(&self.token)
            .bind(generation)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    /// Open a fresh staged generation, dropping any unpublished one.
    async fn stage(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        state: &mut Generations,
    ) -> Result<i64> {
        if let Some(old) = state.staged {
            self.delete_generation(tx, old).await?;
        }
        let generation = state.next_generation;
        state.next_generation += 1;
        state.staged = Some(generation);
        Ok(generation)
    }

    async fn published(&self) -> Result<Option<i64>> {
        let published: Option<Option<i64>> = sqlx::query_scalar(&format!("SELECT {}", LIVE_GENERATION))
            .bind(&self.token)
            .bind(&self.model)
            .bind(self.dims)
            .fetch_optional(&self.pool)
            .await?;
        Ok(published.flatten())
    }
}

fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[async_trait]
impl SnippetTable for SqliteTable {
    fn key(&self) -> &RepoKey {
        &self.key
    }

    async fn begin_generation(&self) -> Result<u64> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        let mut state = self.load_state(&mut tx).await?;
        let generation = self.stage(&mut tx, &mut state).await?;
        self.store_state(&mut tx, &state).await?;
        tx.commit().await?;
        Ok(generation as u64)
    }

    async fn add_snippets(&self, snippets: &[Snippet], vectors: &[Vec<f32>]) -> Result<()> {
        check_batch(snippets, vectors)?;
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        let mut state = self.load_state(&mut tx).await?;
        let generation = match state.staged {
            Some(g) => g,
            None => {
                let g = self.stage(&mut tx, &mut state).await?;
                self.store_state(&mut tx, &state).await?;
                g
            }
        };

        for (snippet, vector) in snippets.iter().zip(vectors) {
            sqlx::query(
                r#"
                INSERT INTO snippets (id, repo_key, generation, filename, language, text, bytes, hash, embedding)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(Uuid::new_v4().to_string())
            .bind(&self.token)
            .bind(generation)
            .bind(&snippet.filename)
            .bind(snippet.language.name())
            .bind(&snippet.text)
            .bind(snippet.bytes as i64)
            .bind(content_hash(&snippet.text))
            .bind(vec_to_blob(vector))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn build_index(&self, replace: bool) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        let mut state = self.load_state(&mut tx).await?;
        let live = self.live(&state);
        if !replace && live.is_some() {
            return Ok(());
        }

        // Rows from another model are never republished under this one.
        let target = match (state.staged, live) {
            (Some(g), _) => g,
            (None, Some(g)) => g,
            (None, None) => self.stage(&mut tx, &mut state).await?,
        };
        state.published = Some(target);
        state.staged = None;
        state.model = Some(self.model.clone());
        state.dims = Some(self.dims);

        sqlx::query("DELETE FROM snippets WHERE repo_key = ? AND generation <> ?")
            .bind(&self.token)
            .bind(target)
            .execute(&mut *tx)
            .await?;
        self.store_state(&mut tx, &state).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn discard_staged(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        let mut state = self.load_state(&mut tx).await?;
        if let Some(g) = state.staged.take() {
            self.delete_generation(&mut tx, g).await?;
            self.store_state(&mut tx, &state).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn has_index(&self) -> Result<bool> {
        Ok(self.published().await?.is_some())
    }

    async fn row_count(&self) -> Result<usize> {
        let sql = format!(
            "SELECT COUNT(*) FROM snippets WHERE repo_key = ? AND generation = {}",
            LIVE_GENERATION
        );
        let count: i64 = sqlx::query_scalar(&sql)
            .bind(&self.token)
            .bind(&self.token)
            .bind(&self.model)
            .bind(self.dims)
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }

    async fn nearest(
        &self,
        query_vec: &[f32],
        limit: usize,
        language: Option<Language>,
    ) -> Result<Vec<SearchHit>> {
        let mut sql = format!(
            "SELECT filename, language, text, bytes, embedding FROM snippets \
             WHERE repo_key = ? AND generation = {}",
            LIVE_GENERATION
        );
        if language.is_some() {
            sql.push_str(" AND language = ?");
        }
        let mut query = sqlx::query_as::<_, (String, String, String, i64, Vec<u8>)>(&sql)
            .bind(&self.token)
            .bind(&self.token)
            .bind(&self.model)
            .bind(self.dims);
        if let Some(lang) = language {
            query = query.bind(lang.name());
        }
        let rows = query.fetch_all(&self.pool).await?;

        let mut hits: Vec<SearchHit> = rows
            .into_iter()
            .filter_map(|(filename, lang, text, bytes, blob)| {
                let language = Language::from_name(&lang)?;
                let score = cosine_similarity(query_vec, &blob_to_vec(&blob)) as f64;
                Some(SearchHit {
                    snippet: Snippet {
                        filename,
                        language,
                        text,
                        bytes: bytes.max(0) as u64,
                    },
                    score,
                })
            })
            .collect();
        sort_hits(&mut hits);
        hits.truncate(limit);
        Ok(hits)
    }

    async fn cached_vectors(&self, snippets: &[Snippet]) -> Result<Vec<Option<Vec<f32>>>> {
        let sql = format!(
            "SELECT embedding FROM snippets WHERE repo_key = ? AND generation = {} AND hash = ? LIMIT 1",
            LIVE_GENERATION
        );
        let mut cached = Vec::with_capacity(snippets.len());
        for snippet in snippets {
            let blob: Option<Vec<u8>> = sqlx::query_scalar(&sql)
                .bind(&self.token)
                .bind(&self.token)
                .bind(&self.model)
                .bind(self.dims)
                .bind(content_hash(&snippet.text))
                .fetch_optional(&self.pool)
                .await?;
            cached.push(
                blob.map(|b| blob_to_vec(&b))
                    .filter(|v| v.len() as i64 == self.dims),
            );
        }
        Ok(cached)
    }
}
