use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

/// Create the schema on a fresh connection and close it again.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate_pool(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Idempotent schema setup on an existing pool.
pub async fn migrate_pool(pool: &SqlitePool) -> Result<()> {
    // One row per snippet, tagged with the training generation that wrote it
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS snippets (
            id TEXT PRIMARY KEY,
            repo_key TEXT NOT NULL,
            generation INTEGER NOT NULL,
            filename TEXT NOT NULL,
            language TEXT NOT NULL,
            text TEXT NOT NULL,
            bytes INTEGER NOT NULL,
            hash TEXT NOT NULL,
            embedding BLOB NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Published/staged generation per repository table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS table_state (
            repo_key TEXT PRIMARY KEY,
            published INTEGER,
            staged INTEGER,
            next_generation INTEGER NOT NULL DEFAULT 0,
            model TEXT,
            dims INTEGER,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Databases created before the model columns existed
    add_column_if_missing(pool, "table_state", "model", "TEXT").await?;
    add_column_if_missing(pool, "table_state", "dims", "INTEGER").await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_snippets_repo_generation ON snippets(repo_key, generation)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn add_column_if_missing(
    pool: &SqlitePool,
    table: &str,
    column: &str,
    decl: &str,
) -> Result<()> {
    let present: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM pragma_table_info(?) WHERE name = ?")
            .bind(table)
            .bind(column)
            .fetch_one(pool)
            .await?;
    if present == 0 {
        sqlx::query(&format!("ALTER TABLE {} ADD COLUMN {} {}", table, column, decl))
            .execute(pool)
            .await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_upgrades_state_table_without_model_columns() {
        let tmp = TempDir::new().unwrap();
        let pool = db::open(&tmp.path().join("old.sqlite")).await.unwrap();
        sqlx::query(
            "CREATE TABLE table_state (repo_key TEXT PRIMARY KEY, published INTEGER, \
             staged INTEGER, next_generation INTEGER NOT NULL DEFAULT 0, updated_at INTEGER NOT NULL)",
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query("INSERT INTO table_state VALUES ('alice/demo', 0, NULL, 1, 0)")
            .execute(&pool)
            .await
            .unwrap();

        migrate_pool(&pool).await.unwrap();
        migrate_pool(&pool).await.unwrap();

        let row: (Option<String>, Option<i64>) =
            sqlx::query_as("SELECT model, dims FROM table_state WHERE repo_key = 'alice/demo'")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(row, (None, None));
    }
}
