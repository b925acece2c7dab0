//! Database initialization: schema migrations and connection pragmas.

use sqlx::sqlite::{SqliteConnection, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use tracing::{debug, info};

/// Milliseconds a writer waits on a locked database before giving up.
const BUSY_TIMEOUT_MS: u32 = 5000;
const MAX_CONNECTIONS: u32 = 5;

/// Open (creating if needed) the ledger database, apply pragmas to every
/// connection, and run the embedded schema.
pub async fn init_db(db_path: &str) -> Result<SqlitePool, sqlx::Error> {
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .after_connect(|conn, _meta| Box::pin(async move { configure_pragmas_conn(conn).await }))
        .connect(&format!("sqlite:{}?mode=rwc", db_path))
        .await?;

    run_migrations(&pool).await?;

    info!(path = %db_path, "ledger database ready");
    Ok(pool)
}

/// Apply `schema.sql`. Every statement is `IF NOT EXISTS`, so re-running is harmless.
async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    let schema_sql = include_str!("schema.sql");

    let mut applied = 0usize;
    for statement in schema_sql.split(';') {
        let trimmed = statement.trim();
        if trimmed.is_empty() {
            continue;
        }
        sqlx::query(trimmed).execute(pool).await?;
        applied += 1;
    }

    info!(statements = applied, "schema migrations applied");
    Ok(())
}

async fn configure_pragmas_conn(conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
    use sqlx::Row;

    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(&mut *conn)
        .await?;

    // journal_mode reports the mode actually in effect
    let row = sqlx::query("PRAGMA journal_mode = WAL")
        .fetch_one(&mut *conn)
        .await?;
    let journal_mode: String = row.get(0);

    sqlx::query(&format!("PRAGMA busy_timeout = {}", BUSY_TIMEOUT_MS))
        .execute(&mut *conn)
        .await?;
    sqlx::query("PRAGMA synchronous = NORMAL")
        .execute(&mut *conn)
        .await?;

    debug!(journal_mode = %journal_mode, "sqlite connection configured");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_init_db_creates_database() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir
            .path()
            .join("test.db")
            .to_string_lossy()
            .to_string();

        let pool = init_db(&db_path).await.expect("init_db failed");
        assert!(Path::new(&db_path).exists());

        let result: (i64,) = sqlx::query_as("SELECT 1")
            .fetch_one(&pool)
            .await
            .expect("query failed");
        assert_eq!(result.0, 1);
    }

    #[tokio::test]
    async fn test_migrations_create_tables() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir
            .path()
            .join("test.db")
            .to_string_lossy()
            .to_string();
        let pool = init_db(&db_path).await.expect("init_db failed");

        for table in [
            "orders",
            "order_items",
            "commercial_terms",
            "incentive_configs",
            "incentive_grants",
            "spend_samples",
            "credit_entries",
            "credit_balances",
            "quarantine",
        ] {
            let result: Option<(String,)> =
                sqlx::query_as("SELECT name FROM sqlite_master WHERE type='table' AND name = ?")
                    .bind(table)
                    .fetch_optional(&pool)
                    .await
                    .expect("query failed");
            assert!(result.is_some(), "missing table {}", table);
        }
    }

    #[tokio::test]
    async fn test_migrations_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir
            .path()
            .join("test.db")
            .to_string_lossy()
            .to_string();
        let pool = init_db(&db_path).await.expect("init_db failed");

        run_migrations(&pool)
            .await
            .expect("second migration run failed");

        sqlx::query("INSERT INTO quarantine (entity_key, reason, quarantined_at_ms) VALUES ('user:a', 'x', 0)")
            .execute(&pool)
            .await
            .expect("insert failed");
        run_migrations(&pool)
            .await
            .expect("third migration run failed");

        let result: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM quarantine")
            .fetch_one(&pool)
            .await
            .expect("query failed");
        assert_eq!(result.0, 1, "re-running migrations must keep existing rows");
    }

    #[tokio::test]
    async fn test_pragmas_configured() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir
            .path()
            .join("test.db")
            .to_string_lossy()
            .to_string();
        let pool = init_db(&db_path).await.expect("init_db failed");

        let result: (i64,) = sqlx::query_as("PRAGMA foreign_keys")
            .fetch_one(&pool)
            .await
            .expect("query failed");
        assert_eq!(result.0, 1);

        let result: (String,) = sqlx::query_as("PRAGMA journal_mode")
            .fetch_one(&pool)
            .await
            .expect("query failed");
        // `journal_mode=WAL` is best-effort; SQLite can fall back depending on environment.
        assert!(
            matches!(result.0.as_str(), "wal" | "delete"),
            "unexpected journal_mode: {}",
            result.0
        );
    }
}
