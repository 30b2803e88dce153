//! SQLite database connection for the broker.
//!
//! One database file holds projects, their connections, sessions, and the
//! per-session transcripts. Writes are awaited before returning, so a commit
//! that has returned is on disk (WAL) even if the process dies right after.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

/// Schema for the broker database.
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS projects (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    status TEXT NOT NULL CHECK(status IN ('action_required', 'waiting')),
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS connections (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
    type TEXT NOT NULL CHECK(type IN ('claude_code_cli', 'agent_sdk')),
    name TEXT NOT NULL,
    working_dir TEXT,
    system_prompt TEXT
);

CREATE INDEX IF NOT EXISTS idx_connections_project ON connections(project_id);

-- connection_id is a weak reference: deleting a connection leaves its
-- sessions dangling, and the orchestrator reports those as not-found.
CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY,
    connection_id TEXT NOT NULL,
    status TEXT NOT NULL CHECK(status IN ('active', 'completed')),
    cli_session_id TEXT,
    last_activity INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS messages (
    id TEXT PRIMARY KEY,
    session_id TEXT NOT NULL,
    role TEXT NOT NULL CHECK(role IN ('user', 'assistant')),
    content TEXT NOT NULL,
    timestamp INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_messages_session ON messages(session_id, timestamp);
"#;

/// Broker database connection.
#[derive(Debug, Clone)]
pub struct Db {
    pool: SqlitePool,
    path: PathBuf,
}

impl Db {
    /// Open or create the database, initializing the schema.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating data directory: {}", parent.display()))?;
        }

        let database_url = format!("sqlite://{}?mode=rwc", path.display());

        let options = SqliteConnectOptions::from_str(&database_url)
            .context("parsing database URL")?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .with_context(|| format!("connecting to database: {}", path.display()))?;

        let db = Self {
            pool,
            path: path.to_path_buf(),
        };
        db.initialize_schema().await?;

        Ok(db)
    }

    async fn initialize_schema(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .context("initializing database schema")?;
        Ok(())
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Get the database file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if the database is healthy.
    pub async fn is_healthy(&self) -> bool {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_create_and_open() {
        let temp = TempDir::new().unwrap();
        let db_path = temp.path().join("ops.db");

        let db = Db::open(&db_path).await.unwrap();
        assert!(db.is_healthy().await);
        assert!(db_path.exists());
        assert_eq!(db.path(), db_path);
    }

    #[tokio::test]
    async fn test_reopen_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let db_path = temp.path().join("ops.db");

        let db = Db::open(&db_path).await.unwrap();
        drop(db);

        let db = Db::open(&db_path).await.unwrap();
        assert!(db.is_healthy().await);
    }
}
