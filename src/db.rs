//! Database connection management and embedded schema.

use anyhow::Context as _;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

/// SQLite connection bundle.
pub struct Db {
    pub pool: SqlitePool,
}

impl Db {
    /// Connect to (or create) the database at the given path.
    ///
    /// Enables WAL mode, configures a small pool, and runs the embedded
    /// schema migrations.
    pub async fn connect(path: &Path) -> crate::Result<Self> {
        let url = format!("sqlite:{}?mode=rwc", path.display());
        let options = SqliteConnectOptions::from_str(&url)
            .with_context(|| format!("invalid database path: {}", path.display()))?
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(5))
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .with_context(|| "failed to connect to SQLite")?;

        Self::run_migrations(&pool).await?;

        Ok(Self { pool })
    }

    /// Run the embedded schema. Uses raw SQL with `IF NOT EXISTS` so
    /// re-running on every startup is safe.
    async fn run_migrations(pool: &SqlitePool) -> crate::Result<()> {
        sqlx::raw_sql(SCHEMA_V1)
            .execute(pool)
            .await
            .with_context(|| "failed to run database migrations")?;
        Ok(())
    }

    /// Close the connection pool gracefully.
    pub async fn close(self) {
        self.pool.close().await;
    }

    /// In-memory database for tests. Single connection so concurrent test
    /// tasks serialize on the one shared database.
    #[cfg(test)]
    pub(crate) async fn connect_in_memory() -> Self {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .expect("in-memory sqlite options should parse");
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .expect("in-memory sqlite should connect");
        Self::run_migrations(&pool)
            .await
            .expect("schema should apply to in-memory database");
        Self { pool }
    }
}

impl std::fmt::Debug for Db {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Db").finish_non_exhaustive()
    }
}

/// Embedded schema v1.
const SCHEMA_V1: &str = r#"
-- Verified chat-to-student bindings. Both sides are unique: a chat holds at
-- most one identity and an identity belongs to at most one chat.
CREATE TABLE IF NOT EXISTS verifications (
    chat_id INTEGER PRIMARY KEY,
    email TEXT NOT NULL UNIQUE,
    verified INTEGER NOT NULL DEFAULT 1,
    created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);

-- Append-only conversation log. The AUTOINCREMENT id is the total order
-- within a chat; seq carries the transport message id for pairing.
CREATE TABLE IF NOT EXISTS conversation_turns (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    chat_id INTEGER NOT NULL,
    seq INTEGER NOT NULL,
    role TEXT NOT NULL,
    content TEXT NOT NULL,
    created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE INDEX IF NOT EXISTS idx_conversation_turns_chat
    ON conversation_turns (chat_id, id);
"#;
