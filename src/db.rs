//! SQLite pool for the job table.
//!
//! Opening a [`Database`] creates the file if needed, switches every pooled
//! connection to WAL with a busy timeout, and applies the embedded migrations
//! that define the `files` table. Status readers then never block workers.
//!
//! # Example
//!
//! ```no_run
//! use dlkeeper::Database;
//! use std::path::Path;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let db = Database::new(Path::new("dlkeeper.db")).await?;
//! // Hand db to a JobStore...
//! # Ok(())
//! # }
//! ```

use std::path::Path;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use thiserror::Error;
use tracing::instrument;

/// Pool size used unless configured otherwise. SQLite serializes writers.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// How long a writer waits on a locked database before `SQLITE_BUSY`.
pub const DEFAULT_BUSY_TIMEOUT_MS: u32 = 5000;

/// Failures while opening or inspecting the job database.
#[derive(Error, Debug)]
pub enum DbError {
    /// The pool could not be opened or a bootstrap query failed.
    #[error("job database unavailable: {0}")]
    Connection(#[from] sqlx::Error),

    /// The embedded schema could not be applied.
    #[error("job schema migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Pool tuning applied when opening a file-backed database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatabaseOptions {
    /// Maximum pooled connections.
    pub max_connections: u32,
    /// `PRAGMA busy_timeout` in milliseconds.
    pub busy_timeout_ms: u32,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
        }
    }
}

/// Shared handle to the job database.
///
/// Cloning is cheap; every clone shares the same pool. Workers for different
/// jobs each hold a clone and write their own rows.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens (or creates) the database at `db_path` with default options.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Connection` if the connection fails,
    /// or `DbError::Migration` if migrations fail.
    pub async fn new(db_path: &Path) -> Result<Self, DbError> {
        Self::new_with_options(db_path, &DatabaseOptions::default()).await
    }

    /// Opens (or creates) the database at `db_path` and migrates it.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Connection` if the connection fails,
    /// or `DbError::Migration` if migrations fail.
    #[instrument(skip(db_path, options), fields(path = %db_path.display()))]
    pub async fn new_with_options(
        db_path: &Path,
        options: &DatabaseOptions,
    ) -> Result<Self, DbError> {
        // Per-connection options: every pooled connection gets WAL and the timeout.
        let connect_options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_millis(u64::from(options.busy_timeout_ms)));

        let pool = SqlitePoolOptions::new()
            .max_connections(options.max_connections.max(1))
            .connect_with(connect_options)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    /// A private in-memory database, used by tests.
    ///
    /// Single connection: each in-memory connection is its own database.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Connection` if the connection fails,
    /// or `DbError::Migration` if migrations fail.
    #[instrument]
    pub async fn new_in_memory() -> Result<Self, DbError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    /// The underlying pool.
    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Whether the journal mode reported by SQLite is WAL.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Connection` if the query fails.
    #[instrument(skip(self))]
    pub async fn is_wal_enabled(&self) -> Result<bool, DbError> {
        let result: (String,) = sqlx::query_as("PRAGMA journal_mode")
            .fetch_one(&self.pool)
            .await?;

        Ok(result.0.eq_ignore_ascii_case("wal"))
    }

    /// Waits for in-flight queries, then closes every connection.
    #[instrument(skip(self))]
    pub async fn close(self) {
        self.pool.close().await;
    }
}
