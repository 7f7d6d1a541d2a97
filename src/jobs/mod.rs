//! Job store: durable record of every download job and its state.
//!
//! Every job lives in one row of the `files` table. Each operation here is a
//! single SQL statement keyed by `id`, so workers for different jobs never
//! contend on anything but SQLite's own write lock.
//!
//! # Overview
//!
//! - [`JobStore`] - `SQLite`-backed store
//! - [`JobRepository`] - async seam the controller and facade depend on
//! - [`Job`] / [`JobState`] - row type and its macro-state
//! - [`StoreError`] - operation errors
//!
//! Terminal writes ([`JobStore::mark_success`], [`JobStore::mark_terminal_failure`])
//! and attempt-failure writes only apply while `done_at IS NULL`; a second
//! terminal write returns [`StoreError::AlreadyTerminal`] instead of
//! overwriting the outcome.
//!
//! # Example
//!
//! ```ignore
//! use dlkeeper::{Database, JobStore};
//!
//! let store = JobStore::new(Database::new_in_memory().await?);
//! let id = store.insert("https://example.com/a.mp4", "d41d8cd98f00b204e9800998ecf8427e").await?;
//! store.update_progress(id, 40).await?;
//! ```

mod error;
mod item;
mod repository;

pub use error::{StoreDbErrorKind, StoreError};
pub use item::{Job, JobState};
pub use repository::JobRepository;

use sqlx::Row;
use tracing::instrument;

use crate::db::Database;

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Status view ordering: unfinished and failed jobs first, newest first.
const LIST_ORDER: &str = "ORDER BY ok ASC, created_at DESC, id DESC";

/// `SQLite`-backed job store.
#[derive(Debug, Clone)]
pub struct JobStore {
    db: Database,
}

impl JobStore {
    /// Creates a store over the given database connection.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Returns the underlying database handle.
    #[must_use]
    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Inserts a new active job and returns its id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Duplicate`] if a live job already has the pair,
    /// or [`StoreError::Database`] if the insert fails.
    #[instrument(skip(self), fields(url = %url))]
    pub async fn insert(&self, url: &str, digest: &str) -> Result<i64> {
        let result = sqlx::query(r"INSERT INTO files (url, md5) VALUES (?, ?) RETURNING id")
            .bind(url)
            .bind(digest)
            .fetch_one(self.db.pool())
            .await;

        match result {
            Ok(row) => Ok(row.get("id")),
            Err(sqlx::Error::Database(db_error)) if db_error.is_unique_violation() => {
                Err(StoreError::Duplicate {
                    url: url.to_string(),
                    digest: digest.to_string(),
                })
            }
            Err(other) => Err(other.into()),
        }
    }

    /// Loads a job by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if no row has this id.
    #[instrument(skip(self))]
    pub async fn get(&self, id: i64) -> Result<Job> {
        sqlx::query_as::<_, Job>(r"SELECT * FROM files WHERE id = ?")
            .bind(id)
            .fetch_optional(self.db.pool())
            .await?
            .ok_or(StoreError::NotFound(id))
    }

    /// Finds the newest job whose URL equals `url` or whose digest equals `digest`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn find_by_url_or_digest(&self, url: &str, digest: &str) -> Result<Option<Job>> {
        let job = sqlx::query_as::<_, Job>(
            r"SELECT * FROM files
              WHERE url = ? OR md5 = ?
              ORDER BY created_at DESC, id DESC
              LIMIT 1",
        )
        .bind(url)
        .bind(digest)
        .fetch_optional(self.db.pool())
        .await?;

        Ok(job)
    }

    /// Finds the active or succeeded job owning exactly this `(url, digest)` pair.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn find_live(&self, url: &str, digest: &str) -> Result<Option<Job>> {
        let job = sqlx::query_as::<_, Job>(
            r"SELECT * FROM files
              WHERE url = ? AND md5 = ? AND (done_at IS NULL OR ok = 1)
              LIMIT 1",
        )
        .bind(url)
        .bind(digest)
        .fetch_optional(self.db.pool())
        .await?;

        Ok(job)
    }

    /// Lists every job: not-yet-succeeded first, then newest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn list_all(&self) -> Result<Vec<Job>> {
        let jobs = sqlx::query_as::<_, Job>(&format!("SELECT * FROM files {LIST_ORDER}"))
            .fetch_all(self.db.pool())
            .await?;

        Ok(jobs)
    }

    /// Lists jobs that have not reached a terminal state, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn list_active(&self) -> Result<Vec<Job>> {
        let jobs = sqlx::query_as::<_, Job>(
            r"SELECT * FROM files WHERE done_at IS NULL ORDER BY created_at ASC, id ASC",
        )
        .fetch_all(self.db.pool())
        .await?;

        Ok(jobs)
    }

    /// Stores advisory progress (clamped to 0..=100) for an active job.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] / [`StoreError::AlreadyTerminal`] when
    /// no active row matched, or [`StoreError::Database`] if the update fails.
    #[instrument(level = "debug", skip(self))]
    pub async fn update_progress(&self, id: i64, percent: i64) -> Result<()> {
        let result = sqlx::query(
            r"UPDATE files SET progress = ? WHERE id = ? AND done_at IS NULL",
        )
        .bind(percent.clamp(0, 100))
        .bind(id)
        .execute(self.db.pool())
        .await?;

        self.check_active_write(id, result.rows_affected()).await
    }

    /// Records one failed attempt: resets progress, bumps `tries`, stores the error.
    ///
    /// The write only applies while `tries < max_attempts`, so the counter can
    /// never pass the ceiling. Returns the new attempt count.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::AttemptsExhausted`] when the ceiling was already
    /// reached, [`StoreError::NotFound`] / [`StoreError::AlreadyTerminal`] when
    /// no active row matched, or [`StoreError::Database`] if the update fails.
    #[instrument(skip(self), fields(error = %error))]
    pub async fn record_attempt_failure(
        &self,
        id: i64,
        error: &str,
        max_attempts: i64,
    ) -> Result<i64> {
        let row = sqlx::query(
            r"UPDATE files
              SET progress = 0, tries = tries + 1, error = ?
              WHERE id = ? AND done_at IS NULL AND tries < ?
              RETURNING tries",
        )
        .bind(error)
        .bind(id)
        .bind(max_attempts)
        .fetch_optional(self.db.pool())
        .await?;

        if let Some(row) = row {
            return Ok(row.get("tries"));
        }
        match self.get(id).await {
            Ok(job) if job.completed_at.is_none() => Err(StoreError::AttemptsExhausted {
                id,
                attempts: job.attempts,
            }),
            Ok(_) => Err(StoreError::AlreadyTerminal(id)),
            Err(error) => Err(error),
        }
    }

    /// Marks the job Failed-Terminal.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::AlreadyTerminal`] if the job already completed,
    /// [`StoreError::NotFound`] if it does not exist.
    #[instrument(skip(self))]
    pub async fn mark_terminal_failure(&self, id: i64) -> Result<()> {
        let result = sqlx::query(
            r"UPDATE files
              SET ok = 0, progress = 0, done_at = strftime('%Y-%m-%d %H:%M:%f', 'now')
              WHERE id = ? AND done_at IS NULL",
        )
        .bind(id)
        .execute(self.db.pool())
        .await?;

        self.check_active_write(id, result.rows_affected()).await
    }

    /// Marks the job Succeeded, clears the error and stores probe metadata.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::AlreadyTerminal`] if the job already completed,
    /// [`StoreError::NotFound`] if it does not exist.
    #[instrument(skip(self))]
    pub async fn mark_success(
        &self,
        id: i64,
        bitrate: Option<&str>,
        resolution: Option<&str>,
    ) -> Result<()> {
        let result = sqlx::query(
            r"UPDATE files
              SET ok = 1,
                  progress = 100,
                  error = '',
                  bitrate = ?,
                  resolution = ?,
                  done_at = strftime('%Y-%m-%d %H:%M:%f', 'now')
              WHERE id = ? AND done_at IS NULL",
        )
        .bind(bitrate)
        .bind(resolution)
        .bind(id)
        .execute(self.db.pool())
        .await?;

        self.check_active_write(id, result.rows_affected()).await
    }

    async fn check_active_write(&self, id: i64, rows_affected: u64) -> Result<()> {
        if rows_affected == 0 {
            Err(self.missing_or_terminal(id).await)
        } else {
            Ok(())
        }
    }

    /// Explains why a `done_at IS NULL` guarded write matched nothing.
    async fn missing_or_terminal(&self, id: i64) -> StoreError {
        match self.get(id).await {
            Ok(_) => StoreError::AlreadyTerminal(id),
            Err(error) => error,
        }
    }
}
