//! Store error type and SQLite failure classification.

use std::fmt;

use thiserror::Error;

/// What kind of database failure a [`StoreError::Database`] carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreDbErrorKind {
    /// `SQLITE_BUSY` / `SQLITE_LOCKED` from a competing writer.
    BusyOrLocked,
    /// A unique, check, or not-null constraint rejected the write.
    ConstraintViolation,
    /// No pooled connection became free in time.
    PoolTimeout,
    /// The pool was closed underneath the query.
    PoolClosed,
    /// Filesystem or socket failure.
    Io,
    /// Driver protocol error.
    Protocol,
    /// Anything else.
    Other,
}

impl StoreDbErrorKind {
    /// Classifies a sqlx error.
    #[must_use]
    pub fn from_sqlx(error: &sqlx::Error) -> Self {
        let database_error = match error {
            sqlx::Error::PoolTimedOut => return Self::PoolTimeout,
            sqlx::Error::PoolClosed => return Self::PoolClosed,
            sqlx::Error::Io(_) => return Self::Io,
            sqlx::Error::Protocol(_) => return Self::Protocol,
            sqlx::Error::Database(database_error) => database_error,
            _ => return Self::Other,
        };

        // SQLite reports primary result codes as numbers: 5 busy, 6 locked.
        let code = database_error.code();
        let code = code.as_deref().unwrap_or_default();
        if matches!(code, "5" | "6" | "SQLITE_BUSY" | "SQLITE_LOCKED") {
            Self::BusyOrLocked
        } else if database_error.is_unique_violation()
            || database_error.is_check_violation()
            || code.starts_with("SQLITE_CONSTRAINT")
        {
            Self::ConstraintViolation
        } else if database_error
            .message()
            .to_ascii_lowercase()
            .contains("database is locked")
        {
            Self::BusyOrLocked
        } else {
            Self::Other
        }
    }

    /// Snake-case label used in error text and logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BusyOrLocked => "busy_or_locked",
            Self::ConstraintViolation => "constraint_violation",
            Self::PoolTimeout => "pool_timeout",
            Self::PoolClosed => "pool_closed",
            Self::Io => "io",
            Self::Protocol => "protocol",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for StoreDbErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors returned by [`JobStore`](super::JobStore) operations.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The statement failed inside SQLite or the pool.
    #[error("database error ({kind}): {message}")]
    Database {
        /// Classified failure.
        kind: StoreDbErrorKind,
        /// Driver message.
        message: String,
    },

    /// No job row with this id.
    #[error("job not found: id {0}")]
    NotFound(i64),

    /// A live job (active or succeeded) already owns this `(url, digest)` pair.
    #[error("a job for {url} with digest {digest} already exists")]
    Duplicate {
        /// Requested URL.
        url: String,
        /// Requested (normalized) digest.
        digest: String,
    },

    /// The job already reached a terminal state; the write was not applied.
    #[error("job {0} is already terminal")]
    AlreadyTerminal(i64),

    /// The job is active but its attempt counter is already at the ceiling.
    #[error("job {id} already used all {attempts} attempts")]
    AttemptsExhausted {
        /// Job id.
        id: i64,
        /// Persisted attempt count.
        attempts: i64,
    },
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database {
            kind: StoreDbErrorKind::from_sqlx(&err),
            message: err.to_string(),
        }
    }
}

impl StoreError {
    /// The classification, for database failures only.
    #[must_use]
    pub fn database_kind(&self) -> Option<StoreDbErrorKind> {
        if let Self::Database { kind, .. } = self {
            Some(*kind)
        } else {
            None
        }
    }

    /// True when a competing writer held the lock past the busy timeout.
    #[must_use]
    pub fn is_busy_or_locked(&self) -> bool {
        self.database_kind() == Some(StoreDbErrorKind::BusyOrLocked)
    }
}
