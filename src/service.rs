//! Submission and status facade.
//!
//! [`JobService`] is what front-ends call: it validates input, rejects
//! duplicates of a live job, inserts the row, and hands the job to the
//! [`JobRunner`] without waiting for it.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, instrument};
use url::Url;

use crate::checksum::{ChecksumError, ExpectedDigest};
use crate::jobs::{Job, JobRepository, StoreError};
use crate::supervisor::{JobRunner, WorkerHandle};

/// Errors surfaced to submitters and status readers.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// A live job already owns this URL and digest.
    #[error("job {existing_id} already tracks this URL and digest")]
    Duplicate {
        /// The live job.
        existing_id: i64,
    },

    /// The digest is not 32 or 64 hex characters.
    #[error(transparent)]
    InvalidDigest(#[from] ChecksumError),

    /// The URL does not parse or is not HTTP(S).
    #[error("invalid URL '{url}': {reason}")]
    InvalidUrl {
        /// Raw input.
        url: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Nothing matched the lookup.
    #[error("no job matches {0}")]
    NotFound(JobLookup),

    /// A worker for the new job was already live.
    #[error("job {0} already has a running worker")]
    AlreadyRunning(i64),

    /// The store failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// How a status query identifies a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobLookup {
    /// By primary key.
    Id(i64),
    /// By source URL or expected digest, newest match first.
    UrlOrDigest(String),
}

impl JobLookup {
    /// Interprets command-line input: all digits is an id, anything else a
    /// URL or digest.
    #[must_use]
    pub fn parse(input: &str) -> Self {
        let trimmed = input.trim();
        if !trimmed.is_empty() && trimmed.bytes().all(|b| b.is_ascii_digit())
            && let Ok(id) = trimmed.parse()
        {
            return Self::Id(id);
        }
        Self::UrlOrDigest(trimmed.to_string())
    }
}

impl fmt::Display for JobLookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "id {id}"),
            Self::UrlOrDigest(key) => write!(f, "'{key}'"),
        }
    }
}

/// Front door for submitting jobs and reading their state.
#[derive(Clone)]
pub struct JobService {
    store: Arc<dyn JobRepository>,
    runner: JobRunner,
}

impl fmt::Debug for JobService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobService")
            .field("runner", &self.runner)
            .finish_non_exhaustive()
    }
}

impl JobService {
    /// Creates a service over `store`, launching workers through `runner`.
    pub fn new(store: Arc<dyn JobRepository>, runner: JobRunner) -> Self {
        Self { store, runner }
    }

    /// Validates, records, and starts a job. Returns its id without waiting.
    ///
    /// # Errors
    ///
    /// See [`JobService::submit_tracked`].
    pub async fn submit(&self, url: &str, digest: &str) -> Result<i64, ServiceError> {
        self.submit_tracked(url, digest)
            .await
            .map(|handle| handle.job_id())
    }

    /// Like [`JobService::submit`], but returns the worker handle so callers
    /// can wait for the terminal state.
    ///
    /// # Errors
    ///
    /// See [`JobService::enqueue`]. Also [`ServiceError::AlreadyRunning`] if
    /// a worker for the new id somehow already exists.
    pub async fn submit_tracked(&self, url: &str, digest: &str) -> Result<WorkerHandle, ServiceError> {
        let id = self.enqueue(url, digest).await?;
        self.runner
            .launch(id)
            .ok_or(ServiceError::AlreadyRunning(id))
    }

    /// Validates and records a job without starting a worker. The next
    /// recovery pass picks it up.
    ///
    /// # Errors
    ///
    /// - [`ServiceError::InvalidDigest`] or [`ServiceError::InvalidUrl`] for
    ///   bad input.
    /// - [`ServiceError::Duplicate`] when an active or succeeded job has the
    ///   same URL and digest.
    /// - [`ServiceError::Store`] if the insert fails.
    #[instrument(skip(self))]
    pub async fn enqueue(&self, url: &str, digest: &str) -> Result<i64, ServiceError> {
        let expected = ExpectedDigest::parse(digest)?;
        let url = validate_url(url)?;

        if let Some(existing) = self.store.find_live(&url, expected.as_hex()).await? {
            return Err(ServiceError::Duplicate {
                existing_id: existing.id,
            });
        }

        let id = match self.store.insert(&url, expected.as_hex()).await {
            Ok(id) => id,
            Err(StoreError::Duplicate { .. }) => {
                // Lost a race with a concurrent submit of the same pair.
                let existing = self.store.find_live(&url, expected.as_hex()).await?;
                return Err(match existing {
                    Some(job) => ServiceError::Duplicate {
                        existing_id: job.id,
                    },
                    None => ServiceError::Store(StoreError::Duplicate {
                        url,
                        digest: expected.as_hex().to_string(),
                    }),
                });
            }
            Err(e) => return Err(e.into()),
        };

        info!(job_id = id, url = %url, algorithm = %expected.algorithm(), "job recorded");
        Ok(id)
    }

    /// Current snapshot of one job.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::NotFound`] when nothing matches.
    pub async fn status(&self, lookup: JobLookup) -> Result<Job, ServiceError> {
        let found = match &lookup {
            JobLookup::Id(id) => match self.store.get(*id).await {
                Ok(job) => Some(job),
                Err(StoreError::NotFound(_)) => None,
                Err(e) => return Err(e.into()),
            },
            JobLookup::UrlOrDigest(key) => {
                let digest_key = ExpectedDigest::parse(key)
                    .map_or_else(|_| key.clone(), |d| d.as_hex().to_string());
                self.store.find_by_url_or_digest(key, &digest_key).await?
            }
        };
        debug!(%lookup, found = found.is_some(), "status lookup");
        found.ok_or(ServiceError::NotFound(lookup))
    }

    /// Every job, unfinished and failed first, then newest first.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Store`] if the query fails.
    pub async fn list_status(&self) -> Result<Vec<Job>, ServiceError> {
        Ok(self.store.list_all().await?)
    }

    /// Runner used for launched workers.
    #[must_use]
    pub fn runner(&self) -> &JobRunner {
        &self.runner
    }
}

fn validate_url(raw: &str) -> Result<String, ServiceError> {
    let trimmed = raw.trim();
    let invalid = |reason: String| ServiceError::InvalidUrl {
        url: raw.to_string(),
        reason,
    };
    let parsed = Url::parse(trimmed).map_err(|e| invalid(e.to_string()))?;
    match parsed.scheme() {
        "http" | "https" => Ok(trimmed.to_string()),
        other => Err(invalid(format!("unsupported scheme '{other}'"))),
    }
}
