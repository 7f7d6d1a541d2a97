//! Per-job worker: transfer, verify, probe, and retry up to the ceiling.
//!
//! [`JobController::run_job`] drives one job from its persisted state to a
//! terminal write. Each attempt downloads into `work_dir/<job id>/`, samples
//! progress on a fixed tick, digests the finished file, and either records
//! success or counts a failed attempt. Retries run in a bounded loop inside
//! the same task.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use dlkeeper::controller::{ControllerSettings, JobController};
//! use dlkeeper::jobs::JobStore;
//! use dlkeeper::probe::NoopProber;
//! use dlkeeper::transfer::{HttpTransfer, HttpTransferSettings};
//! use dlkeeper::Database;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = JobStore::new(Database::new_in_memory().await?);
//! let id = store.insert("https://example.com/a.mp4", "d41d8cd98f00b204e9800998ecf8427e").await?;
//! let controller = JobController::new(
//!     Arc::new(store),
//!     Arc::new(HttpTransfer::new(HttpTransferSettings::default())?),
//!     Arc::new(NoopProber),
//!     ControllerSettings::new("./downloads"),
//! );
//! let outcome = controller.run_job(id).await?;
//! println!("job {id}: {outcome:?}");
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::checksum::{self, ChecksumError, ExpectedDigest};
use crate::claim::{ClaimError, JobClaim};
use crate::jobs::{Job, JobRepository, StoreError};
use crate::probe::{MediaInfo, Prober};
use crate::transfer::{Transfer, TransferError};

/// Default retry ceiling.
pub const DEFAULT_MAX_ATTEMPTS: i64 = 3;

/// Default interval between progress writes.
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_secs(3);

/// Worker tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerSettings {
    /// Root of the per-job download directories.
    pub work_dir: PathBuf,
    /// Failed attempts allowed before a job is marked failed.
    pub max_attempts: i64,
    /// Progress sampling interval.
    pub progress_interval: Duration,
}

impl ControllerSettings {
    /// Settings with default ceiling and tick under `work_dir`.
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }

    /// Directory a job downloads into.
    #[must_use]
    pub fn job_dir(&self, job_id: i64) -> PathBuf {
        self.work_dir.join(job_id.to_string())
    }

    /// Lock file a worker holds while it drives the job.
    #[must_use]
    pub fn claim_path(&self, job_id: i64) -> PathBuf {
        self.work_dir.join(format!("{job_id}.lock"))
    }
}

/// Terminal result of a worker run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// The file was verified and the success write landed.
    Succeeded,
    /// The retry ceiling was reached and the failure write landed.
    Failed,
}

/// Why a worker could not drive its job to a terminal state.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// No job with this id.
    #[error("job {0} not found")]
    NotFound(i64),

    /// The job already has its terminal write.
    #[error("job {0} is already terminal")]
    AlreadyTerminal(i64),

    /// The job had exhausted its attempts before this run started.
    #[error("job {job_id} already used {attempts} of {max_attempts} attempts")]
    RetryLimitReached {
        /// Job id.
        job_id: i64,
        /// Persisted attempt count.
        attempts: i64,
        /// Configured ceiling.
        max_attempts: i64,
    },

    /// Another worker, possibly in another process, is driving the job.
    #[error("job {0} is already being run by another worker")]
    Claimed(i64),

    /// The job's claim file could not be locked.
    #[error("job {job_id}: {source}")]
    Claim {
        /// Job id.
        job_id: i64,
        /// Lock failure.
        #[source]
        source: ClaimError,
    },

    /// A store write the state machine depends on failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Shutdown was requested while the job was in flight.
    #[error("job {0} cancelled")]
    Cancelled(i64),
}

/// Why one attempt did not produce a verified file.
///
/// The `Display` text is what gets persisted as the job's last error.
#[derive(Debug, Error)]
pub enum AttemptFailure {
    /// The transfer itself failed.
    #[error(transparent)]
    Transfer(#[from] TransferError),

    /// The downloaded bytes do not hash to the expected digest.
    #[error("digest mismatch: expected {expected}, computed {computed}")]
    DigestMismatch {
        /// Expected lowercase hex.
        expected: String,
        /// Computed lowercase hex.
        computed: String,
    },

    /// The downloaded file could not be read back.
    #[error("digest computation failed: {0}")]
    Digest(#[source] ChecksumError),
}

enum AttemptResult {
    Verified(PathBuf),
    Failed(AttemptFailure),
    Cancelled,
}

/// Drives jobs through the lifecycle state machine.
#[derive(Clone)]
pub struct JobController {
    store: Arc<dyn JobRepository>,
    transfer: Arc<dyn Transfer>,
    prober: Arc<dyn Prober>,
    settings: ControllerSettings,
    cancel: Option<CancellationToken>,
}

impl std::fmt::Debug for JobController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobController")
            .field("settings", &self.settings)
            .field("cancellable", &self.cancel.is_some())
            .finish_non_exhaustive()
    }
}

impl JobController {
    /// Creates a controller over the given collaborators.
    pub fn new(
        store: Arc<dyn JobRepository>,
        transfer: Arc<dyn Transfer>,
        prober: Arc<dyn Prober>,
        settings: ControllerSettings,
    ) -> Self {
        Self {
            store,
            transfer,
            prober,
            settings,
            cancel: None,
        }
    }

    /// Stops in-flight transfers when `token` is cancelled.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Worker tuning in effect.
    #[must_use]
    pub fn settings(&self) -> &ControllerSettings {
        &self.settings
    }

    /// The store this controller writes to.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn JobRepository> {
        &self.store
    }

    /// Runs the job until it succeeds or exhausts its attempts.
    ///
    /// # Errors
    ///
    /// - [`ControllerError::NotFound`], [`ControllerError::AlreadyTerminal`],
    ///   or [`ControllerError::RetryLimitReached`] when the job cannot start.
    /// - [`ControllerError::Claimed`] when another worker holds the job's
    ///   claim file; nothing is written.
    /// - [`ControllerError::Store`] when a success or failure write fails; the
    ///   job stays active for the next recovery.
    /// - [`ControllerError::Cancelled`] after a shutdown request.
    #[instrument(skip(self), fields(url = tracing::field::Empty))]
    pub async fn run_job(&self, job_id: i64) -> Result<JobOutcome, ControllerError> {
        let job = self.load(job_id).await?;
        tracing::Span::current().record("url", job.url.as_str());
        if job.state().is_terminal() {
            return Err(ControllerError::AlreadyTerminal(job_id));
        }

        let Some(_claim) = JobClaim::try_acquire(self.settings.claim_path(job_id))
            .map_err(|source| ControllerError::Claim { job_id, source })?
        else {
            info!(job_id, "job is claimed by another worker, skipping");
            return Err(ControllerError::Claimed(job_id));
        };

        // The previous holder may have moved the row on before releasing.
        let job = self.load(job_id).await?;
        if job.state().is_terminal() {
            return Err(ControllerError::AlreadyTerminal(job_id));
        }

        let max_attempts = self.settings.max_attempts;
        if job.attempts >= max_attempts {
            // A crash between the last failed attempt and the terminal write
            // leaves the job here; finish it so recovery stops picking it up.
            warn!(job_id, attempts = job.attempts, "attempts exhausted before start, marking failed");
            self.store.mark_terminal_failure(job_id).await?;
            return Err(ControllerError::RetryLimitReached {
                job_id,
                attempts: job.attempts,
                max_attempts,
            });
        }

        let expected = match ExpectedDigest::parse(&job.expected_digest) {
            Ok(expected) => expected,
            Err(e) => {
                warn!(job_id, error = %e, "stored digest is unusable, failing job");
                self.store
                    .record_attempt_failure(job_id, &e.to_string(), max_attempts)
                    .await?;
                self.store.mark_terminal_failure(job_id).await?;
                return Ok(JobOutcome::Failed);
            }
        };

        let mut attempts = job.attempts;
        while attempts < max_attempts {
            let attempt = attempts + 1;
            debug!(job_id, attempt, max_attempts, "starting attempt");

            match self.run_attempt(&job, &expected).await {
                AttemptResult::Verified(path) => {
                    let info = self.probe(job_id, &path).await;
                    self.store
                        .mark_success(job_id, info.bitrate.as_deref(), info.resolution.as_deref())
                        .await?;
                    info!(job_id, attempt, path = %path.display(), "job succeeded");
                    return Ok(JobOutcome::Succeeded);
                }
                AttemptResult::Cancelled => {
                    info!(job_id, attempt, "job cancelled");
                    return Err(ControllerError::Cancelled(job_id));
                }
                AttemptResult::Failed(failure) => {
                    let text = failure.to_string();
                    warn!(job_id, attempt, max_attempts, error = %text, "attempt failed");
                    match self
                        .store
                        .record_attempt_failure(job_id, &text, max_attempts)
                        .await
                    {
                        Ok(count) => attempts = count,
                        Err(StoreError::AttemptsExhausted { attempts: count, .. }) => {
                            warn!(job_id, attempts = count, "attempt counter already at the ceiling");
                            attempts = count;
                            break;
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
            }
        }

        self.store.mark_terminal_failure(job_id).await?;
        warn!(job_id, attempts, "job failed after exhausting attempts");
        Ok(JobOutcome::Failed)
    }

    async fn load(&self, job_id: i64) -> Result<Job, ControllerError> {
        match self.store.get(job_id).await {
            Ok(job) => Ok(job),
            Err(StoreError::NotFound(_)) => Err(ControllerError::NotFound(job_id)),
            Err(e) => Err(e.into()),
        }
    }

    async fn run_attempt(&self, job: &Job, expected: &ExpectedDigest) -> AttemptResult {
        let dest_dir = self.settings.job_dir(job.id);
        let (progress, mut completion) = self.transfer.start(&job.url, &dest_dir).into_parts();

        let interval = self.settings.progress_interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let cancel = self.cancel.clone().unwrap_or_default();

        let result = loop {
            tokio::select! {
                biased;
                result = &mut completion => break result,
                () = cancel.cancelled() => {
                    completion.abort();
                    return AttemptResult::Cancelled;
                }
                _ = ticker.tick() => self.persist_progress(job.id, progress.percent()).await,
            }
        };

        let output = match result {
            Ok(output) => output,
            Err(e) => return AttemptResult::Failed(e.into()),
        };
        self.persist_progress(job.id, 100).await;

        match checksum::digest_file(&output.path, expected.algorithm()).await {
            Ok(computed) if expected.matches(&computed) => AttemptResult::Verified(output.path),
            Ok(computed) => {
                discard_artifact(&output.path).await;
                AttemptResult::Failed(AttemptFailure::DigestMismatch {
                    expected: expected.as_hex().to_string(),
                    computed,
                })
            }
            Err(e) => AttemptResult::Failed(AttemptFailure::Digest(e)),
        }
    }

    async fn persist_progress(&self, job_id: i64, percent: i64) {
        if let Err(e) = self.store.update_progress(job_id, percent).await {
            warn!(job_id, percent, busy = e.is_busy_or_locked(), error = %e, "failed to persist progress");
        }
    }

    async fn probe(&self, job_id: i64, path: &Path) -> MediaInfo {
        match self.prober.probe(path).await {
            Ok(info) => info,
            Err(e) => {
                warn!(job_id, path = %path.display(), error = %e, "probe failed, storing without metadata");
                MediaInfo::default()
            }
        }
    }
}

async fn discard_artifact(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "removed unverified file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "failed to remove unverified file"),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::Database;
    use crate::jobs::JobStore;
    use crate::probe::NoopProber;
    use crate::transfer::{TransferHandle, TransferOutput, TransferProgress};

    const HELLO_MD5: &str = "5d41402abc4b2a76b9719d911017c592";

    /// Writes `body` to `dest_dir/file.bin` on every start.
    struct StaticTransfer {
        body: &'static [u8],
    }

    impl Transfer for StaticTransfer {
        fn start(&self, _url: &str, dest_dir: &Path) -> TransferHandle {
            let body = self.body;
            let dest_dir = dest_dir.to_path_buf();
            TransferHandle::spawn(TransferProgress::new(), async move {
                tokio::fs::create_dir_all(&dest_dir)
                    .await
                    .map_err(|e| TransferError::io(&dest_dir, e))?;
                let path = dest_dir.join("file.bin");
                tokio::fs::write(&path, body)
                    .await
                    .map_err(|e| TransferError::io(&path, e))?;
                Ok(TransferOutput {
                    path,
                    bytes: body.len() as u64,
                })
            })
        }
    }

    async fn setup(body: &'static [u8]) -> (JobStore, JobController, tempfile::TempDir) {
        let store = JobStore::new(Database::new_in_memory().await.unwrap());
        let temp_dir = tempfile::tempdir().unwrap();
        let controller = JobController::new(
            Arc::new(store.clone()),
            Arc::new(StaticTransfer { body }),
            Arc::new(NoopProber),
            ControllerSettings::new(temp_dir.path()),
        );
        (store, controller, temp_dir)
    }

    #[tokio::test]
    async fn test_run_job_missing_is_not_found() {
        let (_store, controller, _dir) = setup(b"hello").await;
        let err = controller.run_job(99).await.unwrap_err();
        assert!(matches!(err, ControllerError::NotFound(99)));
    }

    #[tokio::test]
    async fn test_run_job_verified_file_succeeds() {
        let (store, controller, dir) = setup(b"hello").await;
        let id = store.insert("https://example.com/a", HELLO_MD5).await.unwrap();

        let outcome = controller.run_job(id).await.unwrap();
        assert_eq!(outcome, JobOutcome::Succeeded);

        let job = store.get(id).await.unwrap();
        assert!(job.succeeded);
        assert_eq!(job.progress, 100);
        assert!(dir.path().join(id.to_string()).join("file.bin").exists());
    }

    #[tokio::test]
    async fn test_run_job_terminal_job_is_rejected() {
        let (store, controller, _dir) = setup(b"hello").await;
        let id = store.insert("https://example.com/a", HELLO_MD5).await.unwrap();
        controller.run_job(id).await.unwrap();

        let err = controller.run_job(id).await.unwrap_err();
        assert!(matches!(err, ControllerError::AlreadyTerminal(_)));
    }

    #[tokio::test]
    async fn test_run_job_exhausted_attempts_is_finalized() {
        let (store, controller, _dir) = setup(b"hello").await;
        let id = store.insert("https://example.com/a", HELLO_MD5).await.unwrap();
        for _ in 0..3 {
            store.record_attempt_failure(id, "HTTP 500", 3).await.unwrap();
        }

        let err = controller.run_job(id).await.unwrap_err();
        assert!(matches!(
            err,
            ControllerError::RetryLimitReached { attempts: 3, .. }
        ));
        let job = store.get(id).await.unwrap();
        assert!(!job.is_active());
        assert!(!job.succeeded);
    }

    #[tokio::test]
    async fn test_run_job_mismatch_exhausts_ceiling_and_removes_file() {
        let (store, controller, dir) = setup(b"not hello").await;
        let id = store.insert("https://example.com/a", HELLO_MD5).await.unwrap();

        let outcome = controller.run_job(id).await.unwrap();
        assert_eq!(outcome, JobOutcome::Failed);

        let job = store.get(id).await.unwrap();
        assert_eq!(job.attempts, 3);
        assert!(job.error_text().unwrap().starts_with("digest mismatch"));
        assert!(!dir.path().join(id.to_string()).join("file.bin").exists());
    }

    #[tokio::test]
    async fn test_run_job_backs_off_while_claim_is_held() {
        let (store, controller, _dir) = setup(b"hello").await;
        let id = store.insert("https://example.com/a", HELLO_MD5).await.unwrap();
        let held = JobClaim::try_acquire(controller.settings().claim_path(id))
            .unwrap()
            .unwrap();

        let err = controller.run_job(id).await.unwrap_err();
        assert!(matches!(err, ControllerError::Claimed(job) if job == id));
        let job = store.get(id).await.unwrap();
        assert!(job.is_active());
        assert_eq!(job.attempts, 0);

        drop(held);
        assert_eq!(controller.run_job(id).await.unwrap(), JobOutcome::Succeeded);
    }

    #[test]
    fn test_claim_path_sits_beside_job_dir() {
        let settings = ControllerSettings::new("/tmp/dl");
        assert_eq!(settings.claim_path(7), PathBuf::from("/tmp/dl/7.lock"));
        assert_eq!(settings.job_dir(7), PathBuf::from("/tmp/dl/7"));
    }

    #[test]
    fn test_attempt_failure_text_for_mismatch() {
        let failure = AttemptFailure::DigestMismatch {
            expected: "aa".to_string(),
            computed: "bb".to_string(),
        };
        assert_eq!(failure.to_string(), "digest mismatch: expected aa, computed bb");
    }

    #[test]
    fn test_attempt_failure_transfer_text_is_transparent() {
        let failure = AttemptFailure::from(TransferError::http_status("https://e.com/a", 500));
        assert_eq!(failure.to_string(), "HTTP 500 downloading https://e.com/a");
    }
}
