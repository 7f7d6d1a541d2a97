//! Scripted collaborators for driving the controller without a network.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dlkeeper::checksum::{DigestAlgorithm, digest_bytes};
use dlkeeper::controller::{ControllerSettings, JobController};
use dlkeeper::jobs::{Job, JobRepository, JobStore, StoreDbErrorKind, StoreError};
use dlkeeper::probe::{MediaInfo, ProbeError, Prober};
use dlkeeper::transfer::{
    Transfer, TransferError, TransferHandle, TransferOutput, TransferProgress,
};
use dlkeeper::Database;
use tempfile::TempDir;

/// File name every scripted body is written to.
pub const PAYLOAD_NAME: &str = "payload.bin";

pub fn md5_hex(data: &[u8]) -> String {
    digest_bytes(data, DigestAlgorithm::Md5)
}

/// One scripted transfer outcome.
#[derive(Debug, Clone)]
pub enum Step {
    /// Write the body and succeed.
    Body(Vec<u8>),
    /// Report half the body, wait, then write it all.
    SlowBody { body: Vec<u8>, hold: Duration },
    /// Fail with an HTTP status.
    Fail(u16),
    /// Wait, then fail with an HTTP status.
    SlowFail { status: u16, hold: Duration },
    /// Never complete.
    Hang,
}

/// Plays back [`Step`]s, one per `start` call.
#[derive(Debug, Default)]
pub struct ScriptedTransfer {
    steps: Mutex<VecDeque<Step>>,
    starts: AtomicUsize,
    files_at_start: Mutex<Vec<usize>>,
}

impl ScriptedTransfer {
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into_iter().collect()),
            ..Self::default()
        })
    }

    /// Number of `start` calls so far.
    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    /// Regular files found in the destination directory at each start.
    pub fn files_at_start(&self) -> Vec<usize> {
        self.files_at_start.lock().unwrap().clone()
    }
}

fn count_files(dir: &Path) -> usize {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .filter(|entry| entry.path().is_file())
                .count()
        })
        .unwrap_or(0)
}

async fn write_payload(dest_dir: PathBuf, body: Vec<u8>) -> Result<TransferOutput, TransferError> {
    tokio::fs::create_dir_all(&dest_dir)
        .await
        .map_err(|e| TransferError::io(&dest_dir, e))?;
    let path = dest_dir.join(PAYLOAD_NAME);
    tokio::fs::write(&path, &body)
        .await
        .map_err(|e| TransferError::io(&path, e))?;
    Ok(TransferOutput {
        path,
        bytes: body.len() as u64,
    })
}

impl Transfer for ScriptedTransfer {
    fn start(&self, url: &str, dest_dir: &Path) -> TransferHandle {
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.files_at_start.lock().unwrap().push(count_files(dest_dir));

        let step = self.steps.lock().unwrap().pop_front();
        let dest_dir = dest_dir.to_path_buf();
        let url = url.to_string();
        let progress = TransferProgress::new();
        let task_progress = progress.clone();

        TransferHandle::spawn(progress, async move {
            match step {
                Some(Step::Body(body)) => {
                    task_progress.set_total(Some(body.len() as u64));
                    task_progress.set_bytes(body.len() as u64);
                    write_payload(dest_dir, body).await
                }
                Some(Step::SlowBody { body, hold }) => {
                    task_progress.set_total(Some(body.len() as u64));
                    task_progress.set_bytes(body.len() as u64 / 2);
                    tokio::time::sleep(hold).await;
                    task_progress.set_bytes(body.len() as u64);
                    write_payload(dest_dir, body).await
                }
                Some(Step::Fail(status)) => Err(TransferError::http_status(url, status)),
                Some(Step::SlowFail { status, hold }) => {
                    tokio::time::sleep(hold).await;
                    Err(TransferError::http_status(url, status))
                }
                Some(Step::Hang) => {
                    std::future::pending::<()>().await;
                    Err(TransferError::aborted("unreachable"))
                }
                None => Err(TransferError::aborted("transfer script exhausted")),
            }
        })
    }
}

/// Prober returning a fixed answer.
#[derive(Debug)]
pub struct FixedProber {
    fail: bool,
    calls: AtomicUsize,
}

impl FixedProber {
    pub fn ok() -> Arc<Self> {
        Arc::new(Self {
            fail: false,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Prober for FixedProber {
    async fn probe(&self, path: &Path) -> Result<MediaInfo, ProbeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(ProbeError::ExitStatus {
                program: "ffprobe".to_string(),
                status: "exit status: 1".to_string(),
                path: path.to_path_buf(),
            });
        }
        Ok(MediaInfo {
            bitrate: Some("4500000".to_string()),
            resolution: Some("1920x1080".to_string()),
        })
    }
}

/// Store wrapper that records progress writes and fails chosen operations.
pub struct InstrumentedStore {
    inner: JobStore,
    pub fail_progress: bool,
    pub fail_attempt_failure: bool,
    progress_writes: Mutex<Vec<i64>>,
}

impl InstrumentedStore {
    pub fn new(inner: JobStore) -> Self {
        Self {
            inner,
            fail_progress: false,
            fail_attempt_failure: false,
            progress_writes: Mutex::new(Vec::new()),
        }
    }

    pub fn progress_writes(&self) -> Vec<i64> {
        self.progress_writes.lock().unwrap().clone()
    }
}

fn injected_failure() -> StoreError {
    StoreError::Database {
        kind: StoreDbErrorKind::BusyOrLocked,
        message: "injected failure".to_string(),
    }
}

#[async_trait]
impl JobRepository for InstrumentedStore {
    async fn insert(&self, url: &str, digest: &str) -> Result<i64, StoreError> {
        self.inner.insert(url, digest).await
    }

    async fn get(&self, id: i64) -> Result<Job, StoreError> {
        self.inner.get(id).await
    }

    async fn find_by_url_or_digest(&self, url: &str, digest: &str) -> Result<Option<Job>, StoreError> {
        self.inner.find_by_url_or_digest(url, digest).await
    }

    async fn find_live(&self, url: &str, digest: &str) -> Result<Option<Job>, StoreError> {
        self.inner.find_live(url, digest).await
    }

    async fn list_all(&self) -> Result<Vec<Job>, StoreError> {
        self.inner.list_all().await
    }

    async fn update_progress(&self, id: i64, percent: i64) -> Result<(), StoreError> {
        self.progress_writes.lock().unwrap().push(percent);
        if self.fail_progress {
            return Err(injected_failure());
        }
        self.inner.update_progress(id, percent).await
    }

    async fn record_attempt_failure(
        &self,
        id: i64,
        error: &str,
        max_attempts: i64,
    ) -> Result<i64, StoreError> {
        if self.fail_attempt_failure {
            return Err(injected_failure());
        }
        self.inner.record_attempt_failure(id, error, max_attempts).await
    }

    async fn mark_terminal_failure(&self, id: i64) -> Result<(), StoreError> {
        self.inner.mark_terminal_failure(id).await
    }

    async fn mark_success(
        &self,
        id: i64,
        bitrate: Option<&str>,
        resolution: Option<&str>,
    ) -> Result<(), StoreError> {
        self.inner.mark_success(id, bitrate, resolution).await
    }
}

/// A store, scripted transfer, and controller over a temporary work dir.
pub struct Harness {
    pub store: JobStore,
    pub transfer: Arc<ScriptedTransfer>,
    pub prober: Arc<FixedProber>,
    pub work_dir: TempDir,
}

impl Harness {
    pub async fn new(steps: impl IntoIterator<Item = Step>) -> Self {
        Self {
            store: JobStore::new(Database::new_in_memory().await.unwrap()),
            transfer: ScriptedTransfer::new(steps),
            prober: FixedProber::ok(),
            work_dir: TempDir::new().unwrap(),
        }
    }

    pub fn settings(&self) -> ControllerSettings {
        let mut settings = ControllerSettings::new(self.work_dir.path());
        settings.progress_interval = Duration::from_millis(10);
        settings
    }

    pub fn controller(&self) -> JobController {
        self.controller_with_store(Arc::new(self.store.clone()))
    }

    pub fn controller_with_store(&self, store: Arc<dyn JobRepository>) -> JobController {
        JobController::new(
            store,
            Arc::clone(&self.transfer) as Arc<dyn Transfer>,
            Arc::clone(&self.prober) as Arc<dyn Prober>,
            self.settings(),
        )
    }

    pub fn job_dir(&self, job_id: i64) -> PathBuf {
        self.settings().job_dir(job_id)
    }
}
