//! Worker launching and crash recovery.
//!
//! [`JobRunner`] spawns one tokio task per job and remembers which jobs have a
//! live worker, so a job is never driven by two workers in one process.
//! [`RecoverySupervisor`] relaunches every active job at startup; attempt
//! counts continue from what was persisted.

use std::sync::Arc;

use dashmap::DashSet;
use thiserror::Error;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, instrument, warn};

use crate::controller::{ControllerError, JobController, JobOutcome};
use crate::jobs::{JobRepository, StoreError};

/// Failure observed when joining a worker.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// The controller returned an error.
    #[error(transparent)]
    Controller(#[from] ControllerError),

    /// The worker task panicked or was aborted.
    #[error("worker task failed: {0}")]
    Join(#[from] JoinError),
}

/// Handle to a spawned job worker.
#[derive(Debug)]
pub struct WorkerHandle {
    job_id: i64,
    handle: JoinHandle<Result<JobOutcome, ControllerError>>,
}

impl WorkerHandle {
    /// Job the worker drives.
    #[must_use]
    pub fn job_id(&self) -> i64 {
        self.job_id
    }

    /// Returns true once the worker task has finished.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Waits for the worker to finish.
    ///
    /// # Errors
    ///
    /// Returns the controller's error, or [`WorkerError::Join`] if the task
    /// panicked.
    pub async fn join(self) -> Result<JobOutcome, WorkerError> {
        Ok(self.handle.await??)
    }
}

/// Removes a job from the running set when its worker ends, including by panic.
struct RunningGuard {
    running: Arc<DashSet<i64>>,
    job_id: i64,
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.running.remove(&self.job_id);
    }
}

/// Spawns job workers, at most one per job.
#[derive(Debug, Clone)]
pub struct JobRunner {
    controller: Arc<JobController>,
    running: Arc<DashSet<i64>>,
}

impl JobRunner {
    /// Creates a runner around `controller`.
    #[must_use]
    pub fn new(controller: JobController) -> Self {
        Self {
            controller: Arc::new(controller),
            running: Arc::new(DashSet::new()),
        }
    }

    /// Spawns a worker for `job_id` unless one is already live.
    ///
    /// Returns `None` when the job already has a worker. Never waits for the
    /// worker.
    pub fn launch(&self, job_id: i64) -> Option<WorkerHandle> {
        if !self.running.insert(job_id) {
            debug!(job_id, "worker already running, not launching another");
            return None;
        }

        let guard = RunningGuard {
            running: Arc::clone(&self.running),
            job_id,
        };
        let controller = Arc::clone(&self.controller);
        let handle = tokio::spawn(async move {
            let _guard = guard;
            let result = controller.run_job(job_id).await;
            match &result {
                Ok(outcome) => info!(job_id, ?outcome, "worker finished"),
                Err(ControllerError::Cancelled(_)) => info!(job_id, "worker cancelled"),
                Err(ControllerError::Claimed(_)) => info!(job_id, "job owned by another worker"),
                Err(e @ ControllerError::RetryLimitReached { .. }) => {
                    warn!(job_id, error = %e, "worker found job exhausted");
                }
                Err(e) => error!(job_id, error = %e, "worker stopped, job left for recovery"),
            }
            result
        });

        Some(WorkerHandle { job_id, handle })
    }

    /// Returns true while a worker for `job_id` is live.
    #[must_use]
    pub fn is_running(&self, job_id: i64) -> bool {
        self.running.contains(&job_id)
    }

    /// Number of live workers.
    #[must_use]
    pub fn running_count(&self) -> usize {
        self.running.len()
    }

    /// Controller shared by every worker.
    #[must_use]
    pub fn controller(&self) -> &JobController {
        &self.controller
    }
}

/// Relaunches unfinished jobs after a restart.
#[derive(Clone)]
pub struct RecoverySupervisor {
    store: Arc<dyn JobRepository>,
    runner: JobRunner,
}

impl std::fmt::Debug for RecoverySupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoverySupervisor")
            .field("runner", &self.runner)
            .finish_non_exhaustive()
    }
}

impl RecoverySupervisor {
    /// Creates a supervisor reading from `store` and launching through `runner`.
    pub fn new(store: Arc<dyn JobRepository>, runner: JobRunner) -> Self {
        Self { store, runner }
    }

    /// Launches a worker for every active job without one.
    ///
    /// Terminal jobs are skipped, as are jobs whose worker is still live, so
    /// calling this twice launches nothing new the second time.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the job list cannot be read.
    #[instrument(skip(self))]
    pub async fn recover_all(&self) -> Result<Vec<WorkerHandle>, StoreError> {
        let jobs = self.store.list_all().await?;
        let handles: Vec<WorkerHandle> = jobs
            .iter()
            .filter(|job| job.is_active())
            .filter_map(|job| self.runner.launch(job.id))
            .collect();

        info!(
            scanned = jobs.len(),
            launched = handles.len(),
            "recovery complete"
        );
        Ok(handles)
    }
}
