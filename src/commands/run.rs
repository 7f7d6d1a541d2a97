//! Run command handler: resume unfinished jobs and wait for them.

use std::fmt;

use anyhow::{Context, Result};
use dlkeeper::{ControllerError, JobOutcome, WorkerError};
use tracing::{info, warn};

use crate::ProcessExit;
use crate::app::AppContext;

/// Counts of how recovered workers ended.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RunSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub interrupted: usize,
    pub skipped: usize,
    pub errored: usize,
}

impl RunSummary {
    fn record(&mut self, job_id: i64, result: Result<JobOutcome, WorkerError>) {
        match result {
            Ok(JobOutcome::Succeeded) => self.succeeded += 1,
            Ok(JobOutcome::Failed)
            | Err(WorkerError::Controller(ControllerError::RetryLimitReached { .. })) => {
                self.failed += 1;
            }
            Err(WorkerError::Controller(ControllerError::Cancelled(_))) => self.interrupted += 1,
            Err(WorkerError::Controller(
                ControllerError::Claimed(_) | ControllerError::AlreadyTerminal(_),
            )) => {
                info!(job_id, "job handled by another worker");
                self.skipped += 1;
            }
            Err(e) => {
                warn!(job_id, error = %e, "worker ended without a terminal write");
                self.errored += 1;
            }
        }
    }

    fn exit_outcome(&self) -> ProcessExit {
        if self.interrupted > 0 {
            ProcessExit::Interrupted
        } else if self.failed > 0 || self.errored > 0 {
            ProcessExit::Failure
        } else {
            ProcessExit::Success
        }
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} succeeded, {} failed, {} interrupted, {} skipped, {} errored",
            self.succeeded, self.failed, self.interrupted, self.skipped, self.errored
        )
    }
}

pub(crate) async fn run_recovery_command(ctx: &AppContext) -> Result<ProcessExit> {
    ctx.cancel_on_ctrl_c();

    let handles = ctx
        .supervisor
        .recover_all()
        .await
        .context("Failed to list jobs for recovery")?;
    if handles.is_empty() {
        println!("No unfinished jobs.");
        return Ok(ProcessExit::Success);
    }

    info!(workers = handles.len(), "waiting for recovered workers");
    let mut summary = RunSummary::default();
    for handle in handles {
        let job_id = handle.job_id();
        summary.record(job_id, handle.join().await);
    }

    println!("{summary}");
    Ok(summary.exit_outcome())
}
