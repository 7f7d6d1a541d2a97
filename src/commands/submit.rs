//! Submit command handler: record a job and, unless detached, follow it.

use std::io::{self, IsTerminal};
use std::sync::Arc;
use std::sync::atomic::Ordering;

use anyhow::{Context, Result};
use dlkeeper::{ControllerError, JobOutcome, ServiceError, WorkerError};

use crate::ProcessExit;
use crate::app::AppContext;
use crate::app::progress::{is_dumb_terminal, should_use_progress_bar, spawn_job_progress};
use crate::cli::SubmitArgs;

pub(crate) async fn run_submit_command(
    ctx: &AppContext,
    args: &SubmitArgs,
    quiet: bool,
) -> Result<ProcessExit> {
    if args.detach {
        return match ctx.service.enqueue(&args.url, &args.digest).await {
            Ok(id) => {
                println!("{id}");
                Ok(ProcessExit::Success)
            }
            Err(e) => report_rejection(e),
        };
    }

    let handle = match ctx.service.submit_tracked(&args.url, &args.digest).await {
        Ok(handle) => handle,
        Err(e) => return report_rejection(e),
    };
    let job_id = handle.job_id();
    ctx.cancel_on_ctrl_c();

    let use_bar = should_use_progress_bar(io::stderr().is_terminal(), quiet, is_dumb_terminal());
    let (bar_handle, bar_stop) = spawn_job_progress(
        use_bar,
        Arc::clone(&ctx.store),
        job_id,
        ctx.settings.max_attempts,
    );

    let result = handle.join().await;

    bar_stop.store(true, Ordering::SeqCst);
    if let Some(bar_handle) = bar_handle {
        let _ = bar_handle.await;
    }

    match result {
        Ok(JobOutcome::Succeeded) => {
            let job = ctx.store.get(job_id).await?;
            println!("job {job_id} succeeded: {}", job.url);
            if let Some(resolution) = job.resolution.as_deref() {
                println!("  resolution: {resolution}");
            }
            if let Some(bitrate) = job.bitrate.as_deref() {
                println!("  bitrate: {bitrate}");
            }
            Ok(ProcessExit::Success)
        }
        Ok(JobOutcome::Failed) => {
            let job = ctx.store.get(job_id).await?;
            eprintln!(
                "job {job_id} failed after {} attempts: {}",
                job.attempts,
                job.error_text().unwrap_or("unknown error")
            );
            Ok(ProcessExit::Failure)
        }
        Err(WorkerError::Controller(ControllerError::Cancelled(_))) => {
            eprintln!("job {job_id} interrupted; `dlkeeper run` will resume it");
            Ok(ProcessExit::Interrupted)
        }
        Err(WorkerError::Controller(ControllerError::Claimed(_))) => {
            println!("job {job_id} is being run by another dlkeeper process");
            Ok(ProcessExit::Success)
        }
        Err(e) => Err(e).with_context(|| format!("Worker for job {job_id} stopped")),
    }
}

fn report_rejection(error: ServiceError) -> Result<ProcessExit> {
    match error {
        ServiceError::Duplicate { existing_id } => {
            eprintln!("duplicate: job {existing_id} already tracks this URL and digest");
            Ok(ProcessExit::Failure)
        }
        other => Err(other.into()),
    }
}
