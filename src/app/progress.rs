//! Progress bar that follows one job while `submit` waits for it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use dlkeeper::JobStore;
use indicatif::{ProgressBar, ProgressStyle};

const POLL_INTERVAL: Duration = Duration::from_millis(250);

pub(crate) fn is_dumb_terminal() -> bool {
    std::env::var("TERM")
        .map(|value| value.eq_ignore_ascii_case("dumb"))
        .unwrap_or(false)
}

pub(crate) fn should_use_progress_bar(
    stderr_is_terminal: bool,
    quiet: bool,
    dumb_terminal: bool,
) -> bool {
    stderr_is_terminal && !quiet && !dumb_terminal
}

/// Spawns the progress bar when requested.
/// Returns (handle, stop) so the caller can signal stop and await the handle.
/// When `use_bar` is false, returns (None, stop) with stop already true.
pub(crate) fn spawn_job_progress(
    use_bar: bool,
    store: Arc<JobStore>,
    job_id: i64,
    max_attempts: i64,
) -> (Option<tokio::task::JoinHandle<()>>, Arc<AtomicBool>) {
    if !use_bar {
        return (None, Arc::new(AtomicBool::new(true)));
    }
    let stop = Arc::new(AtomicBool::new(false));
    let handle = spawn_bar_inner(store, job_id, max_attempts, Arc::clone(&stop));
    (Some(handle), stop)
}

fn spawn_bar_inner(
    store: Arc<JobStore>,
    job_id: i64,
    max_attempts: i64,
    stop: Arc<AtomicBool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let bar = ProgressBar::new(100);
        bar.set_style(
            ProgressStyle::with_template("{spinner} job {prefix} [{bar:30}] {pos:>3}% {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );
        bar.set_prefix(job_id.to_string());
        bar.enable_steady_tick(Duration::from_millis(100));

        while !stop.load(Ordering::SeqCst) {
            if let Ok(job) = store.get(job_id).await {
                bar.set_position(u64::try_from(job.progress.clamp(0, 100)).unwrap_or(0));
                let attempt = (job.attempts + 1).min(max_attempts);
                bar.set_message(format!("attempt {attempt}/{max_attempts}"));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }

        bar.finish_and_clear();
    })
}
