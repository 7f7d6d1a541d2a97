//! Transfer layer: the capability that moves bytes from a URL to disk.
//!
//! The job controller never talks HTTP itself. It calls [`Transfer::start`],
//! samples [`TransferProgress::fraction`] on a timer, and awaits the
//! [`TransferCompletion`]. [`HttpTransfer`] is the production implementation;
//! tests plug in scripted transfers.
//!
//! # Example
//!
//! ```no_run
//! use dlkeeper::transfer::{HttpTransfer, HttpTransferSettings, Transfer};
//! use std::path::Path;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let transfer = HttpTransfer::new(HttpTransferSettings::default())?;
//! let handle = transfer.start("https://example.com/clip.mp4", Path::new("./downloads/1"));
//! let output = handle.wait().await?;
//! println!("saved {} bytes to {}", output.bytes, output.path.display());
//! # Ok(())
//! # }
//! ```

mod error;
mod filename;
mod http;

pub use error::TransferError;
pub use filename::{filename_from_url, parse_content_disposition, sanitize_filename};
pub use http::{HttpTransfer, HttpTransferSettings};

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

use tokio::task::JoinHandle;

/// Starts transfers. Implementations spawn their own work and return at once.
pub trait Transfer: Send + Sync {
    /// Begins fetching `url` into `dest_dir`.
    ///
    /// Failures (including an unparsable URL) are reported through the
    /// returned handle, never by panicking here.
    fn start(&self, url: &str, dest_dir: &Path) -> TransferHandle;
}

/// A finished transfer's artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOutput {
    /// Path of the produced file.
    pub path: PathBuf,
    /// File size in bytes.
    pub bytes: u64,
}

/// Shared byte counters for one in-flight transfer.
///
/// Cloning shares the counters; the transfer task writes, the controller reads.
#[derive(Debug, Clone, Default)]
pub struct TransferProgress {
    inner: Arc<ProgressCounters>,
}

#[derive(Debug, Default)]
struct ProgressCounters {
    bytes: AtomicU64,
    /// Zero means unknown.
    total: AtomicU64,
}

impl TransferProgress {
    /// Creates counters at zero with an unknown total.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the expected total size.
    pub fn set_total(&self, total: Option<u64>) {
        self.inner.total.store(total.unwrap_or(0), Ordering::Relaxed);
    }

    /// Sets the bytes received so far (used when resuming).
    pub fn set_bytes(&self, bytes: u64) {
        self.inner.bytes.store(bytes, Ordering::Relaxed);
    }

    /// Adds newly received bytes.
    pub fn add_bytes(&self, bytes: u64) {
        self.inner.bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Bytes received so far.
    #[must_use]
    pub fn bytes(&self) -> u64 {
        self.inner.bytes.load(Ordering::Relaxed)
    }

    /// Fraction complete in `[0, 1]`; `0.0` while the total is unknown.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn fraction(&self) -> f64 {
        let total = self.inner.total.load(Ordering::Relaxed);
        if total == 0 {
            return 0.0;
        }
        (self.bytes() as f64 / total as f64).clamp(0.0, 1.0)
    }

    /// `floor(100 × fraction)` as a whole percentage.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn percent(&self) -> i64 {
        (self.fraction() * 100.0).floor() as i64
    }
}

/// Future resolving to the transfer's final result.
#[derive(Debug)]
pub struct TransferCompletion {
    task: JoinHandle<Result<TransferOutput, TransferError>>,
}

impl TransferCompletion {
    /// Stops the underlying task; the completion then resolves to `Aborted`.
    pub fn abort(&self) {
        self.task.abort();
    }
}

impl Future for TransferCompletion {
    type Output = Result<TransferOutput, TransferError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.task).poll(cx).map(|joined| match joined {
            Ok(result) => result,
            Err(join_error) if join_error.is_cancelled() => {
                Err(TransferError::aborted("transfer task cancelled"))
            }
            Err(join_error) => Err(TransferError::aborted(format!(
                "transfer task panicked: {join_error}"
            ))),
        })
    }
}

/// Handle to one started transfer.
#[derive(Debug)]
pub struct TransferHandle {
    progress: TransferProgress,
    completion: TransferCompletion,
}

impl TransferHandle {
    /// Spawns `work` on the tokio runtime and tracks it with `progress`.
    pub fn spawn<F>(progress: TransferProgress, work: F) -> Self
    where
        F: Future<Output = Result<TransferOutput, TransferError>> + Send + 'static,
    {
        Self {
            progress,
            completion: TransferCompletion {
                task: tokio::spawn(work),
            },
        }
    }

    /// A handle that has already failed, for errors detected before any I/O.
    #[must_use]
    pub fn failed(error: TransferError) -> Self {
        Self::spawn(TransferProgress::new(), async move { Err(error) })
    }

    /// Current fraction complete in `[0, 1]`.
    #[must_use]
    pub fn progress_fraction(&self) -> f64 {
        self.progress.fraction()
    }

    /// Splits into the progress counters and the completion future, so both
    /// can be used from one `select!` loop.
    #[must_use]
    pub fn into_parts(self) -> (TransferProgress, TransferCompletion) {
        (self.progress, self.completion)
    }

    /// Waits for the transfer to finish.
    ///
    /// # Errors
    ///
    /// Returns the transfer's own error, or [`TransferError::Aborted`] if the
    /// task was cancelled or panicked.
    pub async fn wait(self) -> Result<TransferOutput, TransferError> {
        self.completion.await
    }
}
