//! Cross-process job ownership.
//!
//! A worker holds an exclusive advisory lock on `work_dir/<job id>.lock` for
//! its whole run. The in-process running set only covers one runner; this
//! lock also covers a second `dlkeeper` process pointed at the same database
//! and work dir. The OS releases the lock when the holder exits, so a crashed
//! worker never blocks recovery. Lock files are left in place.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use thiserror::Error;

/// The claim file could not be created or locked.
#[derive(Debug, Error)]
#[error("failed to lock claim file {path}: {source}")]
pub struct ClaimError {
    /// Claim file path.
    pub path: PathBuf,
    /// Underlying I/O failure.
    #[source]
    pub source: io::Error,
}

/// Exclusive ownership of one job, released on drop.
#[derive(Debug)]
pub struct JobClaim {
    file: File,
    path: PathBuf,
}

impl JobClaim {
    /// Takes the lock at `path` without waiting.
    ///
    /// Returns `Ok(None)` when another holder already has it.
    ///
    /// # Errors
    ///
    /// Returns [`ClaimError`] when the file cannot be created or the lock
    /// call fails for a reason other than contention.
    pub fn try_acquire(path: impl AsRef<Path>) -> Result<Option<Self>, ClaimError> {
        let path = path.as_ref().to_path_buf();
        let wrap = |source| ClaimError {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(wrap)?;
        }
        let file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(wrap)?;

        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => {}
            Err(e) if is_contended(&e) => return Ok(None),
            Err(e) => return Err(wrap(e)),
        }
        Ok(Some(Self { file, path }))
    }

    /// Path of the lock file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for JobClaim {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

fn is_contended(error: &io::Error) -> bool {
    error.kind() == io::ErrorKind::WouldBlock
        || error.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}
