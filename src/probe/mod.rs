//! Media metadata probing for finished downloads.
//!
//! Probing is advisory. The controller logs a [`ProbeError`] and stores the
//! job without metadata; it never fails a job over it.

mod ffprobe;

pub use ffprobe::{DEFAULT_FFPROBE_PROGRAM, FfprobeProber, parse_ffprobe_output};

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;

/// Metadata extracted from a media file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaInfo {
    /// Container bitrate in bits per second, as reported by the prober.
    pub bitrate: Option<String>,
    /// `"WIDTHxHEIGHT"` of the first video stream.
    pub resolution: Option<String>,
}

/// Errors from a probe run.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// The probe program could not be started.
    #[error("failed to run {program}: {source}")]
    Spawn {
        /// Program that was invoked.
        program: String,
        /// Underlying spawn error.
        #[source]
        source: std::io::Error,
    },

    /// The probe program exited unsuccessfully.
    #[error("{program} exited with {status} for {path}")]
    ExitStatus {
        /// Program that was invoked.
        program: String,
        /// Exit status text.
        status: String,
        /// File that was probed.
        path: PathBuf,
    },

    /// The probe program did not finish in time.
    #[error("{program} timed out after {secs}s")]
    Timeout {
        /// Program that was invoked.
        program: String,
        /// Limit that was exceeded.
        secs: u64,
    },

    /// Output was not the expected JSON.
    #[error("unparsable probe output: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Extracts [`MediaInfo`] from a local file.
#[async_trait]
pub trait Prober: Send + Sync {
    /// Probes the file at `path`.
    async fn probe(&self, path: &Path) -> Result<MediaInfo, ProbeError>;
}

/// Prober that reports no metadata. Used when probing is disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopProber;

#[async_trait]
impl Prober for NoopProber {
    async fn probe(&self, _path: &Path) -> Result<MediaInfo, ProbeError> {
        Ok(MediaInfo::default())
    }
}
