//! `ffprobe` subprocess wrapper.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, instrument};

use super::{MediaInfo, ProbeError, Prober};

/// Program name looked up on `PATH` when none is configured.
pub const DEFAULT_FFPROBE_PROGRAM: &str = "ffprobe";

const PROBE_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    format: Option<FfprobeFormat>,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    #[serde(default)]
    bit_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    #[serde(default)]
    width: Option<u32>,
    #[serde(default)]
    height: Option<u32>,
}

/// Runs `ffprobe -show_format -show_streams -print_format json` on a file.
#[derive(Debug, Clone)]
pub struct FfprobeProber {
    program: PathBuf,
}

impl FfprobeProber {
    /// Creates a prober invoking `program`.
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn program_name(&self) -> String {
        self.program.display().to_string()
    }
}

impl Default for FfprobeProber {
    fn default() -> Self {
        Self::new(DEFAULT_FFPROBE_PROGRAM)
    }
}

#[async_trait]
impl Prober for FfprobeProber {
    #[instrument(skip(self), fields(path = %path.display()))]
    async fn probe(&self, path: &Path) -> Result<MediaInfo, ProbeError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(["-v", "quiet", "-print_format", "json", "-show_format", "-show_streams"])
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let output = tokio::time::timeout(Duration::from_secs(PROBE_TIMEOUT_SECS), cmd.output())
            .await
            .map_err(|_| ProbeError::Timeout {
                program: self.program_name(),
                secs: PROBE_TIMEOUT_SECS,
            })?
            .map_err(|source| ProbeError::Spawn {
                program: self.program_name(),
                source,
            })?;

        if !output.status.success() {
            return Err(ProbeError::ExitStatus {
                program: self.program_name(),
                status: output.status.to_string(),
                path: path.to_path_buf(),
            });
        }

        let info = parse_ffprobe_output(&output.stdout)?;
        debug!(bitrate = ?info.bitrate, resolution = ?info.resolution, "probe complete");
        Ok(info)
    }
}

/// Parses `ffprobe` JSON into [`MediaInfo`].
///
/// The resolution comes from the first stream reporting a non-zero picture
/// size, so audio-first containers still yield the video's dimensions. Files
/// with no such stream keep their bitrate and get no resolution.
///
/// # Errors
///
/// Returns [`ProbeError::Parse`] for malformed JSON.
pub fn parse_ffprobe_output(stdout: &[u8]) -> Result<MediaInfo, ProbeError> {
    let parsed: FfprobeOutput = serde_json::from_slice(stdout)?;

    let resolution = parsed
        .streams
        .iter()
        .find_map(|stream| match (stream.width, stream.height) {
            (Some(w), Some(h)) if w > 0 && h > 0 => Some(format!("{w}x{h}")),
            _ => None,
        });

    let bitrate = parsed
        .format
        .and_then(|format| format.bit_rate)
        .filter(|rate| !rate.is_empty() && rate != "N/A");

    Ok(MediaInfo {
        bitrate,
        resolution,
    })
}
