//! HTTP transfer with streaming writes and byte-range resume.
//!
//! Each job downloads into its own directory, so a file already present there
//! is this job's partial download from an interrupted run. When the server
//! advertises `Accept-Ranges: bytes` the transfer continues from that file's
//! length instead of starting over.

use std::path::{Path, PathBuf};
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::{ACCEPT_RANGES, CONTENT_DISPOSITION, CONTENT_LENGTH, RANGE};
use reqwest::{Client, StatusCode};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::filename::{filename_from_url, parse_content_disposition, sanitize_filename};
use super::{Transfer, TransferError, TransferHandle, TransferOutput, TransferProgress};

/// Default HTTP connect timeout (30 seconds).
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default idle read timeout (5 minutes). Applies between body chunks, not to
/// the whole transfer, so long downloads are not cut off.
pub const DEFAULT_READ_TIMEOUT_SECS: u64 = 300;

/// Client tuning for [`HttpTransfer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpTransferSettings {
    /// TCP/TLS connect timeout in seconds.
    pub connect_timeout_secs: u64,
    /// Idle read timeout in seconds.
    pub read_timeout_secs: u64,
}

impl Default for HttpTransferSettings {
    fn default() -> Self {
        Self {
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            read_timeout_secs: DEFAULT_READ_TIMEOUT_SECS,
        }
    }
}

/// reqwest-backed [`Transfer`].
///
/// Create once and reuse; the inner client pools connections.
#[derive(Debug, Clone)]
pub struct HttpTransfer {
    client: Client,
}

impl HttpTransfer {
    /// Builds the HTTP client.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::Client`] if reqwest cannot build the client
    /// (for example, a broken TLS backend).
    pub fn new(settings: HttpTransferSettings) -> Result<Self, TransferError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(settings.connect_timeout_secs))
            .read_timeout(Duration::from_secs(settings.read_timeout_secs))
            .gzip(true)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(TransferError::Client)?;
        Ok(Self { client })
    }
}

impl Transfer for HttpTransfer {
    fn start(&self, url: &str, dest_dir: &Path) -> TransferHandle {
        let progress = TransferProgress::new();
        let client = self.client.clone();
        let url = url.to_string();
        let dest_dir = dest_dir.to_path_buf();
        let task_progress = progress.clone();
        TransferHandle::spawn(progress, async move {
            fetch(&client, &url, &dest_dir, &task_progress).await
        })
    }
}

#[instrument(skip(client, progress), fields(url = %url, dest = %dest_dir.display()))]
async fn fetch(
    client: &Client,
    url: &str,
    dest_dir: &Path,
    progress: &TransferProgress,
) -> Result<TransferOutput, TransferError> {
    let parsed_url = Url::parse(url).map_err(|_| TransferError::invalid_url(url))?;
    tokio::fs::create_dir_all(dest_dir)
        .await
        .map_err(|e| TransferError::io(dest_dir, e))?;

    let mut partial = find_partial(dest_dir).await;
    if let Some((path, len)) = &partial
        && !supports_ranges(client, url).await
    {
        debug!(path = %path.display(), bytes = len, "server does not accept ranges, restarting");
        remove_quietly(path).await;
        partial = None;
    }

    let mut response = send_get(client, url, partial.as_ref().map(|(_, len)| *len)).await?;
    if response.status() == StatusCode::RANGE_NOT_SATISFIABLE
        && let Some((path, _)) = partial.take()
    {
        // Typically the previous run finished the body but crashed before
        // verification; fetch again from zero.
        debug!(path = %path.display(), "range not satisfiable, restarting");
        remove_quietly(&path).await;
        response = send_get(client, url, None).await?;
    }
    if !response.status().is_success() {
        return Err(TransferError::http_status(url, response.status().as_u16()));
    }

    let resumed = response.status() == StatusCode::PARTIAL_CONTENT && partial.is_some();
    let (file_path, existing_bytes) = match partial {
        Some((path, len)) if resumed => (path, len),
        stale => {
            if let Some((path, _)) = stale {
                remove_quietly(&path).await;
            }
            (dest_dir.join(response_filename(&response, &parsed_url)), 0)
        }
    };

    let total = content_length(&response).map(|len| len.saturating_add(existing_bytes));
    progress.set_total(total);
    progress.set_bytes(existing_bytes);

    let file = if resumed {
        tokio::fs::OpenOptions::new()
            .append(true)
            .open(&file_path)
            .await
    } else {
        File::create(&file_path).await
    }
    .map_err(|e| TransferError::io(file_path.clone(), e))?;

    let written = match stream_to_file(file, response, url, &file_path, progress).await {
        Ok(written) => written,
        Err(error) => {
            if !resumed {
                debug!(path = %file_path.display(), "cleaning up partial file after error");
                remove_quietly(&file_path).await;
            }
            return Err(error);
        }
    };

    let final_size = existing_bytes.saturating_add(written);
    if let Some(expected) = total
        && expected != final_size
    {
        return Err(TransferError::Incomplete {
            path: file_path,
            expected_bytes: expected,
            actual_bytes: final_size,
        });
    }

    info!(path = %file_path.display(), bytes = final_size, resumed, "transfer complete");
    Ok(TransferOutput {
        path: file_path,
        bytes: final_size,
    })
}

async fn send_get(
    client: &Client,
    url: &str,
    resume_from: Option<u64>,
) -> Result<reqwest::Response, TransferError> {
    let mut request = client.get(url);
    if let Some(offset) = resume_from {
        request = request.header(RANGE, format!("bytes={offset}-"));
    }
    request
        .send()
        .await
        .map_err(|e| TransferError::network(url, e))
}

async fn supports_ranges(client: &Client, url: &str) -> bool {
    match client.head(url).send().await {
        Ok(response) => response
            .headers()
            .get(ACCEPT_RANGES)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.eq_ignore_ascii_case("bytes")),
        Err(error) => {
            warn!(url = %url, error = %error, "HEAD request failed, not resuming");
            false
        }
    }
}

/// The single non-empty regular file left in the job directory, if any.
async fn find_partial(dest_dir: &Path) -> Option<(PathBuf, u64)> {
    let mut entries = tokio::fs::read_dir(dest_dir).await.ok()?;
    let mut found = None;
    while let Ok(Some(entry)) = entries.next_entry().await {
        let Ok(meta) = entry.metadata().await else {
            continue;
        };
        if !meta.is_file() || meta.len() == 0 {
            continue;
        }
        if found.is_some() {
            return None;
        }
        found = Some((entry.path(), meta.len()));
    }
    found
}

fn response_filename(response: &reqwest::Response, url: &Url) -> String {
    response
        .headers()
        .get(CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_content_disposition)
        .map_or_else(|| filename_from_url(url), |name| sanitize_filename(&name))
}

fn content_length(response: &reqwest::Response) -> Option<u64> {
    response
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
}

async fn stream_to_file(
    file: File,
    response: reqwest::Response,
    url: &str,
    file_path: &Path,
    progress: &TransferProgress,
) -> Result<u64, TransferError> {
    let mut writer = BufWriter::new(file);
    let mut stream = response.bytes_stream();
    let mut bytes_written: u64 = 0;

    while let Some(chunk_result) = stream.next().await {
        let chunk = chunk_result.map_err(|e| TransferError::network(url, e))?;
        writer
            .write_all(&chunk)
            .await
            .map_err(|e| TransferError::io(file_path, e))?;
        bytes_written += chunk.len() as u64;
        progress.add_bytes(chunk.len() as u64);
    }

    writer
        .flush()
        .await
        .map_err(|e| TransferError::io(file_path, e))?;
    Ok(bytes_written)
}

async fn remove_quietly(path: &Path) {
    if let Err(error) = tokio::fs::remove_file(path).await
        && error.kind() != std::io::ErrorKind::NotFound
    {
        warn!(path = %path.display(), error = %error, "failed to remove stale file");
    }
}
