//! Content digests for completed downloads.
//!
//! Expected digests arrive as hex strings from callers. [`ExpectedDigest::parse`]
//! normalizes them (trim, optional `md5:`/`sha256:` prefix, lowercase) and
//! picks the algorithm from the hex length. [`digest_file`] streams a file
//! through that algorithm without loading it into memory, and
//! [`ExpectedDigest::matches`] compares the result as exact-length hex.

use std::fmt;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tracing::{debug, instrument};

/// Read buffer size for streaming digests.
const DIGEST_CHUNK_SIZE: usize = 64 * 1024;

/// Errors from digest parsing and computation.
#[derive(Debug, Error)]
pub enum ChecksumError {
    /// The caller-supplied digest is not usable.
    #[error("invalid digest '{value}': {reason}")]
    InvalidDigest {
        /// Raw input.
        value: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// The file could not be read.
    #[error("failed to read {path} for digest: {source}")]
    Io {
        /// File being digested.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

/// Supported digest algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestAlgorithm {
    /// MD5, 32 hex characters. The legacy default.
    Md5,
    /// SHA-256, 64 hex characters.
    Sha256,
}

impl DigestAlgorithm {
    /// Hex length of this algorithm's output.
    #[must_use]
    pub fn hex_len(self) -> usize {
        match self {
            Self::Md5 => 32,
            Self::Sha256 => 64,
        }
    }

    /// Algorithm label, also accepted as an input prefix.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Md5 => "md5",
            Self::Sha256 => "sha256",
        }
    }

    fn from_hex_len(len: usize) -> Option<Self> {
        match len {
            32 => Some(Self::Md5),
            64 => Some(Self::Sha256),
            _ => None,
        }
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated, normalized expected digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedDigest {
    algorithm: DigestAlgorithm,
    hex: String,
}

impl ExpectedDigest {
    /// Parses and normalizes a caller-supplied digest.
    ///
    /// # Errors
    ///
    /// Returns [`ChecksumError::InvalidDigest`] for non-hex input, a length
    /// that matches no supported algorithm, or a prefix that disagrees with
    /// the length.
    pub fn parse(raw: &str) -> Result<Self, ChecksumError> {
        let trimmed = raw.trim();
        let invalid = |reason| ChecksumError::InvalidDigest {
            value: raw.to_string(),
            reason,
        };

        let (prefix, body) = match trimmed.split_once(':') {
            Some((prefix, body)) => (Some(prefix.to_ascii_lowercase()), body.trim()),
            None => (None, trimmed),
        };

        if body.is_empty() {
            return Err(invalid("empty digest"));
        }
        if !body.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(invalid("expected hexadecimal characters"));
        }

        let algorithm = DigestAlgorithm::from_hex_len(body.len())
            .ok_or_else(|| invalid("expected 32 (md5) or 64 (sha256) hex characters"))?;

        if let Some(prefix) = prefix
            && prefix != algorithm.as_str()
        {
            return Err(invalid("algorithm prefix does not match digest length"));
        }

        Ok(Self {
            algorithm,
            hex: body.to_ascii_lowercase(),
        })
    }

    /// Algorithm implied by the digest length.
    #[must_use]
    pub fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    /// Normalized lowercase hex.
    #[must_use]
    pub fn as_hex(&self) -> &str {
        &self.hex
    }

    /// Exact-length hex equality against a computed digest.
    #[must_use]
    pub fn matches(&self, computed: &str) -> bool {
        computed.len() == self.hex.len() && computed.eq_ignore_ascii_case(&self.hex)
    }
}

impl fmt::Display for ExpectedDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.hex)
    }
}

enum Hasher {
    Md5(md5::Context),
    Sha256(Sha256),
}

impl Hasher {
    fn new(algorithm: DigestAlgorithm) -> Self {
        match algorithm {
            DigestAlgorithm::Md5 => Self::Md5(md5::Context::new()),
            DigestAlgorithm::Sha256 => Self::Sha256(Sha256::new()),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            Self::Md5(ctx) => ctx.consume(data),
            Self::Sha256(hasher) => hasher.update(data),
        }
    }

    fn finalize_hex(self) -> String {
        match self {
            Self::Md5(ctx) => format!("{:x}", ctx.compute()),
            Self::Sha256(hasher) => format!("{:x}", hasher.finalize()),
        }
    }
}

/// Digests an in-memory buffer; lowercase hex.
#[must_use]
pub fn digest_bytes(data: &[u8], algorithm: DigestAlgorithm) -> String {
    let mut hasher = Hasher::new(algorithm);
    hasher.update(data);
    hasher.finalize_hex()
}

/// Streams `path` through `algorithm`; lowercase hex.
///
/// # Errors
///
/// Returns [`ChecksumError::Io`] if the file cannot be opened or read.
#[instrument(skip(path), fields(path = %path.display(), %algorithm))]
pub async fn digest_file(path: &Path, algorithm: DigestAlgorithm) -> Result<String, ChecksumError> {
    let io_error = |source| ChecksumError::Io {
        path: path.to_path_buf(),
        source,
    };

    let mut file = tokio::fs::File::open(path).await.map_err(io_error)?;
    let mut hasher = Hasher::new(algorithm);
    let mut buffer = vec![0u8; DIGEST_CHUNK_SIZE];
    let mut total: u64 = 0;

    loop {
        let read = file.read(&mut buffer).await.map_err(io_error)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
        total += read as u64;
    }

    let hex = hasher.finalize_hex();
    debug!(bytes = total, digest = %hex, "digest computed");
    Ok(hex)
}
