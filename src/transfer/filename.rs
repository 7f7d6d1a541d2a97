//! Destination filename derivation for transfers.

use std::path::{Component, Path};

use url::Url;

/// Name used when neither headers nor the URL provide one.
pub const FALLBACK_FILENAME: &str = "download.bin";

/// Extracts a filename from a `Content-Disposition` header value.
///
/// Prefers the RFC 5987 `filename*=` form over plain `filename=`.
#[must_use]
pub fn parse_content_disposition(header: &str) -> Option<String> {
    if let Some(pos) = header.find("filename*=") {
        let value = header[pos + 10..].trim();
        // charset'language'encoded_value
        if let Some(quote_pos) = value.find("''") {
            let encoded = &value[quote_pos + 2..];
            let end = encoded.find(';').unwrap_or(encoded.len());
            if let Ok(decoded) = urlencoding::decode(encoded[..end].trim()) {
                return Some(decoded.into_owned()).filter(|name| !name.is_empty());
            }
        }
    }

    let pos = header.find("filename=")?;
    let value = header[pos + 9..].trim();
    let name = if let Some(stripped) = value.strip_prefix('"') {
        &stripped[..stripped.find('"')?]
    } else {
        let end = value.find(';').unwrap_or(value.len());
        value[..end].trim()
    };
    (!name.is_empty()).then(|| name.to_string())
}

/// Replaces path separators, reserved and control characters with `_`.
///
/// Names that would resolve to `.`/`..` have their dots replaced too, so the
/// result always stays inside the destination directory.
#[must_use]
pub fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    if sanitized.is_empty() {
        return FALLBACK_FILENAME.to_string();
    }

    if is_safe_filename_segment(&sanitized) {
        sanitized
    } else {
        sanitized.replace('.', "_")
    }
}

fn is_safe_filename_segment(name: &str) -> bool {
    !Path::new(name).components().any(|component| {
        matches!(
            component,
            Component::CurDir | Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    })
}

/// Filename from the URL's last path segment (percent-decoded), or the fallback.
#[must_use]
pub fn filename_from_url(url: &Url) -> String {
    if let Some(mut segments) = url.path_segments()
        && let Some(last) = segments.next_back()
        && !last.is_empty()
    {
        let decoded = urlencoding::decode(last).map_or_else(|_| last.to_string(), |d| d.into_owned());
        return sanitize_filename(&decoded);
    }
    FALLBACK_FILENAME.to_string()
}
