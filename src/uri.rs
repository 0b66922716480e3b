//! Conversion between `file://` URIs and filesystem paths.
//!
//! URIs are the workspace key everywhere; paths appear only at the
//! filesystem boundary. Incoming URIs are percent-decoded once, up front, so
//! the same document never shows up under two spellings (Windows clients
//! escape the drive-letter colon).

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use percent_encoding::{AsciiSet, CONTROLS, percent_decode_str, utf8_percent_encode};

/// Bytes escaped when building a `file://` URI out of a path. `/` stays
/// literal; everything else outside the unreserved set is encoded.
const PATH_ENCODE_SET: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'[')
    .add(b']')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

/// Percent-decode a URI as sent by the client. A URI that fails to decode is
/// used as-is: a malformed spelling must not take the session down, the
/// worst case is a miss in the workspace maps.
pub fn decode_uri(raw: &str) -> String {
    match percent_decode_str(raw).decode_utf8() {
        Ok(decoded) => decoded.into_owned(),
        Err(err) => {
            tracing::warn!(uri = raw, %err, "URI is not valid percent-encoded UTF-8, using as-is");
            raw.to_string()
        }
    }
}

/// Convert a `file://` URI to a filesystem path.
///
/// The URI must have the `file` scheme, a non-empty path, and neither query
/// nor fragment; callers treat a violation as an invariant failure.
pub fn uri_to_path(uri: &str) -> Result<PathBuf> {
    let parsed = url::Url::parse(uri).with_context(|| format!("parsing URI {uri:?}"))?;

    if parsed.scheme() != "file" {
        bail!("URI {uri:?} does not use the file scheme");
    }
    if parsed.query().is_some() {
        bail!("file URI {uri:?} carries a query");
    }
    if parsed.fragment().is_some() {
        bail!("file URI {uri:?} carries a fragment");
    }

    let raw_path = parsed.path();
    if raw_path.is_empty() {
        bail!("file URI {uri:?} has an empty path");
    }

    let mut path = decode_uri(raw_path);
    if cfg!(windows) {
        // `file:///C:/...` parses to `/C:/...`; drop the leading slash.
        if path.starts_with('/') && path.as_bytes().get(2) == Some(&b':') {
            path.remove(0);
        }
        path = path.replace('/', "\\");
    }

    Ok(PathBuf::from(path))
}

/// Convert a filesystem path to a `file://` URI.
pub fn path_to_uri(path: &Path) -> String {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    let mut forward = absolute.to_string_lossy().into_owned();
    if cfg!(windows) {
        forward = forward.replace('\\', "/");
        if !forward.starts_with('/') {
            forward.insert(0, '/');
        }
    }
    format!("file://{}", utf8_percent_encode(&forward, PATH_ENCODE_SET))
}
