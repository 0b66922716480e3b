//! Logging bootstrap.
//!
//! stdout carries the protocol, so logs go to an append-only file under the
//! user cache directory, rotated to empty once it reaches 5 MiB. When no
//! cache directory is usable the fallback sink is stderr — never stdout.

use std::fs::{self, File, OpenOptions};
use std::path::PathBuf;
use std::sync::Mutex;

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::SERVER_NAME;

const LOG_FILE_NAME: &str = "gotmpl-ls.log";

/// Rotation threshold. Hit it and the file is truncated, not archived; the
/// log exists for bug reports, not history.
const LOG_ROTATE_BYTES: u64 = 5 * 1024 * 1024;

fn open_log_file() -> Option<(PathBuf, File)> {
    let dir = dirs::cache_dir()?.join(SERVER_NAME);
    fs::create_dir_all(&dir).ok()?;
    let path = dir.join(LOG_FILE_NAME);

    if let Ok(meta) = fs::metadata(&path)
        && meta.len() >= LOG_ROTATE_BYTES
    {
        // Truncate in place; an open append handle elsewhere is fine.
        let _ = File::create(&path);
    }

    let file = OpenOptions::new().create(true).append(true).open(&path).ok()?;
    Some((path, file))
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber. Call once, before the transport starts.
pub fn init() {
    match open_log_file() {
        Some((path, file)) => {
            tracing_subscriber::registry()
                .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
                .with(env_filter())
                .init();
            tracing::info!(path = %path.display(), "logging initialized");
        }
        None => {
            tracing_subscriber::registry()
                .with(fmt::layer().with_ansi(false).with_writer(std::io::stderr))
                .with(env_filter())
                .init();
            tracing::warn!("no usable cache directory, logging to stderr");
        }
    }
}
