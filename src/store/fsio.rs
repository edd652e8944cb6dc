//! Atomic file writes and tolerant json reads.
//!
//! Every document is written to a sibling temp file, fsynced, then renamed
//! over its destination. Readers in any process see either the old file or
//! the new one, never a truncated one.
//!
//! Temp names carry the pid and a per-process sequence number, so writers on
//! different threads never share a temp file.

use std::fs::{self, File};
use std::io::{self, Write as _};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Result, StoreError};

const TEMP_MARKER: &str = ".tmp.";

static TEMP_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Size and mtime of a file right after it was renamed into place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStamp {
    pub size: u64,
    pub modified: DateTime<Utc>,
}

pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<FileStamp> {
    let bytes = serde_json::to_vec_pretty(value).map_err(|e| StoreError::json(path, e))?;
    write_atomic(path, &bytes)
}

pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<FileStamp> {
    let temp_path = temp_path_for(path)?;

    let written = write_temp(&temp_path, bytes).and_then(|()| fs::rename(&temp_path, path));
    if let Err(e) = written {
        // nothing references the temp file, a leftover is only clutter
        let _ = fs::remove_file(&temp_path);
        return Err(StoreError::write(path, e));
    }
    sync_parent_dir(path).map_err(|e| StoreError::write(path, e))?;

    let metadata = fs::metadata(path).map_err(|e| StoreError::write(path, e))?;
    let modified = metadata
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now());

    Ok(FileStamp {
        size: metadata.len(),
        modified,
    })
}

fn write_temp(temp_path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = File::create(temp_path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

/// Makes the rename itself durable.
#[cfg(unix)]
fn sync_parent_dir(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => File::open(parent)?.sync_all(),
        _ => File::open(".")?.sync_all(),
    }
}

#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) -> io::Result<()> {
    Ok(())
}

fn temp_path_for(path: &Path) -> Result<PathBuf> {
    let file_name = path.file_name().and_then(|n| n.to_str()).ok_or_else(|| {
        StoreError::write(
            path,
            io::Error::new(io::ErrorKind::InvalidInput, "destination has no file name"),
        )
    })?;

    let sequence = TEMP_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    Ok(path.with_file_name(format!(
        "{file_name}{TEMP_MARKER}{}.{sequence}",
        std::process::id()
    )))
}

/// Reads and parses a json document. A missing file is `Ok(None)`.
pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StoreError::io(path, e)),
    };

    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| StoreError::json(path, e))
}

/// Removes a file, treating "already gone" as success.
pub(crate) fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

pub(crate) fn is_temp_file_name(name: &str) -> bool {
    name.contains(TEMP_MARKER)
}
