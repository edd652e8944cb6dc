//! Error taxonomy for the snapshot store.
//!
//! "Not found" is never an error here: lookups return `Ok(None)` or an empty
//! collection. Pointer corruption and manifest inconsistencies are recovered
//! inside the store and only show up in the logs.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem failure while persisting a snapshot or the pointer.
    #[error("write failed for {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Filesystem failure while reading.
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed json in {}: {source}", .path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Well-formed json that does not describe what its location promises.
    #[error("corrupt file {}: {reason}", .path.display())]
    Corrupt { path: PathBuf, reason: String },

    /// The snapshot was written by code with an incompatible major version.
    /// Callers should regenerate rather than reinterpret the data.
    #[error("snapshot {snapshot_id} has {field} {found}, expected {expected}")]
    SchemaVersionMismatch {
        snapshot_id: String,
        field: &'static str,
        found: String,
        expected: String,
    },

    #[error("invalid snapshot id '{0}': expected YYYY-MM-DD")]
    InvalidSnapshotId(String),

    #[error("invalid district id '{0}'")]
    InvalidDistrictId(String),

    #[error("district '{0}' appears more than once in snapshot")]
    DuplicateDistrict(String),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

impl StoreError {
    pub(crate) fn write(path: impl Into<PathBuf>, source: io::Error) -> Self {
        StoreError::Write { path: path.into(), source }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        StoreError::Io { path: path.into(), source }
    }

    pub(crate) fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        StoreError::Json { path: path.into(), source }
    }

    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        StoreError::Corrupt { path: path.into(), reason: reason.into() }
    }

    /// True for failures that happened while persisting.
    pub fn is_write_failure(&self) -> bool {
        matches!(self, StoreError::Write { .. })
    }
}
