//! Snapshot writer.
//!
//! Order of operations is what makes a snapshot safe to read concurrently:
//! retire the previous generation's metadata, write district files, then the
//! manifest, then metadata, and only then move the pointer. A crash at any
//! point leaves a directory without success metadata, which readers skip.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::codec::{self, district_id_from_file_name};
use super::fsio::{self, FileStamp};
use super::manifest::{build_manifest, MANIFEST_FILE};
use super::metadata::{build_metadata, METADATA_FILE};
use super::SnapshotStore;
use crate::error::{Result, StoreError};
use crate::snapshot::{validate_district_id, NewSnapshot, SnapshotStatus};

/// What a completed write produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteReceipt {
    pub snapshot_id: String,
    pub status: SnapshotStatus,
    pub created_at: DateTime<Utc>,
    pub districts_written: usize,
    /// Whether the latest-successful pointer now names this snapshot.
    pub pointer_updated: bool,
}

impl SnapshotStore {
    /// Persists `snapshot` completely or returns an error. Writing the same
    /// logical date again replaces the earlier snapshot wholesale.
    pub fn write_snapshot<T: Serialize>(&self, snapshot: &NewSnapshot<T>) -> Result<WriteReceipt> {
        validate_districts(snapshot)?;

        let snapshot_id = snapshot.snapshot_id();
        let dir = self.snapshot_dir(&snapshot_id);

        fs::create_dir_all(&dir).map_err(|e| StoreError::write(&dir, e))?;
        retire_previous_generation(&dir)?;

        let mut written: Vec<(String, FileStamp)> = Vec::with_capacity(snapshot.districts.len());
        for record in &snapshot.districts {
            let stamp = codec::write_district(&dir, record)?;
            debug!(snapshot = %snapshot_id, district = %record.district_id, bytes = stamp.size, "district written");
            written.push((record.district_id.clone(), stamp));
        }

        let created_at = Utc::now();
        let manifest = build_manifest(&snapshot_id, created_at, &written, &snapshot.failed_districts);

        let implied = SnapshotStatus::from_outcome(manifest.successful_districts, manifest.failed_districts);
        if implied != snapshot.status {
            warn!(
                snapshot = %snapshot_id,
                declared = snapshot.status.as_str(),
                implied = implied.as_str(),
                "declared status disagrees with district outcomes, keeping declared"
            );
        }
        fsio::write_json_atomic(&dir.join(MANIFEST_FILE), &manifest)?;

        // metadata last: from here on the directory is a committed snapshot
        let metadata = build_metadata(snapshot, created_at);
        fsio::write_json_atomic(&dir.join(METADATA_FILE), &metadata)?;

        let pointer_updated = if snapshot.status == SnapshotStatus::Success {
            match self.advance_pointer(&snapshot_id) {
                Ok(updated) => updated,
                Err(e) => {
                    warn!(snapshot = %snapshot_id, "snapshot written but pointer update failed: {e}");
                    false
                }
            }
        } else {
            false
        };

        info!(
            snapshot = %snapshot_id,
            status = snapshot.status.as_str(),
            districts = written.len(),
            failed = manifest.failed_districts,
            pointer_updated,
            "snapshot written"
        );

        Ok(WriteReceipt {
            snapshot_id,
            status: snapshot.status,
            created_at,
            districts_written: written.len(),
            pointer_updated,
        })
    }
}

fn validate_districts<T>(snapshot: &NewSnapshot<T>) -> Result<()> {
    let mut seen = HashSet::with_capacity(snapshot.districts.len());
    for record in &snapshot.districts {
        validate_district_id(&record.district_id)?;
        if !seen.insert(record.district_id.as_str()) {
            return Err(StoreError::DuplicateDistrict(record.district_id.clone()));
        }
    }

    snapshot
        .failed_districts
        .iter()
        .chain(&snapshot.configured_districts)
        .try_for_each(|id| validate_district_id(id))
}

/// Makes an existing directory stop counting as a snapshot, then clears
/// the manifest and district files it held so the rewrite cannot inherit
/// any of them.
fn retire_previous_generation(dir: &Path) -> Result<()> {
    for name in [METADATA_FILE, MANIFEST_FILE] {
        let path = dir.join(name);
        fsio::remove_if_exists(&path).map_err(|e| StoreError::write(&path, e))?;
    }

    let entries = fs::read_dir(dir).map_err(|e| StoreError::write(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| StoreError::write(dir, e))?;
        let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
        let name = entry.file_name();
        let is_district_file = name
            .to_str()
            .and_then(district_id_from_file_name)
            .is_some();

        if is_file && is_district_file {
            let path = entry.path();
            fsio::remove_if_exists(&path).map_err(|e| StoreError::write(&path, e))?;
        }
    }

    Ok(())
}
