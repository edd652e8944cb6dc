//! Directory scan, the slow but always-correct way to find snapshots.
//!
//! Only metadata files are read. Directories that are not named like a
//! snapshot are ignored; snapshot directories without usable metadata
//! (for example an interrupted write) are skipped with a warning.

use std::cmp::Reverse;
use std::io;

use tracing::warn;
use walkdir::WalkDir;

use super::metadata::SnapshotMetadata;
use super::SnapshotStore;
use crate::error::{Result, StoreError};
use crate::snapshot::parse_snapshot_id;

impl SnapshotStore {
    /// Successful snapshots, newest first.
    pub fn list_successful_snapshots(&self) -> Result<Vec<SnapshotMetadata>> {
        self.scan_metadata(SnapshotMetadata::is_success)
    }

    /// Every committed snapshot regardless of status, newest first.
    pub fn list_snapshots(&self) -> Result<Vec<SnapshotMetadata>> {
        self.scan_metadata(|_| true)
    }

    /// Names of directories that look like snapshots, newest first. Includes
    /// directories whose write never completed.
    pub(crate) fn snapshot_dir_ids(&self) -> Result<Vec<String>> {
        if !self.snapshots_root.is_dir() {
            return Ok(Vec::new());
        }

        let mut ids = Vec::new();
        let walker = WalkDir::new(&self.snapshots_root)
            .min_depth(1)
            .max_depth(1)
            .follow_links(false);

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) if e.depth() == 0 => {
                    return Err(StoreError::io(&self.snapshots_root, io::Error::from(e)));
                }
                Err(e) => {
                    warn!("skipping unreadable store entry: {e}");
                    continue;
                }
            };

            if !entry.file_type().is_dir() {
                continue;
            }
            let Some(name) = entry.file_name().to_str() else {
                continue;
            };
            if parse_snapshot_id(name).is_some() {
                ids.push(name.to_string());
            }
        }

        // ids are zero-padded dates, so string order is chronological
        ids.sort_unstable_by(|a, b| b.cmp(a));
        Ok(ids)
    }

    fn scan_metadata(&self, keep: impl Fn(&SnapshotMetadata) -> bool) -> Result<Vec<SnapshotMetadata>> {
        let mut found = Vec::new();

        for snapshot_id in self.snapshot_dir_ids()? {
            match self.read_metadata(&snapshot_id) {
                Ok(Some(metadata)) if metadata.snapshot_id != snapshot_id => {
                    warn!(
                        snapshot = %snapshot_id,
                        claims = %metadata.snapshot_id,
                        "metadata names a different snapshot, skipping"
                    );
                }
                Ok(Some(metadata)) => {
                    if keep(&metadata) {
                        found.push(metadata);
                    }
                }
                Ok(None) => {
                    warn!(snapshot = %snapshot_id, "snapshot directory has no metadata, skipping");
                }
                Err(e) => {
                    warn!(snapshot = %snapshot_id, "unreadable metadata, skipping: {e}");
                }
            }
        }

        found.sort_by_key(|m| Reverse(m.snapshot_id.clone()));
        Ok(found)
    }
}
