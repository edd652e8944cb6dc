//! The latest-successful pointer.
//!
//! A single small file naming the snapshot readers should use, so the common
//! lookup costs two file reads instead of a directory scan. The pointer is
//! a hint: it is verified against the target's metadata on every read, and
//! any doubt sends the lookup to the fallback scan, which rewrites it.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{fsio, SnapshotStore, StoredSnapshot};
use crate::error::{Result, StoreError};
use crate::snapshot::{is_compatible_version, parse_snapshot_id};

pub const POINTER_FILE: &str = "latest-successful.json";

/// Version of the pointer document itself.
pub const POINTER_SCHEMA_VERSION: &str = "1.0.0";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotPointer {
    pub snapshot_id: String,
    pub updated_at: DateTime<Utc>,
    pub schema_version: String,
}

/// Why the pointer could not be used. Always recovered by a scan.
#[derive(Debug)]
pub(crate) enum PointerError {
    Missing,
    Unreadable(io::Error),
    Corrupt(String),
}

impl std::fmt::Display for PointerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PointerError::Missing => write!(f, "pointer file missing"),
            PointerError::Unreadable(e) => write!(f, "pointer file unreadable: {e}"),
            PointerError::Corrupt(reason) => write!(f, "pointer file corrupt: {reason}"),
        }
    }
}

pub(crate) fn read_pointer(path: &Path) -> std::result::Result<SnapshotPointer, PointerError> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(PointerError::Missing),
        Err(e) => return Err(PointerError::Unreadable(e)),
    };

    let pointer: SnapshotPointer =
        serde_json::from_slice(&bytes).map_err(|e| PointerError::Corrupt(e.to_string()))?;

    if parse_snapshot_id(&pointer.snapshot_id).is_none() {
        return Err(PointerError::Corrupt(format!(
            "'{}' is not a snapshot id",
            pointer.snapshot_id
        )));
    }
    if !is_compatible_version(&pointer.schema_version, POINTER_SCHEMA_VERSION) {
        return Err(PointerError::Corrupt(format!(
            "unsupported pointer schema {}",
            pointer.schema_version
        )));
    }

    Ok(pointer)
}

impl SnapshotStore {
    pub(crate) fn pointer_path(&self) -> PathBuf {
        self.snapshots_root.join(POINTER_FILE)
    }

    /// The raw pointer, unverified. `None` if missing or unusable.
    pub fn read_pointer(&self) -> Option<SnapshotPointer> {
        read_pointer(&self.pointer_path()).ok()
    }

    /// Latest snapshot with status success, or `None` for a store that has
    /// none. Uses the pointer when it checks out, scans otherwise.
    pub fn get_latest_successful<T: DeserializeOwned>(&self) -> Result<Option<StoredSnapshot<T>>> {
        let resolved = self.latest_successful_id()?;
        self.load_latest(resolved)
    }

    /// Loads the resolved id, but only if the metadata read during the load
    /// still says success. The writer may have retired or rewritten that
    /// snapshot since it was resolved; then the newest snapshot that loads
    /// as a success is used instead.
    fn load_latest<T: DeserializeOwned>(&self, resolved: Option<String>) -> Result<Option<StoredSnapshot<T>>> {
        let Some(snapshot_id) = resolved else {
            return Ok(None);
        };
        if let Some(snapshot) = self.load_successful(&snapshot_id)? {
            return Ok(Some(snapshot));
        }

        warn!(snapshot = %snapshot_id, "latest snapshot changed while loading, scanning");
        self.stats.fallback_scans.fetch_add(1, Ordering::Relaxed);
        for candidate in self.list_successful_snapshots()? {
            if let Some(snapshot) = self.load_successful(&candidate.snapshot_id)? {
                self.repair_pointer(&candidate.snapshot_id);
                return Ok(Some(snapshot));
            }
        }

        Ok(None)
    }

    fn load_successful<T: DeserializeOwned>(&self, snapshot_id: &str) -> Result<Option<StoredSnapshot<T>>> {
        Ok(self
            .get_snapshot(snapshot_id)?
            .filter(|snapshot| snapshot.metadata.is_success()))
    }

    /// Resolves only the id of the latest successful snapshot.
    pub fn latest_successful_id(&self) -> Result<Option<String>> {
        if let Some(snapshot_id) = self.verified_pointer_target() {
            self.stats.pointer_hits.fetch_add(1, Ordering::Relaxed);
            debug!(snapshot = %snapshot_id, "resolved latest snapshot from pointer");
            return Ok(Some(snapshot_id));
        }

        self.fallback_latest()
    }

    /// Points the store at `snapshot_id` after checking it exists and
    /// succeeded. Returns `Ok(false)`, leaving the old pointer in place, when
    /// the snapshot does not qualify.
    pub fn update_pointer(&self, snapshot_id: &str) -> Result<bool> {
        if parse_snapshot_id(snapshot_id).is_none() {
            warn!(snapshot = snapshot_id, "refusing to point at malformed snapshot id");
            return Ok(false);
        }

        match self.read_metadata(snapshot_id) {
            Ok(Some(metadata)) if metadata.is_success() => {}
            Ok(Some(metadata)) => {
                warn!(
                    snapshot = snapshot_id,
                    status = metadata.status.as_str(),
                    "refusing to point at unsuccessful snapshot"
                );
                return Ok(false);
            }
            Ok(None) => {
                warn!(snapshot = snapshot_id, "refusing to point at snapshot without metadata");
                return Ok(false);
            }
            Err(e) => {
                warn!(snapshot = snapshot_id, "refusing to point at unverifiable snapshot: {e}");
                return Ok(false);
            }
        }

        let pointer = SnapshotPointer {
            snapshot_id: snapshot_id.to_string(),
            updated_at: Utc::now(),
            schema_version: POINTER_SCHEMA_VERSION.to_string(),
        };

        std::fs::create_dir_all(&self.snapshots_root)
            .map_err(|e| StoreError::write(&self.snapshots_root, e))?;
        fsio::write_json_atomic(&self.pointer_path(), &pointer)?;
        debug!(snapshot = snapshot_id, "pointer updated");
        Ok(true)
    }

    /// Moves the pointer to a freshly written `snapshot_id` unless a newer
    /// successful snapshot is already the latest, so backfilling an older
    /// date leaves the pointer alone. An unusable pointer is rebuilt from a
    /// scan instead of being pointed at the new snapshot blindly.
    pub(crate) fn advance_pointer(&self, snapshot_id: &str) -> Result<bool> {
        let target = match self.verified_pointer_target() {
            Some(current) if current.as_str() > snapshot_id => {
                debug!(snapshot = snapshot_id, latest = %current, "older snapshot written, pointer kept");
                return Ok(false);
            }
            Some(_) => snapshot_id.to_string(),
            None => match self.list_successful_snapshots()?.into_iter().next() {
                Some(latest) => latest.snapshot_id,
                None => snapshot_id.to_string(),
            },
        };

        let updated = self.update_pointer(&target)?;
        Ok(updated && target == snapshot_id)
    }

    fn verified_pointer_target(&self) -> Option<String> {
        let pointer = match read_pointer(&self.pointer_path()) {
            Ok(pointer) => pointer,
            Err(PointerError::Missing) => {
                debug!("no pointer file, scanning");
                return None;
            }
            Err(e) => {
                warn!("{e}, scanning");
                return None;
            }
        };

        match self.read_metadata(&pointer.snapshot_id) {
            Ok(Some(metadata)) if metadata.is_success() => Some(pointer.snapshot_id),
            Ok(Some(metadata)) => {
                warn!(
                    snapshot = %pointer.snapshot_id,
                    status = metadata.status.as_str(),
                    "pointer names an unsuccessful snapshot, scanning"
                );
                None
            }
            Ok(None) => {
                warn!(snapshot = %pointer.snapshot_id, "pointer names a missing snapshot, scanning");
                None
            }
            Err(e) => {
                warn!(snapshot = %pointer.snapshot_id, "pointer target unreadable ({e}), scanning");
                None
            }
        }
    }

    fn fallback_latest(&self) -> Result<Option<String>> {
        self.stats.fallback_scans.fetch_add(1, Ordering::Relaxed);

        let Some(latest) = self.list_successful_snapshots()?.into_iter().next() else {
            debug!("no successful snapshot in store");
            return Ok(None);
        };

        self.repair_pointer(&latest.snapshot_id);
        Ok(Some(latest.snapshot_id))
    }

    /// Rewrites the pointer after a scan so the next lookup, from any
    /// process, takes the fast path. Failures only cost another scan later.
    fn repair_pointer(&self, snapshot_id: &str) {
        match self.update_pointer(snapshot_id) {
            Ok(true) => {
                self.stats.pointer_repairs.fetch_add(1, Ordering::Relaxed);
                info!(snapshot = snapshot_id, "pointer repaired from directory scan");
            }
            Ok(false) => {}
            Err(e) => warn!(snapshot = snapshot_id, "pointer repair failed: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{DistrictRecord, NewSnapshot, SnapshotStatus};
    use chrono::NaiveDate;
    use serde_json::{json, Value};
    use std::fs;
    use tempfile::TempDir;

    fn snapshot(date: &str, status: SnapshotStatus) -> NewSnapshot {
        NewSnapshot {
            data_as_of_date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
            status,
            source: "test".to_string(),
            processing_duration_ms: 1,
            errors: Vec::new(),
            configured_districts: Vec::new(),
            failed_districts: Vec::new(),
            districts: vec![DistrictRecord {
                district_id: "1".to_string(),
                collected_at: "2024-01-01T00:00:00Z".parse().unwrap(),
                data: json!({"asOf": date}),
            }],
        }
    }

    fn write_raw(dir: &Path, contents: &str) -> PathBuf {
        let path = dir.join(POINTER_FILE);
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn valid_pointer_parses() {
        let dir = TempDir::new().unwrap();
        let path = write_raw(
            dir.path(),
            r#"{"snapshotId":"2024-01-15","updatedAt":"2024-01-15T08:00:00Z","schemaVersion":"1.0.0"}"#,
        );

        let pointer = read_pointer(&path).unwrap();
        assert_eq!(pointer.snapshot_id, "2024-01-15");
    }

    #[test]
    fn missing_pointer() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            read_pointer(&dir.path().join(POINTER_FILE)),
            Err(PointerError::Missing)
        ));
    }

    #[test]
    fn corrupt_pointers() {
        let dir = TempDir::new().unwrap();
        let cases = [
            "not json",
            "{}",
            r#"{"snapshotId":42,"updatedAt":"2024-01-15T08:00:00Z","schemaVersion":"1.0.0"}"#,
            r#"{"snapshotId":"../x","updatedAt":"2024-01-15T08:00:00Z","schemaVersion":"1.0.0"}"#,
            r#"{"snapshotId":"2024-01-15","updatedAt":"2024-01-15T08:00:00Z","schemaVersion":"9.0.0"}"#,
        ];

        for contents in cases {
            let path = write_raw(dir.path(), contents);
            assert!(
                matches!(read_pointer(&path), Err(PointerError::Corrupt(_))),
                "accepted {contents}"
            );
        }
    }

    #[test]
    fn update_refuses_missing_snapshot() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::open(dir.path());

        assert!(!store.update_pointer("2024-01-15").unwrap());
        assert!(!store.update_pointer("latest").unwrap());
        assert!(store.read_pointer().is_none());
    }

    #[test]
    fn backfill_keeps_newer_pointer() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::open(dir.path());

        assert!(store.write_snapshot(&snapshot("2024-01-15", SnapshotStatus::Success)).unwrap().pointer_updated);
        let backfill = store.write_snapshot(&snapshot("2024-01-01", SnapshotStatus::Success)).unwrap();

        assert!(!backfill.pointer_updated);
        assert_eq!(store.read_pointer().unwrap().snapshot_id, "2024-01-15");
        assert_eq!(store.latest_successful_id().unwrap().as_deref(), Some("2024-01-15"));
    }

    #[test]
    fn backfill_with_unusable_pointer_points_at_newest() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::open(dir.path());
        store.write_snapshot(&snapshot("2024-01-15", SnapshotStatus::Success)).unwrap();
        write_raw(store.snapshots_root(), "garbage");

        let backfill = store.write_snapshot(&snapshot("2024-01-01", SnapshotStatus::Success)).unwrap();

        assert!(!backfill.pointer_updated);
        assert_eq!(store.read_pointer().unwrap().snapshot_id, "2024-01-15");
    }

    #[test]
    fn rewritten_to_partial_while_loading_is_not_returned() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::open(dir.path());
        store.write_snapshot(&snapshot("2024-01-05", SnapshotStatus::Success)).unwrap();
        store.write_snapshot(&snapshot("2024-01-10", SnapshotStatus::Success)).unwrap();

        // 2024-01-10 was resolved as latest, then rewritten before the load
        store.write_snapshot(&snapshot("2024-01-10", SnapshotStatus::Partial)).unwrap();
        let loaded = store.load_latest::<Value>(Some("2024-01-10".to_string())).unwrap().unwrap();

        assert_eq!(loaded.snapshot_id(), "2024-01-05");
        assert!(loaded.metadata.is_success());
        assert_eq!(store.read_pointer().unwrap().snapshot_id, "2024-01-05");
    }

    #[test]
    fn retired_while_loading_falls_back_to_other_success() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::open(dir.path());
        store.write_snapshot(&snapshot("2024-01-05", SnapshotStatus::Success)).unwrap();
        store.write_snapshot(&snapshot("2024-01-10", SnapshotStatus::Success)).unwrap();

        // a rewrite of 2024-01-10 has retired its metadata but not committed yet
        fs::remove_file(store.snapshot_dir("2024-01-10").join("metadata.json")).unwrap();
        let loaded = store.load_latest::<Value>(Some("2024-01-10".to_string())).unwrap();

        assert_eq!(loaded.map(|s| s.snapshot_id().to_string()).as_deref(), Some("2024-01-05"));
        assert_eq!(store.stats().fallback_scans, 1);
    }

    #[test]
    fn concurrent_repairs_leave_a_valid_pointer() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::open(dir.path());
        store.write_snapshot(&snapshot("2024-01-15", SnapshotStatus::Success)).unwrap();

        std::thread::scope(|scope| {
            let workers: Vec<_> = (0..4)
                .map(|_| {
                    let store = &store;
                    scope.spawn(move || {
                        for _ in 0..100 {
                            write_raw(store.snapshots_root(), "garbage");
                            assert_eq!(store.latest_successful_id().unwrap().as_deref(), Some("2024-01-15"));
                            assert!(store.update_pointer("2024-01-15").unwrap());
                        }
                    })
                })
                .collect();
            for worker in workers {
                worker.join().unwrap();
            }
        });

        assert_eq!(store.read_pointer().unwrap().snapshot_id, "2024-01-15");
        let leftovers = fs::read_dir(store.snapshots_root())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| fsio::is_temp_file_name(&e.file_name().to_string_lossy()))
            .count();
        assert_eq!(leftovers, 0);
    }
}
