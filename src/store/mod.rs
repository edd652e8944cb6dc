//! Filesystem snapshot store.
//!
//! Layout under the cache root:
//! - `snapshots/<YYYY-MM-DD>/entity_<district>.json`, one per district
//! - `snapshots/<YYYY-MM-DD>/manifest.json`
//! - `snapshots/<YYYY-MM-DD>/metadata.json`
//! - `snapshots/latest-successful.json`, the pointer
//!
//! One writer process at a time, any number of readers. Readers never rely
//! on locks; every file is replaced by rename, and metadata is written last
//! so a directory only counts as a snapshot once it is complete.

pub mod codec;
pub mod fsio;
pub mod manifest;
pub mod metadata;
pub mod pointer;
pub mod retention;
pub mod scan;
pub mod writer;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use crate::config::Config;
use crate::error::Result;
use crate::snapshot::{validate_district_id, validate_snapshot_id, DistrictRecord};
use manifest::{EntryStatus, ManifestEntry, ManifestIssue, SnapshotManifest, MANIFEST_FILE};
use metadata::{SnapshotMetadata, METADATA_FILE};

const SNAPSHOTS_DIR: &str = "snapshots";

/// A snapshot as read back from disk.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredSnapshot<T = serde_json::Value> {
    pub metadata: SnapshotMetadata,
    pub manifest: SnapshotManifest,
    pub districts: Vec<DistrictRecord<T>>,
    /// Manifest entries whose files could not be read. Those districts are
    /// left out of `districts`.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<ManifestIssue>,
}

impl<T> StoredSnapshot<T> {
    pub fn snapshot_id(&self) -> &str {
        &self.metadata.snapshot_id
    }
}

/// Counters for how latest-snapshot lookups were resolved.
#[derive(Debug, Default)]
pub(crate) struct StoreStats {
    pointer_hits: AtomicU64,
    fallback_scans: AtomicU64,
    pointer_repairs: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub pointer_hits: u64,
    pub fallback_scans: u64,
    pub pointer_repairs: u64,
}

impl StoreStats {
    fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            pointer_hits: self.pointer_hits.load(Ordering::Relaxed),
            fallback_scans: self.fallback_scans.load(Ordering::Relaxed),
            pointer_repairs: self.pointer_repairs.load(Ordering::Relaxed),
        }
    }
}

/// Handle to one store. Cheap to construct, holds no open files.
#[derive(Debug)]
pub struct SnapshotStore {
    snapshots_root: PathBuf,
    max_snapshots: Option<usize>,
    max_age_days: Option<u32>,
    stats: StoreStats,
}

impl SnapshotStore {
    pub fn new(config: &Config) -> Self {
        SnapshotStore {
            snapshots_root: config.cache_root.join(SNAPSHOTS_DIR),
            max_snapshots: config.max_snapshots,
            max_age_days: config.max_age_days,
            stats: StoreStats::default(),
        }
    }

    /// Store rooted at `cache_root` with default retention.
    pub fn open(cache_root: impl Into<PathBuf>) -> Self {
        Self::new(&Config::new(cache_root.into()))
    }

    pub fn snapshots_root(&self) -> &Path {
        &self.snapshots_root
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub(crate) fn snapshot_dir(&self, snapshot_id: &str) -> PathBuf {
        self.snapshots_root.join(snapshot_id)
    }

    pub fn get_snapshot_metadata(&self, snapshot_id: &str) -> Result<Option<SnapshotMetadata>> {
        validate_snapshot_id(snapshot_id)?;
        self.read_metadata(snapshot_id)
    }

    pub(crate) fn read_metadata(&self, snapshot_id: &str) -> Result<Option<SnapshotMetadata>> {
        fsio::read_json(&self.snapshot_dir(snapshot_id).join(METADATA_FILE))
    }

    pub fn get_snapshot_manifest(&self, snapshot_id: &str) -> Result<Option<SnapshotManifest>> {
        validate_snapshot_id(snapshot_id)?;
        fsio::read_json(&self.snapshot_dir(snapshot_id).join(MANIFEST_FILE))
    }

    /// Loads a complete snapshot. `Ok(None)` when no committed snapshot
    /// exists under `snapshot_id`.
    pub fn get_snapshot<T: DeserializeOwned>(&self, snapshot_id: &str) -> Result<Option<StoredSnapshot<T>>> {
        validate_snapshot_id(snapshot_id)?;
        let Some(metadata) = self.read_metadata(snapshot_id)? else {
            return Ok(None);
        };
        metadata.check_compatibility()?;

        let dir = self.snapshot_dir(snapshot_id);
        let manifest = self.manifest_or_rebuild(&metadata);

        let mut districts = Vec::with_capacity(manifest.successful_districts);
        let mut issues = manifest::missing_files(&dir, &manifest);
        for issue in &issues {
            warn!(
                snapshot = snapshot_id,
                district = %issue.district_id,
                file = %issue.file_name,
                "manifest references a missing district file"
            );
        }

        for entry in manifest.successful_entries() {
            if issues.iter().any(|i| i.district_id == entry.district_id) {
                continue;
            }
            match self.read_entry(&dir, entry) {
                Ok(Some(record)) => districts.push(record),
                Ok(None) => issues.push(issue_for(entry)),
                Err(e) => {
                    warn!(snapshot = snapshot_id, district = %entry.district_id, "skipping unreadable district file: {e}");
                    issues.push(issue_for(entry));
                }
            }
        }

        Ok(Some(StoredSnapshot {
            metadata,
            manifest,
            districts,
            issues,
        }))
    }

    /// One district's record, or `None` if the snapshot or district is unknown.
    pub fn read_district_data<T: DeserializeOwned>(
        &self,
        snapshot_id: &str,
        district_id: &str,
    ) -> Result<Option<DistrictRecord<T>>> {
        validate_snapshot_id(snapshot_id)?;
        validate_district_id(district_id)?;

        let Some(metadata) = self.read_metadata(snapshot_id)? else {
            return Ok(None);
        };
        metadata.check_compatibility()?;

        let manifest = self.manifest_or_rebuild(&metadata);
        let Some(entry) = manifest.entry(district_id).filter(|e| e.status == EntryStatus::Success) else {
            return Ok(None);
        };

        self.read_entry(&self.snapshot_dir(snapshot_id), entry)
    }

    /// District ids with data in the snapshot, in manifest order.
    pub fn list_districts_in_snapshot(&self, snapshot_id: &str) -> Result<Vec<String>> {
        validate_snapshot_id(snapshot_id)?;
        let Some(metadata) = self.read_metadata(snapshot_id)? else {
            return Ok(Vec::new());
        };

        Ok(self
            .manifest_or_rebuild(&metadata)
            .successful_entries()
            .map(|e| e.district_id.clone())
            .collect())
    }

    fn read_entry<T: DeserializeOwned>(&self, dir: &Path, entry: &ManifestEntry) -> Result<Option<DistrictRecord<T>>> {
        codec::read_district_file(dir, &entry.file_name, &entry.district_id)
    }

    /// The on-disk manifest, or one reconstructed from metadata when the
    /// manifest is missing, unreadable or belongs to another snapshot.
    fn manifest_or_rebuild(&self, metadata: &SnapshotMetadata) -> SnapshotManifest {
        let path = self.snapshot_dir(&metadata.snapshot_id).join(MANIFEST_FILE);
        let problem = match fsio::read_json::<SnapshotManifest>(&path) {
            Ok(Some(manifest)) if manifest.snapshot_id == metadata.snapshot_id => {
                if !manifest.counts_consistent() {
                    warn!(snapshot = %metadata.snapshot_id, "manifest counts disagree with its entries");
                }
                return manifest;
            }
            Ok(Some(manifest)) => format!("names snapshot {}", manifest.snapshot_id),
            Ok(None) => "missing".to_string(),
            Err(e) => e.to_string(),
        };

        warn!(snapshot = %metadata.snapshot_id, "manifest unusable ({problem}), rebuilding from metadata");
        rebuild_manifest(metadata)
    }
}

fn issue_for(entry: &ManifestEntry) -> ManifestIssue {
    ManifestIssue {
        district_id: entry.district_id.clone(),
        file_name: entry.file_name.clone(),
    }
}

fn rebuild_manifest(metadata: &SnapshotMetadata) -> SnapshotManifest {
    let written: Vec<(String, fsio::FileStamp)> = metadata
        .successful_districts
        .iter()
        .map(|id| {
            let stamp = fsio::FileStamp {
                size: 0,
                modified: metadata.created_at,
            };
            (id.clone(), stamp)
        })
        .collect();

    manifest::build_manifest(
        &metadata.snapshot_id,
        metadata.created_at,
        &written,
        &metadata.failed_districts,
    )
}
