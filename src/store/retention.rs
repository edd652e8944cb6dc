//! Retention pruner.
//!
//! Deletes snapshots beyond the configured count or age:
//! - Dry run mode: reports what would be deleted
//! - Execute mode: deletes directories, one failure does not stop the rest
//!
//! The snapshot named by the pointer, and the snapshot a lookup would
//! resolve to right now, are never deleted. Stale temp files left behind by
//! interrupted writes are swept in execute mode.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::Path;
use std::time::{Duration, SystemTime};

use chrono::{NaiveDate, Utc};
use tracing::{info, warn};
use walkdir::WalkDir;

use super::fsio::is_temp_file_name;
use super::pointer::read_pointer;
use super::SnapshotStore;
use crate::snapshot::parse_snapshot_id;

/// Temp files younger than this may belong to a write in progress.
const STALE_TEMP_AGE: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PruneMode {
    DryRun,
    Execute,
}

#[derive(Debug, Default)]
pub struct PruneResult {
    /// Snapshot ids deleted, or that would be in a dry run.
    pub deleted: Vec<String>,
    pub errors: Vec<String>,
    /// Snapshot ids kept regardless of limits.
    pub protected: Vec<String>,
    pub temp_files_removed: usize,
}

impl SnapshotStore {
    pub fn prune(&self, mode: PruneMode) -> PruneResult {
        self.prune_at(Utc::now().date_naive(), mode)
    }

    /// Prune with ages measured from `today`.
    pub fn prune_at(&self, today: NaiveDate, mode: PruneMode) -> PruneResult {
        let mut result = PruneResult::default();

        // read the raw pointer before resolving, resolution may repair it
        let mut protected = BTreeSet::new();
        if let Ok(pointer) = read_pointer(&self.pointer_path()) {
            protected.insert(pointer.snapshot_id);
        }
        match self.latest_successful_id() {
            Ok(Some(latest)) => {
                protected.insert(latest);
            }
            Ok(None) => {}
            Err(e) => result.errors.push(format!("could not resolve latest snapshot: {e}")),
        }
        result.protected = protected.iter().cloned().collect();

        let ids = match self.snapshot_dir_ids() {
            Ok(ids) => ids,
            Err(e) => {
                result.errors.push(format!("could not list snapshots: {e}"));
                return result;
            }
        };

        let doomed = select_for_deletion(&ids, today, self.max_snapshots, self.max_age_days, &protected);

        match mode {
            PruneMode::DryRun => {
                result.deleted = doomed;
            }
            PruneMode::Execute => {
                self.delete_snapshots(doomed, &mut result, |dir| fs::remove_dir_all(dir));
                result.temp_files_removed = self.sweep_stale_temps(&mut result.errors);
            }
        }

        result
    }

    /// Deletes each doomed snapshot directory, recording failures and moving
    /// on to the next one.
    fn delete_snapshots<F>(&self, doomed: Vec<String>, result: &mut PruneResult, remove: F)
    where
        F: Fn(&Path) -> io::Result<()>,
    {
        for snapshot_id in doomed {
            let dir = self.snapshot_dir(&snapshot_id);
            match remove(&dir) {
                Ok(()) => {
                    info!(snapshot = %snapshot_id, "pruned snapshot");
                    result.deleted.push(snapshot_id);
                }
                Err(e) => {
                    warn!(snapshot = %snapshot_id, "failed to prune snapshot: {e}");
                    result.errors.push(format!("failed to delete {}: {e}", dir.display()));
                }
            }
        }
    }

    fn sweep_stale_temps(&self, errors: &mut Vec<String>) -> usize {
        if !self.snapshots_root.is_dir() {
            return 0;
        }

        let now = SystemTime::now();
        let mut removed = 0;

        // root/<id>/<file> plus the pointer's temp files directly in root
        for entry in WalkDir::new(&self.snapshots_root)
            .min_depth(1)
            .max_depth(2)
            .follow_links(false)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_file() {
                continue;
            }
            let is_temp = entry.file_name().to_str().map(is_temp_file_name).unwrap_or(false);
            if !is_temp {
                continue;
            }

            let stale = entry
                .metadata()
                .ok()
                .and_then(|m| m.modified().ok())
                .and_then(|modified| now.duration_since(modified).ok())
                .map(|age| age > STALE_TEMP_AGE)
                .unwrap_or(false);

            if stale {
                match fs::remove_file(entry.path()) {
                    Ok(()) => removed += 1,
                    Err(e) => errors.push(format!(
                        "failed to delete temp file {}: {e}",
                        entry.path().display()
                    )),
                }
            }
        }

        removed
    }
}

/// Picks snapshots to delete from `ids_newest_first`: everything past the
/// count limit plus everything older than the age limit, minus protected ids.
pub(crate) fn select_for_deletion(
    ids_newest_first: &[String],
    today: NaiveDate,
    max_snapshots: Option<usize>,
    max_age_days: Option<u32>,
    protected: &BTreeSet<String>,
) -> Vec<String> {
    ids_newest_first
        .iter()
        .enumerate()
        .filter(|(index, id)| {
            let over_count = max_snapshots.is_some_and(|max| *index >= max);
            let too_old = match (max_age_days, parse_snapshot_id(id)) {
                (Some(max_days), Some(date)) => (today - date).num_days() > i64::from(max_days),
                _ => false,
            };
            (over_count || too_old) && !protected.contains(*id)
        })
        .map(|(_, id)| id.clone())
        .collect()
}
