//! Terminal tables for snapshot listings.
//!
//! - Snapshot list: one row per snapshot, newest first
//! - Snapshot detail: summary header plus one row per manifest entry

use crate::store::manifest::EntryStatus;
use crate::store::metadata::SnapshotMetadata;
use crate::store::StoredSnapshot;
use crate::util::format_bytes;

pub fn render_list(snapshots: &[SnapshotMetadata], latest: Option<&str>) -> String {
    if snapshots.is_empty() {
        return String::from("No snapshots found.\n");
    }

    let mut output = String::new();
    output.push_str(&format!(
        "{:<12} {:<8} {:>6} {:>6} {:<20}\n",
        "ID", "Status", "OK", "Failed", "Created"
    ));
    output.push_str(&"-".repeat(56));
    output.push('\n');

    for meta in snapshots {
        let marker = if latest == Some(meta.snapshot_id.as_str()) { " *" } else { "" };
        output.push_str(&format!(
            "{:<12} {:<8} {:>6} {:>6} {:<20}{marker}\n",
            meta.snapshot_id,
            meta.status.as_str(),
            meta.successful_districts.len(),
            meta.failed_districts.len(),
            meta.created_at.format("%Y-%m-%d %H:%M:%S"),
        ));
    }

    output
}

pub fn render_snapshot<T>(snapshot: &StoredSnapshot<T>) -> String {
    let meta = &snapshot.metadata;
    let mut output = String::new();

    output.push_str(&format!("snapshot:    {}\n", meta.snapshot_id));
    output.push_str(&format!("status:      {}\n", meta.status.as_str()));
    output.push_str(&format!("created:     {}\n", meta.created_at.format("%Y-%m-%d %H:%M:%S")));
    output.push_str(&format!("source:      {}\n", meta.source));
    output.push_str(&format!("versions:    schema {} / calculation {}\n", meta.schema_version, meta.calculation_version));
    output.push_str(&format!(
        "districts:   {} ok, {} failed of {}\n",
        meta.successful_districts.len(),
        meta.failed_districts.len(),
        meta.configured_districts.len()
    ));
    output.push_str(&format!("duration:    {:.2}s\n", meta.processing_duration_ms as f64 / 1000.0));

    if !meta.errors.is_empty() {
        output.push_str("\nerrors:\n");
        for error in &meta.errors {
            output.push_str(&format!("  {error}\n"));
        }
    }

    output.push('\n');
    output.push_str(&format!("  {:<10} {:<8} {:>10}\n", "District", "Status", "Size"));
    output.push_str(&format!("  {}\n", "-".repeat(30)));

    let mut total: u64 = 0;
    for entry in &snapshot.manifest.districts {
        let status = match entry.status {
            EntryStatus::Success => "ok",
            EntryStatus::Failed => "failed",
        };
        total = total.saturating_add(entry.file_size);
        output.push_str(&format!(
            "  {:<10} {:<8} {:>10}\n",
            entry.district_id,
            status,
            format_bytes(entry.file_size)
        ));
    }

    output.push_str(&format!("\n{:>34}\n", format!("TOTAL: {}", format_bytes(total))));
    output
}
