pub mod json;
pub mod table;

use crate::store::retention::PruneResult;
use crate::store::StoredSnapshot;

pub fn print_snapshot<T>(snapshot: &StoredSnapshot<T>, as_json: bool)
where
    T: serde::Serialize,
{
    if as_json {
        println!("{}", json::render(snapshot));
    } else {
        print!("{}", table::render_snapshot(snapshot));
        print_issues(snapshot);
    }
}

fn print_issues<T>(snapshot: &StoredSnapshot<T>) {
    if snapshot.issues.is_empty() {
        return;
    }

    println!();
    for issue in &snapshot.issues {
        println!("[warning] district {} missing file {}", issue.district_id, issue.file_name);
    }
}

pub fn print_prune(result: &PruneResult, dry_run: bool) {
    let verb = if dry_run { "would delete" } else { "deleted" };

    for snapshot_id in &result.deleted {
        println!("{verb}: {snapshot_id}");
    }
    for snapshot_id in &result.protected {
        println!("kept (latest): {snapshot_id}");
    }
    if result.temp_files_removed > 0 {
        println!("removed {} stale temp files", result.temp_files_removed);
    }

    if !result.errors.is_empty() {
        eprintln!("\nerrors encountered:");
        for error in &result.errors {
            eprintln!("  {error}");
        }
    }

    if result.deleted.is_empty() {
        println!("nothing to prune");
    }
}
