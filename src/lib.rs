//! Durable point-in-time snapshots of district statistics.
//!
//! A [`SnapshotStore`] writes each snapshot as a directory of per-district
//! json files plus a manifest and metadata, and keeps a small pointer file
//! naming the latest successful snapshot. Lookups trust the pointer only
//! after checking it, fall back to a directory scan, and repair the pointer
//! when they had to scan.

pub mod cli;
pub mod config;
pub mod error;
pub mod report;
pub mod snapshot;
pub mod store;
pub mod util;

pub use config::Config;
pub use error::{Result, StoreError};
pub use snapshot::{DistrictRecord, NewSnapshot, SnapshotStatus};
pub use store::manifest::SnapshotManifest;
pub use store::metadata::SnapshotMetadata;
pub use store::retention::{PruneMode, PruneResult};
pub use store::writer::WriteReceipt;
pub use store::{SnapshotStore, StatsSnapshot, StoredSnapshot};
