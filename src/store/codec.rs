//! Per-district entity files.
//!
//! Each file wraps the opaque payload in a small envelope so a reader can
//! check it is looking at the district it asked for.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::fsio::{self, FileStamp};
use crate::error::{Result, StoreError};
use crate::snapshot::DistrictRecord;

const FILE_PREFIX: &str = "entity_";
const FILE_SUFFIX: &str = ".json";
const RECORD_STATUS: &str = "success";

pub fn district_file_name(district_id: &str) -> String {
    format!("{FILE_PREFIX}{district_id}{FILE_SUFFIX}")
}

/// Inverse of [`district_file_name`]. `None` for anything else in the directory.
pub fn district_id_from_file_name(file_name: &str) -> Option<&str> {
    file_name
        .strip_prefix(FILE_PREFIX)?
        .strip_suffix(FILE_SUFFIX)
        .filter(|id| !id.is_empty())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EnvelopeRef<'a, T> {
    district_id: &'a str,
    collected_at: &'a DateTime<Utc>,
    status: &'static str,
    data: &'a T,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope<T> {
    district_id: String,
    collected_at: DateTime<Utc>,
    #[serde(default)]
    status: Option<String>,
    data: T,
}

pub(crate) fn write_district<T: Serialize>(dir: &Path, record: &DistrictRecord<T>) -> Result<FileStamp> {
    let envelope = EnvelopeRef {
        district_id: &record.district_id,
        collected_at: &record.collected_at,
        status: RECORD_STATUS,
        data: &record.data,
    };
    fsio::write_json_atomic(&dir.join(district_file_name(&record.district_id)), &envelope)
}

/// Reads `file_name` and checks it holds `district_id`.
pub(crate) fn read_district_file<T: DeserializeOwned>(
    dir: &Path,
    file_name: &str,
    district_id: &str,
) -> Result<Option<DistrictRecord<T>>> {
    let path = dir.join(file_name);
    let Some(envelope) = fsio::read_json::<Envelope<T>>(&path)? else {
        return Ok(None);
    };

    if envelope.district_id != district_id {
        return Err(StoreError::corrupt(
            &path,
            format!("holds district {} instead of {district_id}", envelope.district_id),
        ));
    }
    if let Some(status) = envelope.status.as_deref() {
        if status != RECORD_STATUS {
            return Err(StoreError::corrupt(&path, format!("record status is {status}")));
        }
    }

    Ok(Some(DistrictRecord {
        district_id: envelope.district_id,
        collected_at: envelope.collected_at,
        data: envelope.data,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use tempfile::TempDir;

    fn record(id: &str) -> DistrictRecord {
        DistrictRecord {
            district_id: id.to_string(),
            collected_at: "2024-01-15T06:00:00Z".parse().unwrap(),
            data: json!({"totalMembers": 1234, "clubs": [{"id": 1}]}),
        }
    }

    #[test]
    fn file_names_map_both_ways() {
        assert_eq!(district_file_name("42"), "entity_42.json");
        assert_eq!(district_id_from_file_name("entity_42.json"), Some("42"));
        assert_eq!(district_id_from_file_name("entity_.json"), None);
        assert_eq!(district_id_from_file_name("manifest.json"), None);
        assert_eq!(district_id_from_file_name("entity_42.json.tmp.99"), None);
    }

    #[test]
    fn written_record_reads_back() {
        let dir = TempDir::new().unwrap();
        let original = record("42");
        write_district(dir.path(), &original).unwrap();

        let read: DistrictRecord<Value> = read_district_file(dir.path(), "entity_42.json", "42")
            .unwrap()
            .unwrap();
        assert_eq!(read, original);
    }

    #[test]
    fn envelope_is_stamped_with_status() {
        let dir = TempDir::new().unwrap();
        write_district(dir.path(), &record("F")).unwrap();

        let raw: Value =
            serde_json::from_slice(&std::fs::read(dir.path().join("entity_F.json")).unwrap()).unwrap();
        assert_eq!(raw["districtId"], "F");
        assert_eq!(raw["status"], "success");
        assert_eq!(raw["data"]["totalMembers"], 1234);
    }

    #[test]
    fn mismatched_district_is_corrupt() {
        let dir = TempDir::new().unwrap();
        write_district(dir.path(), &record("42")).unwrap();
        std::fs::rename(dir.path().join("entity_42.json"), dir.path().join("entity_43.json")).unwrap();

        let result: Result<Option<DistrictRecord<Value>>> =
            read_district_file(dir.path(), "entity_43.json", "43");
        assert!(matches!(result, Err(StoreError::Corrupt { .. })));
    }

    #[test]
    fn missing_file_is_none() {
        let dir = TempDir::new().unwrap();
        let result: Option<DistrictRecord<Value>> =
            read_district_file(dir.path(), "entity_1.json", "1").unwrap();
        assert!(result.is_none());
    }
}
