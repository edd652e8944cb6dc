//! JSON output for snapshots.
//!
//! Serializes the assembled snapshot for scripting and piping.

use serde::Serialize;

pub fn render<T: Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value)
        .unwrap_or_else(|e| format!("{{\"error\": \"failed to serialize: {e}\"}}"))
}
