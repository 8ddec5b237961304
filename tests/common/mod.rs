//! Common test utilities

use std::io::Write;

use serde_json::{json, Value};
use tempfile::NamedTempFile;

use examgrid::models::ParticipantRecord;

#[allow(dead_code)]
/// Create `count` participants with ids starting at 1
pub fn participants(count: usize) -> Vec<ParticipantRecord> {
    (1..=count as i64)
        .map(|id| ParticipantRecord::new(id, format!("Candidate {id}")))
        .collect()
}

/// Assignment payload the scheduler would build for a roster
#[allow(dead_code)]
pub fn exam_data(delivery_id: i64, roster: &[ParticipantRecord]) -> Value {
    json!({
        "delivery_id": delivery_id,
        "exam_id": 3,
        "group_id": 9,
        "exam_title": "Anatomy Practical",
        "group_name": "Cohort B",
        "duration": 90,
        "is_anytime": false,
        "participants": roster,
    })
}

/// Write `content` to a temporary TOML file
#[allow(dead_code)]
pub fn write_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp config file");
    file.write_all(content.as_bytes()).expect("write temp config");
    file
}
