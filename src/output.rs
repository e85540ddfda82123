use crate::classify::SyncDirection;
use crate::sync::SyncPassResult;
use serde::Serialize;
use std::path::PathBuf;

/// JSON output mode for machine-readable sync events
/// Uses NDJSON format (newline-delimited JSON)
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncEvent {
    Pass {
        anchor_id: String,
        direction: SyncDirection,
        pushed: usize,
        pulled: usize,
        deleted: usize,
        skipped: usize,
        failed: usize,
    },
    Conflict {
        anchor_id: String,
        document_id: String,
        title: String,
        path: PathBuf,
    },
    Merged {
        anchor_id: String,
        document_id: String,
    },
    Error {
        anchor_id: Option<String>,
        error: String,
    },
    Summary {
        trees: usize,
        conflicts: usize,
        clean: bool,
        duration_secs: f64,
    },
}

impl SyncEvent {
    pub fn pass(result: &SyncPassResult) -> Self {
        SyncEvent::Pass {
            anchor_id: result.anchor_id.clone(),
            direction: result.direction,
            pushed: result.pushed_count,
            pulled: result.pulled_count,
            deleted: result.deleted_count,
            skipped: result.skipped_count,
            failed: result.failed_count,
        }
    }

    /// Emit this event as JSON to stdout
    pub fn emit(&self) {
        if let Ok(json) = serde_json::to_string(self) {
            println!("{}", json);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialize_pass_event() {
        let event = SyncEvent::Pass {
            anchor_id: "100".to_string(),
            direction: SyncDirection::Bidirectional,
            pushed: 2,
            pulled: 3,
            deleted: 0,
            skipped: 1,
            failed: 0,
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"pass""#));
        assert!(json.contains(r#""direction":"bidirectional""#));
        assert!(json.contains(r#""pulled":3"#));
    }

    #[test]
    fn test_serialize_conflict_event() {
        let event = SyncEvent::Conflict {
            anchor_id: "100".to_string(),
            document_id: "7".to_string(),
            title: "Notes".to_string(),
            path: PathBuf::from("docs/Notes.md"),
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"conflict""#));
        assert!(json.contains(r#""document_id":"7""#));
    }

    #[test]
    fn test_serialize_error_without_tree() {
        let event = SyncEvent::Error {
            anchor_id: None,
            error: "boom".to_string(),
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""anchor_id":null"#));
    }

    #[test]
    fn test_serialize_summary_event() {
        let event = SyncEvent::Summary {
            trees: 2,
            conflicts: 1,
            clean: false,
            duration_secs: 1.5,
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"summary""#));
        assert!(json.contains(r#""clean":false"#));
        assert!(json.contains(r#""duration_secs":1.5"#));
    }
}
