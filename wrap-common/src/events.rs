//! Progress events carried by streamed generation responses
//!
//! A channel delivers zero or more `progress` events followed by exactly one
//! terminal event (`complete` or `error`), then closes.

use serde::{Deserialize, Serialize};

use crate::models::{TrackPatch, TrackResult};

/// Wire-level event of a progress channel
///
/// Serialized with a `type` tag:
/// - `{"type":"progress","current":3,"total":8}`
/// - `{"type":"complete","tracks":[...]}` (batch generation)
/// - `{"type":"complete","result":{...}}` (single-track expansion)
/// - `{"type":"error","error":"..."}` (expansion failed)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProgressEvent {
    /// `current` of `total` attempts have resolved
    Progress { current: usize, total: usize },
    /// Terminal success
    Complete(Completion),
    /// Terminal failure of the whole channel
    Error { error: String },
}

/// Payload of a terminal `complete` event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Completion {
    /// Every track of a batch, in prompt order
    Batch { tracks: Vec<TrackResult> },
    /// Patch for one expanded track
    Single { result: TrackPatch },
}

impl ProgressEvent {
    pub fn progress(current: usize, total: usize) -> Self {
        ProgressEvent::Progress { current, total }
    }

    pub fn batch_complete(tracks: Vec<TrackResult>) -> Self {
        ProgressEvent::Complete(Completion::Batch { tracks })
    }

    pub fn single_complete(result: TrackPatch) -> Self {
        ProgressEvent::Complete(Completion::Single { result })
    }

    pub fn error(message: impl Into<String>) -> Self {
        ProgressEvent::Error {
            error: message.into(),
        }
    }

    /// Terminal events close their channel
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ProgressEvent::Progress { .. })
    }

    /// Event name used for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            ProgressEvent::Progress { .. } => "progress",
            ProgressEvent::Complete(_) => "complete",
            ProgressEvent::Error { .. } => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_progress_wire_shape() {
        let event = ProgressEvent::progress(3, 8);
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"type": "progress", "current": 3, "total": 8})
        );
        assert!(!event.is_terminal());
    }

    #[test]
    fn test_complete_shapes_are_distinguished_by_payload() {
        let batch: ProgressEvent = serde_json::from_value(json!({
            "type": "complete",
            "tracks": [{"trackIndex": 0, "success": false, "error": "boom"}]
        }))
        .unwrap();
        match batch {
            ProgressEvent::Complete(Completion::Batch { tracks }) => {
                assert_eq!(tracks.len(), 1);
                assert_eq!(tracks[0].error.as_deref(), Some("boom"));
            }
            other => panic!("expected batch completion, got {:?}", other),
        }

        let single: ProgressEvent = serde_json::from_value(json!({
            "type": "complete",
            "result": {"success": true, "filename": "full.mp3", "duration": 120}
        }))
        .unwrap();
        match single {
            ProgressEvent::Complete(Completion::Single { result }) => {
                assert_eq!(result.filename.as_deref(), Some("full.mp3"));
                assert_eq!(result.duration_seconds, Some(120));
            }
            other => panic!("expected single completion, got {:?}", other),
        }
    }

    #[test]
    fn test_serialized_complete_keeps_type_tag() {
        let event = ProgressEvent::batch_complete(vec![]);
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"type": "complete", "tracks": []})
        );
        assert!(event.is_terminal());
        assert!(ProgressEvent::error("x").is_terminal());
    }
}
