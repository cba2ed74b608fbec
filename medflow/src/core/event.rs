//! Progress events yielded by the streaming execution mode.

use super::status::{StageKind, StageStatus};
use crate::models::ProcessingResult;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Progress of one stage within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageProgress {
    /// Run the stage belongs to.
    pub run_id: Uuid,
    /// The stage.
    pub stage: StageKind,
    /// How it ended.
    pub status: StageStatus,
    /// Human-readable status line.
    pub message: String,
    /// Partial output, when the stage produced any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// Wall time in milliseconds.
    pub duration_ms: u64,
}

impl StageProgress {
    /// Converts to a dictionary representation, as emitted to event sinks.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("run_id".to_string(), serde_json::json!(self.run_id.to_string()));
        map.insert("stage".to_string(), serde_json::json!(self.stage.as_str()));
        map.insert("status".to_string(), serde_json::json!(self.status.to_string()));
        map.insert("message".to_string(), serde_json::json!(self.message));
        map.insert("duration_ms".to_string(), serde_json::json!(self.duration_ms));
        if let Some(ref data) = self.data {
            map.insert("data".to_string(), data.clone());
        }
        map
    }
}

/// One item of a progress stream.
///
/// A stream yields exactly one [`ProgressEvent::Stage`] per stage, in
/// execution order, then a single [`ProgressEvent::Completed`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// A stage finished, was skipped, or failed.
    Stage(StageProgress),
    /// The run terminated.
    Completed(Box<ProcessingResult>),
}

impl ProgressEvent {
    /// Returns the stage progress, if this is a stage event.
    #[must_use]
    pub const fn as_stage(&self) -> Option<&StageProgress> {
        match self {
            Self::Stage(progress) => Some(progress),
            Self::Completed(_) => None,
        }
    }

    /// Consumes the event and returns the final result, if terminal.
    #[must_use]
    pub fn into_result(self) -> Option<ProcessingResult> {
        match self {
            Self::Completed(result) => Some(*result),
            Self::Stage(_) => None,
        }
    }

    /// Returns true for the terminal event.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed(_))
    }
}
