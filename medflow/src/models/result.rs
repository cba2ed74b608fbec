//! Terminal record of one pipeline run.

use super::{
    ClinicalReport, Disposition, MedicalImageInput, SegmentationMask, StandardizedImage,
    StorageReceipt, ValidationResult,
};
use crate::core::{ProcessingStatus, StageKind, StageStatus};
use crate::errors::{ErrorKind, StageFault};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A fatal fault as recorded in the result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageErrorRecord {
    /// Stage that failed.
    pub stage: StageKind,
    /// Fault classification.
    pub kind: ErrorKind,
    /// Fault description.
    pub message: String,
    /// Attempts made before giving up.
    pub attempts: u32,
    /// When the fault was recorded.
    pub at: DateTime<Utc>,
}

impl StageErrorRecord {
    /// Records `fault` after `attempts` attempts.
    #[must_use]
    pub fn from_fault(fault: &StageFault, attempts: u32) -> Self {
        Self {
            stage: fault.stage,
            kind: fault.kind,
            message: fault.message.clone(),
            attempts,
            at: Utc::now(),
        }
    }
}

/// Per-stage execution record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageTrace {
    /// The stage.
    pub stage: StageKind,
    /// How it ended.
    pub status: StageStatus,
    /// Wall time in milliseconds, 0 when skipped.
    pub duration_ms: u64,
    /// Attempts made, 0 when skipped.
    pub attempts: u32,
    /// Skip reason or failure summary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Everything known about one run once it terminates.
///
/// Read-only by convention once returned to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingResult {
    /// Unique id of this run.
    pub run_id: Uuid,
    /// Terminal status.
    pub status: ProcessingStatus,
    /// The input the run was started with.
    pub input: MedicalImageInput,
    /// Normalized image handle.
    pub standardized: Option<StandardizedImage>,
    /// Segmentation prompt.
    pub prompt: Option<String>,
    /// Masks in prompt order, with metrics merged in after refinement.
    pub masks: Vec<SegmentationMask>,
    /// Quality-gate verdict.
    pub validation: Option<ValidationResult>,
    /// Absent when the run stopped before reporting.
    pub report: Option<ClinicalReport>,
    /// Storage acknowledgement.
    pub receipt: Option<StorageReceipt>,
    /// Fatal faults in the order they occurred.
    pub errors: Vec<StageErrorRecord>,
    /// One entry per stage, in execution order.
    pub trace: Vec<StageTrace>,
    /// Set when validation asked for human review.
    pub review_required: bool,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// Total wall time in milliseconds.
    pub elapsed_ms: u64,
    /// Stable key identifying the input for storage and audit.
    pub audit_key: String,
}

impl ProcessingResult {
    /// Returns true for `Success`.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == ProcessingStatus::Success
    }

    /// Trace entry for `stage`, if it was recorded.
    #[must_use]
    pub fn stage_trace(&self, stage: StageKind) -> Option<&StageTrace> {
        self.trace.iter().find(|t| t.stage == stage)
    }

    /// Stages that completed, in execution order.
    #[must_use]
    pub fn completed_stages(&self) -> Vec<StageKind> {
        self.trace
            .iter()
            .filter(|t| t.status == StageStatus::Completed)
            .map(|t| t.stage)
            .collect()
    }

    /// Explains a non-success status; `None` on success.
    #[must_use]
    pub fn status_reason(&self) -> Option<String> {
        match self.status {
            ProcessingStatus::Success => None,
            ProcessingStatus::Failed => Some(self.errors.first().map_or_else(
                || "run failed without a recorded fault".to_string(),
                |e| format!("{} failed ({}): {}", e.stage, e.kind, e.message),
            )),
            ProcessingStatus::Partial => {
                let Some(validation) = &self.validation else {
                    return Some("run incomplete".to_string());
                };
                let concerns = validation
                    .concerns
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ");
                let detail = if concerns.is_empty() {
                    String::new()
                } else {
                    format!(": {concerns}")
                };
                Some(match validation.disposition {
                    Disposition::Reject => format!("rejected by validation{detail}"),
                    _ => format!("flagged for review{detail}"),
                })
            }
        }
    }
}
