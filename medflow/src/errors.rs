//! Error types for the medflow orchestration engine.
//!
//! Errors are split by who sees them:
//!
//! - [`InputValidationError`] is returned synchronously before a run starts.
//! - [`CollaboratorError`] is what an external collaborator reports.
//! - [`StageFault`] is a fatal fault inside a run; it never escapes a run and
//!   is recorded as data in the [`ProcessingResult`](crate::models::ProcessingResult).
//! - [`ConfigError`] covers configuration loading and validation.
//! - [`MedflowError`] is the umbrella for construction-time failures.

use crate::core::StageKind;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// The main error type for medflow construction and setup.
#[derive(Debug, Error)]
pub enum MedflowError {
    /// The input failed validation.
    #[error("{0}")]
    Input(#[from] InputValidationError),

    /// The configuration is invalid or could not be loaded.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// A stage output violated the envelope write rules.
    #[error("{0}")]
    OutputConflict(#[from] OutputConflictError),

    /// A required collaborator was not supplied to the builder.
    #[error("Missing collaborator: {0}")]
    MissingCollaborator(&'static str),
}

/// Error raised when a [`MedicalImageInput`](crate::models::MedicalImageInput)
/// is rejected before any stage runs.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("Invalid input field '{field}': {message}")]
pub struct InputValidationError {
    /// The offending field.
    pub field: String,
    /// Why it was rejected.
    pub message: String,
}

impl InputValidationError {
    /// Creates a new input validation error.
    #[must_use]
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Errors reported by external collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollaboratorError {
    /// The image could not be decoded or normalized.
    #[error("Format error: {0}")]
    Format(String),

    /// The inference service failed.
    #[error("Inference error: {message}")]
    Inference {
        /// Failure description.
        message: String,
        /// Whether the call may be retried.
        retryable: bool,
    },

    /// The inference service returned an unusable payload.
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// The clinical storage system rejected or failed the write.
    #[error("Integration error: {message}")]
    Integration {
        /// Failure description.
        message: String,
        /// Whether the call may be retried.
        retryable: bool,
    },

    /// No prompt can be built for the modality.
    #[error("Invalid modality: {0}")]
    InvalidModality(String),
}

impl CollaboratorError {
    /// Creates a transient inference error.
    #[must_use]
    pub fn transient_inference(message: impl Into<String>) -> Self {
        Self::Inference {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a permanent inference error.
    #[must_use]
    pub fn inference(message: impl Into<String>) -> Self {
        Self::Inference {
            message: message.into(),
            retryable: false,
        }
    }

    /// Creates a permanent integration error.
    #[must_use]
    pub fn integration(message: impl Into<String>) -> Self {
        Self::Integration {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns the fault kind this error maps to.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Format(_) => ErrorKind::Format,
            Self::Inference { .. } => ErrorKind::Inference,
            Self::MalformedResponse(_) => ErrorKind::MalformedResponse,
            Self::Integration { .. } => ErrorKind::Integration,
            Self::InvalidModality(_) => ErrorKind::InvalidInput,
        }
    }

    /// Returns true if the collaborator flagged the failure as transient.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Inference { retryable, .. } | Self::Integration { retryable, .. } => *retryable,
            _ => false,
        }
    }
}

/// Classification of a fatal stage fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The input or its modality cannot be processed.
    InvalidInput,
    /// Image decoding or normalization failed.
    Format,
    /// Remote inference failed.
    Inference,
    /// Remote inference returned an unusable payload.
    MalformedResponse,
    /// Storage integration failed.
    Integration,
    /// The stage exceeded its time bound.
    Timeout,
    /// The run was cancelled.
    Cancelled,
    /// A broken internal invariant or a panic.
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidInput => write!(f, "invalid_input"),
            Self::Format => write!(f, "format"),
            Self::Inference => write!(f, "inference"),
            Self::MalformedResponse => write!(f, "malformed_response"),
            Self::Integration => write!(f, "integration"),
            Self::Timeout => write!(f, "timeout"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

/// A fatal fault raised by a stage during a run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Stage '{stage}' failed ({kind}): {message}")]
pub struct StageFault {
    /// The stage that raised the fault.
    pub stage: StageKind,
    /// Fault classification.
    pub kind: ErrorKind,
    /// Human-readable description.
    pub message: String,
    /// Whether the sequencer may retry the stage.
    pub retryable: bool,
}

impl StageFault {
    /// Creates a non-retryable fault.
    #[must_use]
    pub fn new(stage: StageKind, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            stage,
            kind,
            message: message.into(),
            retryable: false,
        }
    }

    /// Wraps a collaborator error raised while running `stage`.
    #[must_use]
    pub fn from_collaborator(stage: StageKind, err: &CollaboratorError) -> Self {
        Self {
            stage,
            kind: err.kind(),
            message: err.to_string(),
            retryable: err.is_retryable(),
        }
    }

    /// The stage did not finish within `limit`.
    #[must_use]
    pub fn timeout(stage: StageKind, limit: std::time::Duration) -> Self {
        Self::new(
            stage,
            ErrorKind::Timeout,
            format!("exceeded time bound of {}ms", limit.as_millis()),
        )
    }

    /// The run was cancelled while `stage` was pending.
    #[must_use]
    pub fn cancelled(stage: StageKind, reason: &str) -> Self {
        Self::new(stage, ErrorKind::Cancelled, format!("cancelled: {reason}"))
    }

    /// A stage found the envelope missing a field an earlier stage guarantees.
    #[must_use]
    pub fn internal(stage: StageKind, message: impl Into<String>) -> Self {
        Self::new(stage, ErrorKind::Internal, message)
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("stage".to_string(), serde_json::json!(self.stage.as_str()));
        map.insert("kind".to_string(), serde_json::json!(self.kind.to_string()));
        map.insert("message".to_string(), serde_json::json!(self.message));
        map.insert("retryable".to_string(), serde_json::json!(self.retryable));
        map
    }
}

/// Error raised when a stage output cannot be merged into the envelope.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Output conflict on '{slot}': {reason}")]
pub struct OutputConflictError {
    /// The envelope slot involved.
    pub slot: &'static str,
    /// The stage that attempted the write.
    pub writer: StageKind,
    /// Why the write was refused.
    pub reason: String,
}

impl OutputConflictError {
    /// Creates a new output conflict error.
    #[must_use]
    pub fn new(slot: &'static str, writer: StageKind, reason: impl Into<String>) -> Self {
        Self {
            slot,
            writer,
            reason: reason.into(),
        }
    }
}

impl From<OutputConflictError> for StageFault {
    fn from(err: OutputConflictError) -> Self {
        Self::internal(err.writer, err.to_string())
    }
}

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A field holds an unusable value.
    #[error("Invalid config field '{field}': {message}")]
    Invalid {
        /// Field path, e.g. `validation.min_confidence`.
        field: String,
        /// Why the value is unusable.
        message: String,
    },

    /// The configuration file could not be read.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration document could not be parsed.
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// An environment variable holds an unparsable value.
    #[error("Environment variable {var}: {message}")]
    Env {
        /// Variable name.
        var: String,
        /// Why it could not be used.
        message: String,
    },
}

impl ConfigError {
    /// Creates an invalid-field error.
    #[must_use]
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_input_validation_error_display() {
        let err = InputValidationError::new("study_id", "must not be empty");
        assert_eq!(err.to_string(), "Invalid input field 'study_id': must not be empty");
    }

    #[test]
    fn test_collaborator_error_kind_mapping() {
        assert_eq!(CollaboratorError::Format("bad".into()).kind(), ErrorKind::Format);
        assert_eq!(
            CollaboratorError::InvalidModality("OT".into()).kind(),
            ErrorKind::InvalidInput
        );
        assert_eq!(
            CollaboratorError::integration("down").kind(),
            ErrorKind::Integration
        );
    }

    #[test]
    fn test_collaborator_error_retryable() {
        assert!(CollaboratorError::transient_inference("503").is_retryable());
        assert!(!CollaboratorError::inference("400").is_retryable());
        assert!(!CollaboratorError::MalformedResponse("x".into()).is_retryable());
    }

    #[test]
    fn test_stage_fault_from_collaborator() {
        let err = CollaboratorError::transient_inference("busy");
        let fault = StageFault::from_collaborator(StageKind::InferSegmentation, &err);

        assert_eq!(fault.kind, ErrorKind::Inference);
        assert!(fault.retryable);
        assert!(fault.message.contains("busy"));
    }

    #[test]
    fn test_stage_fault_timeout_message() {
        let fault = StageFault::timeout(StageKind::Integrate, Duration::from_millis(250));
        assert_eq!(fault.kind, ErrorKind::Timeout);
        assert!(!fault.retryable);
        assert!(fault.to_string().contains("250ms"));
    }

    #[test]
    fn test_stage_fault_to_dict() {
        let fault = StageFault::cancelled(StageKind::Validate, "user abort");
        let dict = fault.to_dict();

        assert_eq!(dict["stage"], "validate");
        assert_eq!(dict["kind"], "cancelled");
    }

    #[test]
    fn test_output_conflict_into_fault() {
        let err = OutputConflictError::new("masks", StageKind::Validate, "wrong producer");
        let fault: StageFault = err.into();

        assert_eq!(fault.kind, ErrorKind::Internal);
        assert_eq!(fault.stage, StageKind::Validate);
    }

    #[test]
    fn test_medflow_error_from_config() {
        let err: MedflowError = ConfigError::invalid("batch.max_concurrency", "must be > 0").into();
        assert!(err.to_string().contains("batch.max_concurrency"));
    }
}
