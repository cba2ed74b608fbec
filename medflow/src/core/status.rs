//! Stage identity, stage status, and run status enums.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The seven stages of the imaging pipeline.
///
/// The variant order matches execution order; [`StageKind::ORDER`] is the
/// authoritative sequence used by the sequencer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StageKind {
    /// Image decoding and normalization.
    Preprocess,
    /// Segmentation prompt construction.
    GeneratePrompt,
    /// Remote segmentation inference.
    InferSegmentation,
    /// Quality gate over the inferred masks.
    Validate,
    /// Mask refinement and measurement.
    PostProcess,
    /// Clinical report generation.
    GenerateReport,
    /// Storage / clinical-system integration.
    Integrate,
}

impl StageKind {
    /// Fixed execution order.
    pub const ORDER: [Self; 7] = [
        Self::Preprocess,
        Self::GeneratePrompt,
        Self::InferSegmentation,
        Self::Validate,
        Self::PostProcess,
        Self::GenerateReport,
        Self::Integrate,
    ];

    /// Returns the stable name of the stage.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Preprocess => "preprocess",
            Self::GeneratePrompt => "generate-prompt",
            Self::InferSegmentation => "infer-segmentation",
            Self::Validate => "validate",
            Self::PostProcess => "post-process",
            Self::GenerateReport => "generate-report",
            Self::Integrate => "integrate",
        }
    }

    /// Returns the zero-based position of the stage in [`StageKind::ORDER`].
    #[must_use]
    pub const fn position(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ORDER
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown stage '{s}'"))
    }
}

/// The outcome of a single stage within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Stage ran and produced its output.
    Completed,
    /// Stage was not executed (gated or aborted).
    Skipped,
    /// Stage raised a fatal fault.
    Failed,
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Skipped => write!(f, "skipped"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Terminal status of one pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    /// Every stage ran and the validation gate accepted the masks.
    Success,
    /// The run finished but was flagged for review or rejected by the gate.
    Partial,
    /// A fatal fault aborted the run.
    Failed,
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Partial => write!(f, "partial"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_matches_position() {
        for (idx, kind) in StageKind::ORDER.iter().enumerate() {
            assert_eq!(kind.position(), idx);
        }
    }

    #[test]
    fn test_stage_kind_display() {
        assert_eq!(StageKind::InferSegmentation.to_string(), "infer-segmentation");
        assert_eq!(StageKind::PostProcess.to_string(), "post-process");
    }

    #[test]
    fn test_stage_kind_from_str() {
        assert_eq!("validate".parse::<StageKind>(), Ok(StageKind::Validate));
        assert!("unknown".parse::<StageKind>().is_err());
    }

    #[test]
    fn test_stage_kind_serialize() {
        let json = serde_json::to_string(&StageKind::GenerateReport).unwrap();
        assert_eq!(json, r#""generate-report""#);
    }

    #[test]
    fn test_processing_status_serialize() {
        let json = serde_json::to_string(&ProcessingStatus::Partial).unwrap();
        assert_eq!(json, r#""partial""#);

        let status: ProcessingStatus = serde_json::from_str(r#""failed""#).unwrap();
        assert_eq!(status, ProcessingStatus::Failed);
    }
}
