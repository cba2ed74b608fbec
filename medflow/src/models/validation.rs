//! Quality-gate verdict produced by the validation stage.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// A recoverable quality concern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Concern {
    /// At least one mask is below the confidence threshold.
    LowConfidence,
    /// A mask is empty, near-full, or structurally broken.
    ImplausibleGeometry,
    /// A mask is labeled as an imaging artifact.
    ArtifactDetected,
    /// An expected structure has no mask.
    MissingExpectedStructure,
}

impl fmt::Display for Concern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LowConfidence => write!(f, "low confidence"),
            Self::ImplausibleGeometry => write!(f, "implausible geometry"),
            Self::ArtifactDetected => write!(f, "artifact detected"),
            Self::MissingExpectedStructure => write!(f, "missing expected structure"),
        }
    }
}

/// What the sequencer should do with the masks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// Continue normally.
    Accept,
    /// Continue, but flag the run for human review.
    AcceptWithReview,
    /// Skip refinement and reporting.
    Reject,
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Accept => write!(f, "accept"),
            Self::AcceptWithReview => write!(f, "accept-with-review"),
            Self::Reject => write!(f, "reject"),
        }
    }
}

/// Outcome of the validation stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    /// False only when the disposition is `Reject`.
    pub passed: bool,
    /// Mean mask confidence, 0 with no masks.
    pub aggregate_confidence: f64,
    /// Concerns raised.
    pub concerns: BTreeSet<Concern>,
    /// Gate decision.
    pub disposition: Disposition,
    /// Human-readable details, one per observation.
    #[serde(default)]
    pub notes: Vec<String>,
}

impl ValidationResult {
    /// Builds a result; `passed` follows the disposition.
    #[must_use]
    pub fn new(
        aggregate_confidence: f64,
        concerns: BTreeSet<Concern>,
        disposition: Disposition,
        notes: Vec<String>,
    ) -> Self {
        Self {
            passed: disposition != Disposition::Reject,
            aggregate_confidence,
            concerns,
            disposition,
            notes,
        }
    }

    /// Returns true if `concern` was raised.
    #[must_use]
    pub fn has_concern(&self, concern: Concern) -> bool {
        self.concerns.contains(&concern)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_passed_follows_disposition() {
        let rejected = ValidationResult::new(0.2, BTreeSet::new(), Disposition::Reject, vec![]);
        assert!(!rejected.passed);

        let review = ValidationResult::new(
            0.6,
            [Concern::LowConfidence].into_iter().collect(),
            Disposition::AcceptWithReview,
            vec![],
        );
        assert!(review.passed);
        assert!(review.has_concern(Concern::LowConfidence));
    }

    #[test]
    fn test_serialization() {
        let result = ValidationResult::new(
            0.9,
            [Concern::ArtifactDetected].into_iter().collect(),
            Disposition::AcceptWithReview,
            vec!["mask 1 labeled artifact".into()],
        );
        let json = serde_json::to_value(&result).unwrap();

        assert_eq!(json["disposition"], "accept_with_review");
        assert_eq!(json["concerns"][0], "artifact_detected");
    }
}
