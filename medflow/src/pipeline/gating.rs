//! Validation gate: maps a disposition to what runs next.

use crate::config::ReviewPolicy;
use crate::models::Disposition;
use std::fmt;

/// What the sequencer does with the remaining stages after validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GateDecision {
    /// Run everything.
    Proceed,
    /// Run everything and flag the result for review.
    ProceedFlagged,
    /// Skip gate-sensitive stages and flag the result for review.
    Hold,
    /// Skip gate-sensitive stages.
    Reject,
}

impl GateDecision {
    /// Decides from the validation disposition and the review policy.
    #[must_use]
    pub const fn decide(disposition: Disposition, policy: ReviewPolicy) -> Self {
        match (disposition, policy) {
            (Disposition::Accept, _) => Self::Proceed,
            (Disposition::AcceptWithReview, ReviewPolicy::Continue) => Self::ProceedFlagged,
            (Disposition::AcceptWithReview, ReviewPolicy::HoldForReview) => Self::Hold,
            (Disposition::Reject, _) => Self::Reject,
        }
    }

    /// Whether post-process and report are skipped.
    #[must_use]
    pub const fn skips_gated_stages(self) -> bool {
        matches!(self, Self::Hold | Self::Reject)
    }

    /// Whether the result is flagged for human review.
    #[must_use]
    pub const fn requires_review(self) -> bool {
        matches!(self, Self::ProceedFlagged | Self::Hold)
    }

    /// Returns the decision name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Proceed => "proceed",
            Self::ProceedFlagged => "proceed_flagged",
            Self::Hold => "hold",
            Self::Reject => "reject",
        }
    }
}

impl fmt::Display for GateDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decisions() {
        use Disposition::*;
        use ReviewPolicy::*;

        assert_eq!(GateDecision::decide(Accept, HoldForReview), GateDecision::Proceed);
        assert_eq!(GateDecision::decide(AcceptWithReview, Continue), GateDecision::ProceedFlagged);
        assert_eq!(GateDecision::decide(AcceptWithReview, HoldForReview), GateDecision::Hold);
        assert_eq!(GateDecision::decide(Reject, Continue), GateDecision::Reject);
    }

    #[test]
    fn test_flags() {
        assert!(!GateDecision::Proceed.skips_gated_stages());
        assert!(!GateDecision::ProceedFlagged.skips_gated_stages());
        assert!(GateDecision::Hold.skips_gated_stages());
        assert!(GateDecision::Reject.skips_gated_stages());

        assert!(GateDecision::ProceedFlagged.requires_review());
        assert!(GateDecision::Hold.requires_review());
        assert!(!GateDecision::Reject.requires_review());
    }
}
