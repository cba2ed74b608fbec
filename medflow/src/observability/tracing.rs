//! Spans and timing for pipeline runs.

use crate::core::StageKind;
use crate::models::MedicalImageInput;
use std::time::{Duration, Instant};
use tracing::{info_span, Span};
use uuid::Uuid;

/// Span wrapping one run. Never records the patient id.
#[must_use]
pub fn run_span(pipeline: &str, run_id: Uuid, input: &MedicalImageInput) -> Span {
    info_span!(
        "pipeline_run",
        pipeline = %pipeline,
        run_id = %run_id,
        study_id = %input.study_id(),
        modality = %input.modality(),
    )
}

/// Span wrapping one stage attempt loop.
#[must_use]
pub fn stage_span(stage: StageKind) -> Span {
    info_span!("stage", stage = %stage)
}

/// Wall-clock timer for a stage.
#[derive(Debug)]
pub struct SpanTimer {
    start: Instant,
    stage: StageKind,
}

impl SpanTimer {
    /// Starts timing `stage`.
    #[must_use]
    pub fn start(stage: StageKind) -> Self {
        Self {
            start: Instant::now(),
            stage,
        }
    }

    /// The stage being timed.
    #[must_use]
    pub const fn stage(&self) -> StageKind {
        self.stage
    }

    /// Time since start.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stops the timer and returns whole milliseconds.
    #[must_use]
    pub fn finish(self) -> u64 {
        crate::utils::millis(self.elapsed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_timer_measures() {
        let timer = SpanTimer::start(StageKind::Validate);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(timer.stage(), StageKind::Validate);
        assert!(timer.finish() >= 5);
    }
}
