//! Bounded-parallel batch processing.

use super::sequencer::Sequencer;
use crate::cancellation::CancellationToken;
use crate::context::PipelineEnvelope;
use crate::core::{ProcessingStatus, StageKind};
use crate::errors::{ErrorKind, StageFault};
use crate::events::names;
use crate::models::{MedicalImageInput, ProcessingResult, StageErrorRecord};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Instant;
use tracing::{error, info};
use uuid::Uuid;

/// Outcome counts for a batch.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BatchStatistics {
    /// Inputs submitted.
    pub total: usize,
    /// Runs with status `Success`.
    pub succeeded: usize,
    /// Runs with status `Partial`.
    pub partial: usize,
    /// Runs with status `Failed`.
    pub failed: usize,
    /// `succeeded / total`, 0 for an empty batch.
    pub success_rate: f64,
}

impl BatchStatistics {
    /// Tallies `results`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn from_results(results: &[ProcessingResult]) -> Self {
        let mut stats = Self {
            total: results.len(),
            ..Self::default()
        };
        for result in results {
            match result.status {
                ProcessingStatus::Success => stats.succeeded += 1,
                ProcessingStatus::Partial => stats.partial += 1,
                ProcessingStatus::Failed => stats.failed += 1,
            }
        }
        if stats.total > 0 {
            stats.success_rate = stats.succeeded as f64 / stats.total as f64;
        }
        stats
    }
}

/// Results of a batch, in input order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    /// One result per input, same order as submitted.
    pub results: Vec<ProcessingResult>,
    /// Outcome counts.
    pub statistics: BatchStatistics,
    /// Wall time for the whole batch.
    pub elapsed_ms: u64,
}

/// Runs many inputs through one sequencer with bounded parallelism.
///
/// Each input runs on its own task. Stage panics are already recorded as
/// `Internal` faults by the sequencer; anything that still takes the task
/// down becomes a `Failed` result for that input and never affects its
/// neighbours.
#[derive(Debug, Clone)]
pub struct BatchCoordinator {
    sequencer: Sequencer,
    max_concurrency: usize,
}

impl BatchCoordinator {
    /// Creates a coordinator running at most `max_concurrency` inputs at once.
    #[must_use]
    pub fn new(sequencer: Sequencer, max_concurrency: usize) -> Self {
        Self {
            sequencer,
            max_concurrency: max_concurrency.max(1),
        }
    }

    /// Processes `inputs` and returns one result per input, in order.
    pub async fn run(&self, inputs: Vec<MedicalImageInput>) -> BatchReport {
        let started = Instant::now();
        let total = inputs.len();
        info!(total, max_concurrency = self.max_concurrency, "Batch started");

        let runs = inputs.into_iter().map(|input| {
            let sequencer = self.sequencer.clone();
            async move { run_isolated(sequencer, input).await }
        });
        let results: Vec<ProcessingResult> = stream::iter(runs)
            .buffered(self.max_concurrency)
            .collect()
            .await;

        let statistics = BatchStatistics::from_results(&results);
        let elapsed_ms = crate::utils::millis(started.elapsed());
        info!(
            total = statistics.total,
            succeeded = statistics.succeeded,
            partial = statistics.partial,
            failed = statistics.failed,
            elapsed_ms,
            "Batch completed"
        );
        self.sequencer.event_sink().try_emit(
            names::BATCH_COMPLETED,
            Some(json!({
                "statistics": statistics,
                "elapsed_ms": elapsed_ms,
            })),
        );

        BatchReport {
            results,
            statistics,
            elapsed_ms,
        }
    }
}

async fn run_isolated(sequencer: Sequencer, input: MedicalImageInput) -> ProcessingResult {
    if let Err(err) = input.validate() {
        return failed_without_run(input, ErrorKind::InvalidInput, err.to_string());
    }

    let fallback = input.clone();
    let handle = tokio::spawn(async move { sequencer.run(input, CancellationToken::shared()).await });
    match handle.await {
        Ok(result) => result,
        Err(join_error) => {
            error!(study_id = %fallback.study_id(), error = %join_error, "Run task aborted");
            failed_without_run(fallback, ErrorKind::Internal, format!("run task aborted: {join_error}"))
        }
    }
}

/// Builds a `Failed` result for an input whose run never produced one.
pub(crate) fn failed_without_run(
    input: MedicalImageInput,
    kind: ErrorKind,
    message: String,
) -> ProcessingResult {
    let mut envelope = PipelineEnvelope::new(Uuid::new_v4(), input);
    let fault = StageFault::new(StageKind::Preprocess, kind, message);
    envelope
        .ledger
        .errors
        .push(StageErrorRecord::from_fault(&fault, 0));
    envelope.into_result(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ImageSource, Modality};

    #[test]
    fn test_statistics_empty_batch() {
        let stats = BatchStatistics::from_results(&[]);
        assert_eq!(stats.total, 0);
        assert_eq!(stats.success_rate, 0.0);
    }

    #[test]
    fn test_failed_without_run() {
        let input = MedicalImageInput::new("", "P1", Modality::Ct, ImageSource::uri("x"));
        let result = failed_without_run(input, ErrorKind::InvalidInput, "study_id empty".into());

        assert_eq!(result.status, ProcessingStatus::Failed);
        assert_eq!(result.errors[0].kind, ErrorKind::InvalidInput);
        assert!(result.trace.is_empty());
        assert!(result.receipt.is_none());
    }

    #[test]
    fn test_statistics_counts() {
        let input = || MedicalImageInput::new("S1", "P1", Modality::Ct, ImageSource::uri("x"));
        let failed = failed_without_run(input(), ErrorKind::Internal, "boom".into());
        let mut partial = failed.clone();
        partial.status = ProcessingStatus::Partial;
        let mut success = failed.clone();
        success.status = ProcessingStatus::Success;

        let stats = BatchStatistics::from_results(&[failed, partial, success.clone(), success]);
        assert_eq!(stats.total, 4);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.partial, 1);
        assert_eq!(stats.succeeded, 2);
        assert!((stats.success_rate - 0.5).abs() < f64::EPSILON);
    }
}
