//! Assertions over processing results.

use crate::core::{ProcessingStatus, StageKind, StageStatus};
use crate::models::ProcessingResult;

/// Asserts the result has the expected status.
pub fn assert_status(result: &ProcessingResult, expected: ProcessingStatus) {
    assert_eq!(
        result.status, expected,
        "Expected status {:?}, got {:?} ({:?})",
        expected,
        result.status,
        result.status_reason()
    );
}

/// Asserts every stage was traced exactly once, in pipeline order.
pub fn assert_stage_order(result: &ProcessingResult) {
    let traced: Vec<StageKind> = result.trace.iter().map(|t| t.stage).collect();
    assert_eq!(traced, StageKind::ORDER.to_vec(), "Stages traced out of order");
}

/// Asserts how `stage` ended.
pub fn assert_stage_status(result: &ProcessingResult, stage: StageKind, expected: StageStatus) {
    let trace = result.stage_trace(stage);
    assert_eq!(
        trace.map(|t| t.status),
        Some(expected),
        "Stage {stage} trace: {trace:?}"
    );
}

/// Asserts two results describe the same outcome.
///
/// Run ids, timestamps, durations, and storage receipt ids are ignored;
/// everything derived from the input and the collaborators must match.
pub fn assert_equivalent_results(left: &ProcessingResult, right: &ProcessingResult) {
    assert_eq!(left.status, right.status, "status differs");
    assert_eq!(left.input, right.input, "input differs");
    assert_eq!(left.audit_key, right.audit_key, "audit key differs");
    assert_eq!(left.standardized, right.standardized, "normalized image differs");
    assert_eq!(left.prompt, right.prompt, "prompt differs");
    assert_eq!(left.masks, right.masks, "masks differ");
    assert_eq!(left.validation, right.validation, "validation differs");
    assert_eq!(left.review_required, right.review_required, "review flag differs");
    assert_eq!(left.receipt.is_some(), right.receipt.is_some(), "receipt presence differs");

    match (&left.report, &right.report) {
        (Some(a), Some(b)) => {
            assert_eq!(a.findings, b.findings, "report findings differ");
            assert_eq!(a.quantitative, b.quantitative, "report values differ");
            assert_eq!(a.impression, b.impression, "report impression differs");
            assert_eq!(a.recommendations, b.recommendations, "report recommendations differ");
        }
        (None, None) => {}
        _ => panic!("report presence differs"),
    }

    let errors = |r: &ProcessingResult| {
        r.errors
            .iter()
            .map(|e| (e.stage, e.kind, e.message.clone(), e.attempts))
            .collect::<Vec<_>>()
    };
    assert_eq!(errors(left), errors(right), "errors differ");

    let trace = |r: &ProcessingResult| {
        r.trace
            .iter()
            .map(|t| (t.stage, t.status, t.attempts, t.note.clone()))
            .collect::<Vec<_>>()
    };
    assert_eq!(trace(left), trace(right), "trace differs");
}
