//! The per-run data envelope.
//!
//! A [`PipelineEnvelope`] holds the input plus one write-once slot per stage
//! output. Stages read it by reference and return a [`StageOutput`]; only the
//! sequencer merges that output, through [`PipelineEnvelope::apply`], which
//! refuses writes from the wrong stage and second writes to a filled slot.
//! The run ledger (fault records, trace, review flag) sits beside the slots
//! and is written by the sequencer alone.

use crate::core::{ProcessingStatus, StageKind};
use crate::errors::OutputConflictError;
use crate::models::{
    ClinicalReport, Disposition, MedicalImageInput, ProcessingResult, SegmentationMask,
    StageErrorRecord, StageTrace, StandardizedImage, StorageReceipt, ValidationResult,
};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use uuid::Uuid;

/// Typed output of one stage.
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutput {
    /// Normalized image handle.
    Preprocessed(StandardizedImage),
    /// Segmentation prompt.
    Prompt(String),
    /// Raw masks in prompt order.
    Segmented(Vec<SegmentationMask>),
    /// Quality-gate verdict.
    Validated(ValidationResult),
    /// Refined masks with metrics, same order as the raw masks.
    Refined(Vec<SegmentationMask>),
    /// Generated report.
    Reported(ClinicalReport),
    /// Storage acknowledgement.
    Integrated(StorageReceipt),
}

impl StageOutput {
    /// The only stage allowed to produce this output.
    #[must_use]
    pub const fn producer(&self) -> StageKind {
        match self {
            Self::Preprocessed(_) => StageKind::Preprocess,
            Self::Prompt(_) => StageKind::GeneratePrompt,
            Self::Segmented(_) => StageKind::InferSegmentation,
            Self::Validated(_) => StageKind::Validate,
            Self::Refined(_) => StageKind::PostProcess,
            Self::Reported(_) => StageKind::GenerateReport,
            Self::Integrated(_) => StageKind::Integrate,
        }
    }

    /// Envelope slot this output fills.
    #[must_use]
    pub const fn slot(&self) -> &'static str {
        match self {
            Self::Preprocessed(_) => "standardized",
            Self::Prompt(_) => "prompt",
            Self::Segmented(_) => "masks",
            Self::Validated(_) => "validation",
            Self::Refined(_) => "refined_masks",
            Self::Reported(_) => "report",
            Self::Integrated(_) => "receipt",
        }
    }

    /// One-line status message for progress events.
    #[must_use]
    pub fn summary(&self) -> String {
        match self {
            Self::Preprocessed(img) => {
                format!("image normalized to {}x{}", img.width, img.height)
            }
            Self::Prompt(prompt) => format!("prompt built: {prompt}"),
            Self::Segmented(masks) => format!("{} mask(s) inferred", masks.len()),
            Self::Validated(v) => format!(
                "disposition {} at confidence {:.2}",
                v.disposition, v.aggregate_confidence
            ),
            Self::Refined(masks) => format!("{} mask(s) refined", masks.len()),
            Self::Reported(report) => format!("report with {} finding(s)", report.findings.len()),
            Self::Integrated(receipt) => format!("stored as {}", receipt.receipt_id),
        }
    }

    /// Partial data exposed to streaming callers.
    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            Self::Preprocessed(img) => json!({
                "reference": img.reference,
                "width": img.width,
                "height": img.height,
            }),
            Self::Prompt(prompt) => json!({ "prompt": prompt }),
            Self::Segmented(masks) => json!({
                "labels": masks.iter().map(|m| m.label.as_str()).collect::<Vec<_>>(),
                "confidences": masks.iter().map(|m| m.confidence).collect::<Vec<_>>(),
            }),
            Self::Validated(v) => serde_json::to_value(v).unwrap_or(Value::Null),
            Self::Refined(masks) => json!({
                "metrics": masks.iter().map(|m| json!({
                    "label": m.label,
                    "metrics": m.metrics,
                })).collect::<Vec<_>>(),
            }),
            Self::Reported(report) => json!({
                "impression": report.impression,
                "findings": report.findings.len(),
            }),
            Self::Integrated(receipt) => serde_json::to_value(receipt).unwrap_or(Value::Null),
        }
    }
}

/// Sequencer-owned bookkeeping for one run.
#[derive(Debug, Clone, Default)]
pub(crate) struct RunLedger {
    pub errors: Vec<StageErrorRecord>,
    pub trace: Vec<StageTrace>,
    pub review_required: bool,
}

/// Accumulated state of one run.
#[derive(Debug, Clone)]
pub struct PipelineEnvelope {
    run_id: Uuid,
    input: MedicalImageInput,
    audit_key: String,
    started_at: DateTime<Utc>,
    standardized: Option<StandardizedImage>,
    prompt: Option<String>,
    masks: Option<Vec<SegmentationMask>>,
    validation: Option<ValidationResult>,
    refined_masks: Option<Vec<SegmentationMask>>,
    report: Option<ClinicalReport>,
    receipt: Option<StorageReceipt>,
    pub(crate) ledger: RunLedger,
}

impl PipelineEnvelope {
    /// Creates an empty envelope for a validated input.
    #[must_use]
    pub fn new(run_id: Uuid, input: MedicalImageInput) -> Self {
        let audit_key = crate::utils::audit_key(&input);
        Self {
            run_id,
            input,
            audit_key,
            started_at: Utc::now(),
            standardized: None,
            prompt: None,
            masks: None,
            validation: None,
            refined_masks: None,
            report: None,
            receipt: None,
            ledger: RunLedger::default(),
        }
    }

    /// Merges `output` written by `writer`, returning the new envelope.
    ///
    /// # Errors
    ///
    /// Returns [`OutputConflictError`] if `writer` does not own the slot, the
    /// slot is already filled, or refinement changed the mask sequence.
    pub fn apply(mut self, writer: StageKind, output: StageOutput) -> Result<Self, OutputConflictError> {
        self.merge(writer, output)?;
        Ok(self)
    }

    /// Checks that `output` from `writer` may be merged.
    ///
    /// # Errors
    ///
    /// Same conditions as [`PipelineEnvelope::apply`].
    pub fn check_output(&self, writer: StageKind, output: &StageOutput) -> Result<(), OutputConflictError> {
        let slot = output.slot();
        let owner = output.producer();
        if owner != writer {
            return Err(OutputConflictError::new(
                slot,
                writer,
                format!("slot is owned by {owner}"),
            ));
        }

        let filled = match output {
            StageOutput::Preprocessed(_) => self.standardized.is_some(),
            StageOutput::Prompt(_) => self.prompt.is_some(),
            StageOutput::Segmented(_) => self.masks.is_some(),
            StageOutput::Validated(_) => self.validation.is_some(),
            StageOutput::Refined(refined) => {
                let raw = self.masks.as_deref().unwrap_or_default();
                let same_sequence = raw.len() == refined.len()
                    && raw.iter().zip(refined).all(|(a, b)| a.label == b.label);
                if !same_sequence {
                    return Err(OutputConflictError::new(
                        slot,
                        writer,
                        "refinement must keep mask count and order",
                    ));
                }
                self.refined_masks.is_some()
            }
            StageOutput::Reported(_) => self.report.is_some(),
            StageOutput::Integrated(_) => self.receipt.is_some(),
        };
        if filled {
            return Err(OutputConflictError::new(slot, writer, "slot already written"));
        }
        Ok(())
    }

    /// In-place form of [`PipelineEnvelope::apply`]; the envelope is left
    /// untouched when the write is refused.
    pub(crate) fn merge(&mut self, writer: StageKind, output: StageOutput) -> Result<(), OutputConflictError> {
        self.check_output(writer, &output)?;
        match output {
            StageOutput::Preprocessed(img) => self.standardized = Some(img),
            StageOutput::Prompt(prompt) => self.prompt = Some(prompt),
            StageOutput::Segmented(masks) => self.masks = Some(masks),
            StageOutput::Validated(v) => self.validation = Some(v),
            StageOutput::Refined(refined) => self.refined_masks = Some(refined),
            StageOutput::Reported(report) => self.report = Some(report),
            StageOutput::Integrated(receipt) => self.receipt = Some(receipt),
        }
        Ok(())
    }

    /// Run identifier.
    #[must_use]
    pub const fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// The input being processed.
    #[must_use]
    pub const fn input(&self) -> &MedicalImageInput {
        &self.input
    }

    /// Audit key derived from the input.
    #[must_use]
    pub fn audit_key(&self) -> &str {
        &self.audit_key
    }

    /// Normalized image, after preprocess.
    #[must_use]
    pub const fn standardized(&self) -> Option<&StandardizedImage> {
        self.standardized.as_ref()
    }

    /// Prompt, after generate-prompt.
    #[must_use]
    pub fn prompt(&self) -> Option<&str> {
        self.prompt.as_deref()
    }

    /// Raw masks, after inference.
    #[must_use]
    pub fn masks(&self) -> Option<&[SegmentationMask]> {
        self.masks.as_deref()
    }

    /// Validation verdict.
    #[must_use]
    pub const fn validation(&self) -> Option<&ValidationResult> {
        self.validation.as_ref()
    }

    /// Refined masks, after post-process.
    #[must_use]
    pub fn refined_masks(&self) -> Option<&[SegmentationMask]> {
        self.refined_masks.as_deref()
    }

    /// Report, after generate-report.
    #[must_use]
    pub const fn report(&self) -> Option<&ClinicalReport> {
        self.report.as_ref()
    }

    /// Storage receipt, after integrate.
    #[must_use]
    pub const fn receipt(&self) -> Option<&StorageReceipt> {
        self.receipt.as_ref()
    }

    /// Status implied by the current state.
    ///
    /// Any recorded fault fails the run; anything short of a clean `Accept`
    /// makes it partial.
    #[must_use]
    pub fn status(&self) -> ProcessingStatus {
        if !self.ledger.errors.is_empty() {
            return ProcessingStatus::Failed;
        }
        match self.validation.as_ref().map(|v| v.disposition) {
            Some(Disposition::Accept) if !self.ledger.review_required => ProcessingStatus::Success,
            _ => ProcessingStatus::Partial,
        }
    }

    /// Milliseconds since the envelope was created.
    #[must_use]
    pub fn elapsed_ms(&self) -> u64 {
        u64::try_from((Utc::now() - self.started_at).num_milliseconds()).unwrap_or(0)
    }

    /// Snapshot of the run as it stands, used to hand partial state to
    /// storage before the receipt exists.
    #[must_use]
    pub fn provisional_result(&self) -> ProcessingResult {
        let elapsed_ms = self.elapsed_ms();
        self.clone().into_result(elapsed_ms)
    }

    /// Converts the envelope into the terminal result.
    #[must_use]
    pub fn into_result(self, elapsed_ms: u64) -> ProcessingResult {
        let status = self.status();
        let masks = self.refined_masks.or(self.masks).unwrap_or_default();
        ProcessingResult {
            run_id: self.run_id,
            status,
            input: self.input,
            standardized: self.standardized,
            prompt: self.prompt,
            masks,
            validation: self.validation,
            report: self.report,
            receipt: self.receipt,
            errors: self.ledger.errors,
            trace: self.ledger.trace,
            review_required: self.ledger.review_required,
            started_at: self.started_at,
            elapsed_ms,
            audit_key: self.audit_key,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{ErrorKind, StageFault};
    use crate::models::{ImageSource, MaskData, Modality};
    use std::collections::BTreeSet;

    fn envelope() -> PipelineEnvelope {
        let input = MedicalImageInput::new("S1", "P1", Modality::Ct, ImageSource::uri("pacs://1"));
        PipelineEnvelope::new(Uuid::new_v4(), input)
    }

    fn mask(label: &str) -> SegmentationMask {
        SegmentationMask::new(label, 0.9, MaskData::Reference { uri: format!("m://{label}") })
    }

    #[test]
    fn test_apply_fills_slot() {
        let env = envelope()
            .apply(StageKind::GeneratePrompt, StageOutput::Prompt("liver & vessel".into()))
            .unwrap();
        assert_eq!(env.prompt(), Some("liver & vessel"));
    }

    #[test]
    fn test_apply_rejects_wrong_writer() {
        let err = envelope()
            .apply(StageKind::Validate, StageOutput::Segmented(vec![mask("liver")]))
            .unwrap_err();

        assert_eq!(err.slot, "masks");
        assert_eq!(err.writer, StageKind::Validate);
    }

    #[test]
    fn test_apply_rejects_second_write() {
        let env = envelope()
            .apply(StageKind::GeneratePrompt, StageOutput::Prompt("a".into()))
            .unwrap();
        let err = env
            .apply(StageKind::GeneratePrompt, StageOutput::Prompt("b".into()))
            .unwrap_err();
        assert!(err.reason.contains("already written"));
    }

    #[test]
    fn test_refinement_must_keep_order() {
        let env = envelope()
            .apply(
                StageKind::InferSegmentation,
                StageOutput::Segmented(vec![mask("liver"), mask("vessel")]),
            )
            .unwrap();

        let err = env
            .clone()
            .apply(
                StageKind::PostProcess,
                StageOutput::Refined(vec![mask("vessel"), mask("liver")]),
            )
            .unwrap_err();
        assert_eq!(err.slot, "refined_masks");

        let ok = env
            .apply(
                StageKind::PostProcess,
                StageOutput::Refined(vec![mask("liver"), mask("vessel")]),
            )
            .unwrap();
        assert_eq!(ok.refined_masks().map(<[_]>::len), Some(2));
    }

    #[test]
    fn test_status_derivation() {
        let env = envelope();
        assert_eq!(env.status(), ProcessingStatus::Partial);

        let accepted = env
            .clone()
            .apply(
                StageKind::Validate,
                StageOutput::Validated(ValidationResult::new(
                    0.9,
                    BTreeSet::new(),
                    Disposition::Accept,
                    vec![],
                )),
            )
            .unwrap();
        assert_eq!(accepted.status(), ProcessingStatus::Success);

        let mut failed = accepted;
        failed.ledger.errors.push(StageErrorRecord::from_fault(
            &StageFault::new(StageKind::Integrate, ErrorKind::Integration, "down"),
            1,
        ));
        assert_eq!(failed.status(), ProcessingStatus::Failed);
    }

    #[test]
    fn test_into_result_prefers_refined_masks() {
        let mut refined = mask("liver");
        refined.metrics = Some(crate::models::MaskMetrics {
            area_pixels: 10.0,
            coverage: 0.1,
            area_mm2: None,
            volume_mm3: None,
        });

        let result = envelope()
            .apply(StageKind::InferSegmentation, StageOutput::Segmented(vec![mask("liver")]))
            .unwrap()
            .apply(StageKind::PostProcess, StageOutput::Refined(vec![refined]))
            .unwrap()
            .into_result(5);

        assert!(result.masks[0].metrics.is_some());
        assert_eq!(result.elapsed_ms, 5);
        assert!(result.audit_key.starts_with("audit:"));
    }

    #[test]
    fn test_output_to_json() {
        let out = StageOutput::Segmented(vec![mask("lung"), mask("heart")]);
        let json = out.to_json();
        assert_eq!(json["labels"][1], "heart");
        assert_eq!(out.summary(), "2 mask(s) inferred");
    }
}
