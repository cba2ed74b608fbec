//! The stage contract and the seven pipeline stages.
//!
//! Every stage reads the [`PipelineEnvelope`] by reference and returns one
//! typed [`StageOutput`] or a fatal [`StageFault`]. Stages never write the
//! envelope and never decide what runs next; ordering and gating belong to
//! the sequencer.

mod inference;
mod integrate;
mod postprocess;
mod preprocess;
mod prompt;
mod report;
mod validate;

pub use inference::InferenceStage;
pub use integrate::IntegrateStage;
pub use postprocess::PostProcessStage;
pub use preprocess::PreprocessStage;
pub use prompt::PromptStage;
pub use report::ReportStage;
pub use validate::{assess, ValidateStage};

use crate::context::{PipelineEnvelope, StageContext, StageOutput};
use crate::core::StageKind;
use crate::errors::StageFault;
use async_trait::async_trait;
use std::fmt::Debug;

/// Trait implemented by every pipeline stage.
#[async_trait]
pub trait Stage: Send + Sync + Debug {
    /// Which stage this is.
    fn kind(&self) -> StageKind;

    /// Whether a reject (or held review) disposition skips this stage.
    fn gate_sensitive(&self) -> bool {
        false
    }

    /// Whether the stage needs a pooled collaborator session.
    fn uses_session(&self) -> bool {
        false
    }

    /// Runs the stage against the envelope.
    ///
    /// Must be safe to call again with the same envelope when the returned
    /// fault is retryable.
    async fn execute(
        &self,
        envelope: &PipelineEnvelope,
        ctx: &StageContext<'_>,
    ) -> Result<StageOutput, StageFault>;
}

/// The closed set of pipeline stages.
#[derive(Debug)]
pub enum PipelineStage {
    /// Image normalization.
    Preprocess(PreprocessStage),
    /// Prompt construction.
    GeneratePrompt(PromptStage),
    /// Remote segmentation.
    InferSegmentation(InferenceStage),
    /// Quality gate.
    Validate(ValidateStage),
    /// Refinement and measurement.
    PostProcess(PostProcessStage),
    /// Report generation.
    GenerateReport(ReportStage),
    /// Storage integration.
    Integrate(IntegrateStage),
}

impl PipelineStage {
    /// Borrows the stage as a trait object.
    #[must_use]
    pub fn as_stage(&self) -> &dyn Stage {
        match self {
            Self::Preprocess(s) => s,
            Self::GeneratePrompt(s) => s,
            Self::InferSegmentation(s) => s,
            Self::Validate(s) => s,
            Self::PostProcess(s) => s,
            Self::GenerateReport(s) => s,
            Self::Integrate(s) => s,
        }
    }
}

#[async_trait]
impl Stage for PipelineStage {
    fn kind(&self) -> StageKind {
        self.as_stage().kind()
    }

    fn gate_sensitive(&self) -> bool {
        self.as_stage().gate_sensitive()
    }

    fn uses_session(&self) -> bool {
        self.as_stage().uses_session()
    }

    async fn execute(
        &self,
        envelope: &PipelineEnvelope,
        ctx: &StageContext<'_>,
    ) -> Result<StageOutput, StageFault> {
        self.as_stage().execute(envelope, ctx).await
    }
}

/// Reads a field an earlier stage guarantees, or raises an internal fault.
pub(crate) fn required<T>(value: Option<T>, stage: StageKind, what: &str) -> Result<T, StageFault> {
    value.ok_or_else(|| StageFault::internal(stage, format!("envelope is missing {what}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{
        MockClinicalStorage, MockImageNormalizer, MockSegmentationClient, TemplatePromptBuilder,
    };
    use std::sync::Arc;

    fn all_stages() -> Vec<PipelineStage> {
        vec![
            PipelineStage::Preprocess(PreprocessStage::new(Arc::new(MockImageNormalizer::new()))),
            PipelineStage::GeneratePrompt(PromptStage::new(Arc::new(TemplatePromptBuilder::new()))),
            PipelineStage::InferSegmentation(InferenceStage::new(Arc::new(
                MockSegmentationClient::new(),
            ))),
            PipelineStage::Validate(ValidateStage),
            PipelineStage::PostProcess(PostProcessStage),
            PipelineStage::GenerateReport(ReportStage),
            PipelineStage::Integrate(IntegrateStage::new(Arc::new(MockClinicalStorage::new()))),
        ]
    }

    #[test]
    fn test_stage_kinds_follow_order() {
        let kinds: Vec<_> = all_stages().iter().map(Stage::kind).collect();
        assert_eq!(kinds, StageKind::ORDER.to_vec());
    }

    #[test]
    fn test_gate_and_session_flags() {
        let stages = all_stages();
        let gated: Vec<_> = stages.iter().filter(|s| s.gate_sensitive()).map(Stage::kind).collect();
        let pooled: Vec<_> = stages.iter().filter(|s| s.uses_session()).map(Stage::kind).collect();

        assert_eq!(gated, vec![StageKind::PostProcess, StageKind::GenerateReport]);
        assert_eq!(pooled, vec![StageKind::InferSegmentation, StageKind::Integrate]);
    }

    #[test]
    fn test_required_reports_internal_fault() {
        let fault = required::<u8>(None, StageKind::Validate, "masks").unwrap_err();
        assert_eq!(fault.kind, crate::errors::ErrorKind::Internal);
        assert!(fault.message.contains("masks"));
    }
}
