//! Remote segmentation stage.

use super::{required, Stage};
use crate::collaborators::SegmentationClient;
use crate::context::{PipelineEnvelope, StageContext, StageOutput};
use crate::core::StageKind;
use crate::errors::{ErrorKind, StageFault};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Sends the normalized image and prompt to a [`SegmentationClient`].
///
/// The response is checked before it reaches the envelope: every mask must
/// carry a non-empty label and a confidence within `[0, 1]`.
pub struct InferenceStage {
    client: Arc<dyn SegmentationClient>,
}

impl InferenceStage {
    /// Creates the stage.
    #[must_use]
    pub fn new(client: Arc<dyn SegmentationClient>) -> Self {
        Self { client }
    }
}

impl fmt::Debug for InferenceStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InferenceStage").finish_non_exhaustive()
    }
}

#[async_trait]
impl Stage for InferenceStage {
    fn kind(&self) -> StageKind {
        StageKind::InferSegmentation
    }

    fn uses_session(&self) -> bool {
        true
    }

    async fn execute(
        &self,
        envelope: &PipelineEnvelope,
        ctx: &StageContext<'_>,
    ) -> Result<StageOutput, StageFault> {
        let image = required(envelope.standardized(), self.kind(), "a normalized image")?;
        let prompt = required(envelope.prompt(), self.kind(), "a prompt")?;

        let masks = self
            .client
            .infer(image, prompt)
            .await
            .map_err(|e| StageFault::from_collaborator(self.kind(), &e))?;

        for (i, mask) in masks.iter().enumerate() {
            if mask.label.trim().is_empty() {
                return Err(StageFault::new(
                    self.kind(),
                    ErrorKind::MalformedResponse,
                    format!("mask {i} has no label"),
                ));
            }
            if !mask.has_valid_confidence() {
                return Err(StageFault::new(
                    self.kind(),
                    ErrorKind::MalformedResponse,
                    format!("mask {i} ('{}') has confidence {}", mask.label, mask.confidence),
                ));
            }
        }

        debug!(
            masks = masks.len(),
            attempt = ctx.attempt,
            session = ?ctx.session_id(),
            "Segmentation received"
        );
        Ok(StageOutput::Segmented(masks))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::MockSegmentationClient;
    use crate::config::OrchestratorConfig;
    use crate::errors::CollaboratorError;
    use crate::models::{
        ImageSource, MaskData, MedicalImageInput, Modality, SegmentationMask, StandardizedImage,
    };
    use uuid::Uuid;

    fn ready_envelope() -> PipelineEnvelope {
        let input = MedicalImageInput::new("S1", "P1", Modality::Ct, ImageSource::uri("pacs://1"));
        PipelineEnvelope::new(Uuid::new_v4(), input)
            .apply(
                StageKind::Preprocess,
                StageOutput::Preprocessed(StandardizedImage::new("norm://1", Modality::Ct, 64, 64)),
            )
            .unwrap()
            .apply(StageKind::GeneratePrompt, StageOutput::Prompt("liver & vessel".into()))
            .unwrap()
    }

    fn reference(label: &str, confidence: f64) -> SegmentationMask {
        SegmentationMask::new(label, confidence, MaskData::Reference { uri: format!("m://{label}") })
    }

    async fn run(client: MockSegmentationClient, env: &PipelineEnvelope) -> Result<StageOutput, StageFault> {
        let stage = InferenceStage::new(Arc::new(client));
        let config = OrchestratorConfig::default();
        let ctx = StageContext::new(env.run_id(), StageKind::InferSegmentation, &config);
        stage.execute(env, &ctx).await
    }

    #[tokio::test]
    async fn test_returns_masks_in_order() {
        let mut client = MockSegmentationClient::new();
        client
            .expect_infer()
            .withf(|image, prompt| image.reference == "norm://1" && prompt == "liver & vessel")
            .times(1)
            .returning(|_, _| Ok(vec![reference("liver", 0.9), reference("vessel", 0.8)]));

        let out = run(client, &ready_envelope()).await.unwrap();
        let StageOutput::Segmented(masks) = out else {
            panic!("expected masks");
        };
        let labels: Vec<_> = masks.iter().map(|m| m.label.as_str()).collect();
        assert_eq!(labels, vec!["liver", "vessel"]);
    }

    #[tokio::test]
    async fn test_out_of_range_confidence_is_malformed() {
        let mut client = MockSegmentationClient::new();
        client
            .expect_infer()
            .returning(|_, _| Ok(vec![reference("liver", 1.5)]));

        let fault = run(client, &ready_envelope()).await.unwrap_err();
        assert_eq!(fault.kind, ErrorKind::MalformedResponse);
    }

    #[tokio::test]
    async fn test_transient_error_is_retryable() {
        let mut client = MockSegmentationClient::new();
        client
            .expect_infer()
            .returning(|_, _| Err(CollaboratorError::transient_inference("503")));

        let fault = run(client, &ready_envelope()).await.unwrap_err();
        assert_eq!(fault.kind, ErrorKind::Inference);
        assert!(fault.retryable);
    }

    #[tokio::test]
    async fn test_missing_prompt_is_internal() {
        let input = MedicalImageInput::new("S1", "P1", Modality::Ct, ImageSource::uri("pacs://1"));
        let env = PipelineEnvelope::new(Uuid::new_v4(), input);

        let fault = run(MockSegmentationClient::new(), &env).await.unwrap_err();
        assert_eq!(fault.kind, ErrorKind::Internal);
    }
}
