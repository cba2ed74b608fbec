//! Prompt construction stage.

use super::Stage;
use crate::collaborators::{split_targets, PromptBuilder};
use crate::context::{PipelineEnvelope, StageContext, StageOutput};
use crate::core::StageKind;
use crate::errors::{ErrorKind, StageFault};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Builds the segmentation prompt from modality, body part, and context.
pub struct PromptStage {
    builder: Arc<dyn PromptBuilder>,
}

impl PromptStage {
    /// Creates the stage.
    #[must_use]
    pub fn new(builder: Arc<dyn PromptBuilder>) -> Self {
        Self { builder }
    }
}

impl fmt::Debug for PromptStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PromptStage").finish_non_exhaustive()
    }
}

#[async_trait]
impl Stage for PromptStage {
    fn kind(&self) -> StageKind {
        StageKind::GeneratePrompt
    }

    async fn execute(
        &self,
        envelope: &PipelineEnvelope,
        _ctx: &StageContext<'_>,
    ) -> Result<StageOutput, StageFault> {
        let input = envelope.input();
        let prompt = self
            .builder
            .build_prompt(input.modality(), input.body_part(), input.clinical_context())
            .await
            .map_err(|e| StageFault::from_collaborator(self.kind(), &e))?;

        let targets = split_targets(&prompt);
        if targets.is_empty() {
            return Err(StageFault::new(
                self.kind(),
                ErrorKind::InvalidInput,
                "prompt names no segmentation targets",
            ));
        }
        Ok(StageOutput::Prompt(targets.join(" & ")))
    }
}
