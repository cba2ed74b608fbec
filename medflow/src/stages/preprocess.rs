//! Image normalization stage.

use super::Stage;
use crate::collaborators::ImageNormalizer;
use crate::context::{PipelineEnvelope, StageContext, StageOutput};
use crate::core::StageKind;
use crate::errors::{ErrorKind, StageFault};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Decodes and normalizes the input image through an [`ImageNormalizer`].
///
/// Spacing the normalizer leaves unset is filled from the input metadata
/// (`pixel_spacing_mm`, `slice_thickness_mm`).
pub struct PreprocessStage {
    normalizer: Arc<dyn ImageNormalizer>,
}

impl PreprocessStage {
    /// Creates the stage.
    #[must_use]
    pub fn new(normalizer: Arc<dyn ImageNormalizer>) -> Self {
        Self { normalizer }
    }
}

impl fmt::Debug for PreprocessStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreprocessStage").finish_non_exhaustive()
    }
}

#[async_trait]
impl Stage for PreprocessStage {
    fn kind(&self) -> StageKind {
        StageKind::Preprocess
    }

    async fn execute(
        &self,
        envelope: &PipelineEnvelope,
        ctx: &StageContext<'_>,
    ) -> Result<StageOutput, StageFault> {
        let input = envelope.input();
        let mut image = self
            .normalizer
            .normalize(input.source(), input.modality(), ctx.config.target_image_size)
            .await
            .map_err(|e| StageFault::from_collaborator(self.kind(), &e))?;

        if image.width == 0 || image.height == 0 {
            return Err(StageFault::new(
                self.kind(),
                ErrorKind::Format,
                format!("normalizer returned a {}x{} image", image.width, image.height),
            ));
        }

        if image.pixel_spacing_mm.is_none() {
            image.pixel_spacing_mm = input.metadata_f64("pixel_spacing_mm");
        }
        if image.slice_thickness_mm.is_none() {
            image.slice_thickness_mm = input.metadata_f64("slice_thickness_mm");
        }

        debug!(
            reference = %image.reference,
            width = image.width,
            height = image.height,
            "Image normalized"
        );
        Ok(StageOutput::Preprocessed(image))
    }
}
