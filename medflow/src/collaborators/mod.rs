//! Interfaces to the external systems the pipeline delegates to.
//!
//! The core owns no codec, model, or wire protocol. Each collaborator is an
//! `async_trait` object held as `Arc<dyn _>` by the stage that calls it.

mod prompts;

pub use prompts::{split_targets, TemplatePromptBuilder};

pub use crate::models::{StandardizedImage, StorageReceipt};

use crate::errors::CollaboratorError;
use crate::models::{ImageSource, Modality, ProcessingResult, SegmentationMask};
use async_trait::async_trait;
use std::sync::Arc;

/// Decodes and normalizes raw images.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ImageNormalizer: Send + Sync {
    /// Decodes `source` and resamples it so its longest edge is
    /// `target_size` pixels.
    ///
    /// Fails with [`CollaboratorError::Format`] for unreadable input.
    async fn normalize(
        &self,
        source: &ImageSource,
        modality: Modality,
        target_size: u32,
    ) -> Result<StandardizedImage, CollaboratorError>;
}

/// Builds segmentation prompts.
#[async_trait]
pub trait PromptBuilder: Send + Sync {
    /// Returns `&`-separated segmentation targets.
    ///
    /// Fails with [`CollaboratorError::InvalidModality`] when no prompt can
    /// be built.
    async fn build_prompt(
        &self,
        modality: Modality,
        body_part: Option<&str>,
        clinical_context: Option<&str>,
    ) -> Result<String, CollaboratorError>;
}

/// Remote segmentation inference.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SegmentationClient: Send + Sync {
    /// Segments `image` for the targets in `prompt`, returning masks in
    /// prompt order.
    async fn infer(
        &self,
        image: &StandardizedImage,
        prompt: &str,
    ) -> Result<Vec<SegmentationMask>, CollaboratorError>;
}

/// Clinical storage / archive integration.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ClinicalStorage: Send + Sync {
    /// Archives the (possibly partial) result of a run.
    ///
    /// Called exactly once per run, whatever the outcome.
    async fn store(&self, result: &ProcessingResult) -> Result<StorageReceipt, CollaboratorError>;
}

/// The four collaborators a pipeline needs, bundled for construction.
#[derive(Clone)]
pub struct Collaborators {
    /// Image normalizer.
    pub normalizer: Arc<dyn ImageNormalizer>,
    /// Prompt builder.
    pub prompt_builder: Arc<dyn PromptBuilder>,
    /// Segmentation inference client.
    pub segmentation: Arc<dyn SegmentationClient>,
    /// Clinical storage.
    pub storage: Arc<dyn ClinicalStorage>,
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}
