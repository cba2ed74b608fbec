//! # Medflow
//!
//! Orchestration engine for multi-stage medical image analysis.
//!
//! Each input study runs through a fixed sequence of stages:
//!
//! - **Preprocess**: decode and normalize the image
//! - **Generate prompt**: derive segmentation targets for the modality
//! - **Infer segmentation**: call the remote segmentation service
//! - **Validate**: score the masks and decide whether the run may proceed
//! - **Post-process**: refine masks and measure them
//! - **Generate report**: compose a structured clinical report
//! - **Integrate**: archive the (possibly partial) result, exactly once
//!
//! Runs can be awaited whole, observed as a lazy progress stream, or
//! fanned out as a bounded-concurrency batch. Codecs, models, and archive
//! protocols live behind the traits in [`collaborators`].
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use medflow::prelude::*;
//!
//! let orchestrator = Orchestrator::builder(OrchestratorConfig::from_env()?)
//!     .normalizer(normalizer)
//!     .segmentation(segmentation_client)
//!     .storage(archive)
//!     .build()?;
//!
//! let result = orchestrator.process_one(input).await?;
//! println!("{}: {}", result.input.study_id(), result.status);
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod collaborators;
pub mod config;
pub mod context;
pub mod core;
pub mod errors;
pub mod events;
pub mod models;
pub mod observability;
pub mod orchestrator;
pub mod pipeline;
pub mod session;
pub mod stages;
pub mod testing;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::collaborators::{
        ClinicalStorage, ImageNormalizer, PromptBuilder, SegmentationClient,
        TemplatePromptBuilder,
    };
    pub use crate::config::{OrchestratorConfig, ReviewPolicy, StageTimeouts, ValidationConfig};
    pub use crate::core::{ProcessingStatus, ProgressEvent, StageKind, StageProgress, StageStatus};
    pub use crate::errors::{
        CollaboratorError, ConfigError, ErrorKind, InputValidationError, MedflowError,
        StageFault,
    };
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::models::{
        ClinicalReport, ImageSource, MaskData, MedicalImageInput, Modality, ProcessingResult,
        SegmentationMask, StandardizedImage, StorageReceipt, ValidationResult,
    };
    pub use crate::orchestrator::{Orchestrator, OrchestratorBuilder};
    pub use crate::pipeline::{BatchReport, BatchStatistics, ProgressStream, RetryConfig};
}

#[cfg(test)]
mod tests {
    use crate::prelude::*;
    use crate::testing::{sample_input, two_confident_masks, TestHarness, MockSegmentation};

    #[tokio::test]
    async fn test_prelude_covers_a_run() {
        let harness = TestHarness::new(MockSegmentation::returning(two_confident_masks()));
        let orchestrator: &Orchestrator = &harness.orchestrator;

        let result: ProcessingResult = orchestrator.process_one(sample_input("S1")).await.unwrap();

        assert_eq!(result.status, ProcessingStatus::Success);
        assert_eq!(result.trace.len(), StageKind::ORDER.len());
    }
}
