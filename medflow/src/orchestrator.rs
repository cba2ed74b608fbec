//! Public entry point.
//!
//! An [`Orchestrator`] is built once with its configuration and
//! collaborators, then processes inputs one at a time, as a progress stream,
//! or in batches. It holds no per-run state; concurrent calls are safe.

use crate::cancellation::CancellationToken;
use crate::collaborators::{
    ClinicalStorage, Collaborators, ImageNormalizer, PromptBuilder, SegmentationClient,
    TemplatePromptBuilder,
};
use crate::config::OrchestratorConfig;
use crate::errors::{InputValidationError, MedflowError};
use crate::events::{EventSink, NoOpEventSink};
use crate::models::{MedicalImageInput, ProcessingResult};
use crate::pipeline::{BatchCoordinator, BatchReport, ProgressStream, Sequencer};
use crate::session::SessionPool;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Builder for [`Orchestrator`].
///
/// The normalizer, segmentation client, and storage are required. The
/// prompt builder defaults to [`TemplatePromptBuilder`] and the event sink to
/// [`NoOpEventSink`].
pub struct OrchestratorBuilder {
    config: OrchestratorConfig,
    normalizer: Option<Arc<dyn ImageNormalizer>>,
    prompt_builder: Option<Arc<dyn PromptBuilder>>,
    segmentation: Option<Arc<dyn SegmentationClient>>,
    storage: Option<Arc<dyn ClinicalStorage>>,
    sink: Option<Arc<dyn EventSink>>,
}

impl OrchestratorBuilder {
    /// Starts a builder with `config`.
    #[must_use]
    pub fn new(config: OrchestratorConfig) -> Self {
        Self {
            config,
            normalizer: None,
            prompt_builder: None,
            segmentation: None,
            storage: None,
            sink: None,
        }
    }

    /// Sets the image normalizer.
    #[must_use]
    pub fn normalizer(mut self, normalizer: Arc<dyn ImageNormalizer>) -> Self {
        self.normalizer = Some(normalizer);
        self
    }

    /// Replaces the default prompt builder.
    #[must_use]
    pub fn prompt_builder(mut self, builder: Arc<dyn PromptBuilder>) -> Self {
        self.prompt_builder = Some(builder);
        self
    }

    /// Sets the segmentation client.
    #[must_use]
    pub fn segmentation(mut self, client: Arc<dyn SegmentationClient>) -> Self {
        self.segmentation = Some(client);
        self
    }

    /// Sets the clinical storage.
    #[must_use]
    pub fn storage(mut self, storage: Arc<dyn ClinicalStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Sets the lifecycle event sink.
    #[must_use]
    pub fn event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Validates the configuration and assembles the orchestrator.
    ///
    /// # Errors
    ///
    /// Returns [`MedflowError::Config`] for an invalid configuration and
    /// [`MedflowError::MissingCollaborator`] when a required collaborator
    /// was not supplied.
    pub fn build(self) -> Result<Orchestrator, MedflowError> {
        self.config.validate()?;

        let collaborators = Collaborators {
            normalizer: self
                .normalizer
                .ok_or(MedflowError::MissingCollaborator("normalizer"))?,
            prompt_builder: self
                .prompt_builder
                .unwrap_or_else(|| Arc::new(TemplatePromptBuilder::new())),
            segmentation: self
                .segmentation
                .ok_or(MedflowError::MissingCollaborator("segmentation"))?,
            storage: self
                .storage
                .ok_or(MedflowError::MissingCollaborator("storage"))?,
        };
        let sink = self.sink.unwrap_or_else(|| Arc::new(NoOpEventSink));
        let pool = SessionPool::new(self.config.sessions.max_sessions);
        let max_concurrency = self.config.batch.max_concurrency;

        debug!(
            pipeline = %self.config.pipeline_name,
            max_sessions = pool.capacity(),
            max_concurrency,
            "Orchestrator built"
        );
        let sequencer = Sequencer::new(Arc::new(self.config), collaborators, pool, sink);
        Ok(Orchestrator {
            batch: BatchCoordinator::new(sequencer.clone(), max_concurrency),
            sequencer,
        })
    }
}

impl fmt::Debug for OrchestratorBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrchestratorBuilder")
            .field("config", &self.config)
            .field("normalizer", &self.normalizer.is_some())
            .field("prompt_builder", &self.prompt_builder.is_some())
            .field("segmentation", &self.segmentation.is_some())
            .field("storage", &self.storage.is_some())
            .finish_non_exhaustive()
    }
}

/// Processes medical images through the seven-stage pipeline.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    sequencer: Sequencer,
    batch: BatchCoordinator,
}

impl Orchestrator {
    /// Starts a builder.
    #[must_use]
    pub fn builder(config: OrchestratorConfig) -> OrchestratorBuilder {
        OrchestratorBuilder::new(config)
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &OrchestratorConfig {
        self.sequencer.config()
    }

    /// The shared session pool.
    #[must_use]
    pub const fn session_pool(&self) -> &SessionPool {
        self.sequencer.session_pool()
    }

    /// Runs one input to completion.
    ///
    /// Stage faults never surface as errors; they are recorded in the result.
    ///
    /// # Errors
    ///
    /// Returns [`InputValidationError`] if the input is rejected before the
    /// run starts.
    pub async fn process_one(
        &self,
        input: MedicalImageInput,
    ) -> Result<ProcessingResult, InputValidationError> {
        self.process_one_with_cancel(input, CancellationToken::shared())
            .await
    }

    /// Runs one input, stopping early once `token` is cancelled.
    ///
    /// A cancelled run still reaches storage and returns a `Failed` result
    /// with a `Cancelled` fault.
    ///
    /// # Errors
    ///
    /// Returns [`InputValidationError`] if the input is rejected.
    pub async fn process_one_with_cancel(
        &self,
        input: MedicalImageInput,
        token: Arc<CancellationToken>,
    ) -> Result<ProcessingResult, InputValidationError> {
        input.validate()?;
        Ok(self.sequencer.run(input, token).await)
    }

    /// Returns a lazy stream of per-stage progress and the final result.
    ///
    /// # Errors
    ///
    /// Returns [`InputValidationError`] if the input is rejected.
    pub fn process_one_streaming(
        &self,
        input: MedicalImageInput,
    ) -> Result<ProgressStream, InputValidationError> {
        self.process_one_streaming_with_cancel(input, CancellationToken::shared())
    }

    /// Streaming form of [`Orchestrator::process_one_with_cancel`].
    ///
    /// # Errors
    ///
    /// Returns [`InputValidationError`] if the input is rejected.
    pub fn process_one_streaming_with_cancel(
        &self,
        input: MedicalImageInput,
        token: Arc<CancellationToken>,
    ) -> Result<ProgressStream, InputValidationError> {
        input.validate()?;
        let study_id = input.study_id().to_string();
        Ok(ProgressStream::new(study_id, self.sequencer.stream(input, token)))
    }

    /// Processes a batch; one result per input, in input order.
    ///
    /// Invalid inputs yield `Failed` results instead of aborting the batch.
    pub async fn process_batch(&self, inputs: Vec<MedicalImageInput>) -> BatchReport {
        self.batch.run(inputs).await
    }
}
