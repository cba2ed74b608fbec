//! Fixed-order stage sequencer.
//!
//! A [`PipelineRun`] is an explicit state machine: each call to
//! [`PipelineRun::step`] executes (or skips) exactly one stage and reports
//! its progress. [`Sequencer::run`] drives a run to completion;
//! [`Sequencer::stream`] exposes the same steps as a lazy stream.
//!
//! Per stage the sequencer:
//! 1. skips it if an earlier fault aborted the run (integrate always runs)
//!    or if the validation gate holds gate-sensitive stages;
//! 2. checks out a pooled session if the stage needs one;
//! 3. executes it under the stage time bound, retrying retryable faults,
//!    raced against the run's cancellation token (integrate is not raced);
//! 4. merges the output into the envelope, or records the fault.

use super::gating::GateDecision;
use super::retry::with_retry;
use crate::cancellation::CancellationToken;
use crate::collaborators::Collaborators;
use crate::config::OrchestratorConfig;
use crate::context::{PipelineEnvelope, StageContext, StageOutput};
use crate::core::{ProgressEvent, StageKind, StageProgress, StageStatus};
use crate::errors::StageFault;
use crate::events::{names, EventSink};
use crate::models::{MedicalImageInput, ProcessingResult, StageErrorRecord, StageTrace};
use crate::observability::{run_span, stage_span, SpanTimer};
use crate::session::{SessionLease, SessionPool};
use crate::stages::{
    InferenceStage, IntegrateStage, PipelineStage, PostProcessStage, PreprocessStage, PromptStage,
    ReportStage, Stage, ValidateStage,
};
use futures::stream::{self, BoxStream, StreamExt};
use futures::FutureExt;
use serde_json::json;
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn, Instrument, Span};
use uuid::Uuid;

/// Runs the seven stages in order for one input at a time.
///
/// Cheap to clone; clones share stages, configuration, pool, and sink.
#[derive(Clone)]
pub struct Sequencer {
    stages: Arc<[PipelineStage]>,
    config: Arc<OrchestratorConfig>,
    pool: SessionPool,
    sink: Arc<dyn EventSink>,
}

impl fmt::Debug for Sequencer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sequencer")
            .field("stages", &self.stages.iter().map(Stage::kind).collect::<Vec<_>>())
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

impl Sequencer {
    /// Creates a sequencer wired to `collaborators`.
    #[must_use]
    pub fn new(
        config: Arc<OrchestratorConfig>,
        collaborators: Collaborators,
        pool: SessionPool,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let stages: Vec<PipelineStage> = vec![
            PipelineStage::Preprocess(PreprocessStage::new(collaborators.normalizer)),
            PipelineStage::GeneratePrompt(PromptStage::new(collaborators.prompt_builder)),
            PipelineStage::InferSegmentation(InferenceStage::new(collaborators.segmentation)),
            PipelineStage::Validate(ValidateStage),
            PipelineStage::PostProcess(PostProcessStage),
            PipelineStage::GenerateReport(ReportStage),
            PipelineStage::Integrate(IntegrateStage::new(collaborators.storage)),
        ];
        Self {
            stages: stages.into(),
            config,
            pool,
            sink,
        }
    }

    /// The configuration runs execute under.
    #[must_use]
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// The shared session pool.
    #[must_use]
    pub const fn session_pool(&self) -> &SessionPool {
        &self.pool
    }

    /// The event sink.
    #[must_use]
    pub fn event_sink(&self) -> Arc<dyn EventSink> {
        Arc::clone(&self.sink)
    }

    /// Prepares a run without executing anything.
    #[must_use]
    pub fn start(&self, input: MedicalImageInput, token: Arc<CancellationToken>) -> PipelineRun {
        let run_id = Uuid::new_v4();
        let span = run_span(&self.config.pipeline_name, run_id, &input);
        PipelineRun {
            sequencer: self.clone(),
            envelope: PipelineEnvelope::new(run_id, input),
            token,
            span,
            next: 0,
            started: false,
            aborted: false,
            gate: None,
        }
    }

    /// Runs every stage and returns the terminal result.
    pub async fn run(&self, input: MedicalImageInput, token: Arc<CancellationToken>) -> ProcessingResult {
        self.start(input, token).finish().await
    }

    /// Returns a lazy stream of one event per stage followed by the result.
    ///
    /// Nothing executes until the stream is polled. Dropping it drops the
    /// in-flight stage, which releases any session it holds.
    #[must_use]
    pub fn stream(
        &self,
        input: MedicalImageInput,
        token: Arc<CancellationToken>,
    ) -> BoxStream<'static, ProgressEvent> {
        let run = self.start(input, token);
        stream::unfold(Some(run), |state| async move {
            let mut run = state?;
            match run.step().await {
                Some(progress) => Some((ProgressEvent::Stage(progress), Some(run))),
                None => Some((ProgressEvent::Completed(Box::new(run.into_result())), None)),
            }
        })
        .fuse()
        .boxed()
    }
}

fn panic_fault(kind: StageKind, payload: &(dyn Any + Send)) -> StageFault {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string());
    error!(stage = %kind, panic = %detail, "Stage panicked");
    StageFault::internal(kind, format!("stage panicked: {detail}"))
}

/// One in-flight run.
#[derive(Debug)]
pub struct PipelineRun {
    sequencer: Sequencer,
    envelope: PipelineEnvelope,
    token: Arc<CancellationToken>,
    span: Span,
    next: usize,
    started: bool,
    aborted: bool,
    gate: Option<GateDecision>,
}

impl PipelineRun {
    /// Run identifier.
    #[must_use]
    pub const fn run_id(&self) -> Uuid {
        self.envelope.run_id()
    }

    /// The envelope as it stands.
    #[must_use]
    pub const fn envelope(&self) -> &PipelineEnvelope {
        &self.envelope
    }

    /// Stage the next step will handle, `None` once every stage has run.
    #[must_use]
    pub fn next_stage(&self) -> Option<StageKind> {
        self.sequencer.stages.get(self.next).map(Stage::kind)
    }

    /// Executes or skips the next stage.
    ///
    /// Returns `None` once all seven stages have been handled.
    pub async fn step(&mut self) -> Option<StageProgress> {
        let span = self.span.clone();
        self.advance().instrument(span).await
    }

    /// Handles every remaining stage and returns the terminal result.
    pub async fn finish(mut self) -> ProcessingResult {
        while self.step().await.is_some() {}
        self.into_result()
    }

    async fn advance(&mut self) -> Option<StageProgress> {
        self.announce();
        let sequencer = self.sequencer.clone();
        let stage = sequencer.stages.get(self.next)?;
        self.next += 1;
        let kind = stage.kind();

        if let Some(note) = self.skip_reason(stage) {
            return Some(self.record_skip(kind, note).await);
        }

        self.sequencer
            .sink
            .emit(
                names::STAGE_STARTED,
                Some(json!({ "run_id": self.run_id(), "stage": kind })),
            )
            .await;

        let timer = SpanTimer::start(kind);
        let attempts = AtomicU32::new(0);
        let result = self
            .execute(stage, &attempts)
            .instrument(stage_span(kind))
            .await;
        let attempts = attempts.into_inner();
        let duration_ms = timer.finish();

        let merged = result.and_then(|output| {
            let message = output.summary();
            let data = output.to_json();
            self.envelope.merge(kind, output).map_err(StageFault::from)?;
            Ok((message, data))
        });

        Some(match merged {
            Ok((message, data)) => {
                self.record_completion(kind, message, data, attempts, duration_ms)
                    .await
            }
            Err(fault) => self.record_failure(fault, attempts, duration_ms).await,
        })
    }

    async fn execute(
        &self,
        stage: &PipelineStage,
        attempts: &AtomicU32,
    ) -> Result<StageOutput, StageFault> {
        let kind = stage.kind();
        let config = self.sequencer.config.as_ref();
        let limit = config.timeouts.for_stage(kind);
        let envelope = &self.envelope;

        let attempt_loop = async {
            let lease = if stage.uses_session() {
                let lease = self
                    .sequencer
                    .pool
                    .acquire()
                    .await
                    .map_err(|e| StageFault::internal(kind, e.to_string()))?;
                Some(lease)
            } else {
                None
            };
            let session = lease.as_ref().and_then(SessionLease::session);

            with_retry(
                &config.retry,
                kind.as_str(),
                |fault: &StageFault| fault.retryable,
                || {
                    let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                    let ctx = StageContext::new(envelope.run_id(), kind, config)
                        .with_session(session)
                        .with_attempt(attempt);
                    async move {
                        AssertUnwindSafe(stage.execute(envelope, &ctx))
                            .catch_unwind()
                            .await
                            .unwrap_or_else(|payload| Err(panic_fault(kind, payload.as_ref())))
                    }
                },
            )
            .await
            .result
        };

        let bounded = async {
            tokio::time::timeout(limit, attempt_loop)
                .await
                .unwrap_or_else(|_| Err(StageFault::timeout(kind, limit)))
        };

        if kind == StageKind::Integrate {
            return bounded.await;
        }

        tokio::select! {
            biased;
            () = self.token.cancelled() => {
                let reason = self.token.reason().unwrap_or_default();
                Err(StageFault::cancelled(kind, &reason))
            }
            result = bounded => result,
        }
    }

    fn skip_reason(&self, stage: &PipelineStage) -> Option<String> {
        let kind = stage.kind();
        if self.aborted && kind != StageKind::Integrate {
            return Some("skipped after an earlier fault".to_string());
        }
        match self.gate {
            Some(decision) if stage.gate_sensitive() && decision.skips_gated_stages() => {
                Some(format!("skipped by validation gate ({decision})"))
            }
            _ => None,
        }
    }

    fn announce(&mut self) {
        if self.started {
            return;
        }
        self.started = true;
        let input = self.envelope.input();
        info!(study_id = %input.study_id(), "Pipeline run started");
        self.sequencer.sink.try_emit(
            names::PIPELINE_STARTED,
            Some(json!({
                "run_id": self.envelope.run_id(),
                "pipeline": self.sequencer.config.pipeline_name,
                "study_id": input.study_id(),
                "modality": input.modality(),
                "audit_key": self.envelope.audit_key(),
            })),
        );
    }

    async fn record_skip(&mut self, kind: StageKind, note: String) -> StageProgress {
        debug!(stage = %kind, reason = %note, "Stage skipped");
        self.envelope.ledger.trace.push(StageTrace {
            stage: kind,
            status: StageStatus::Skipped,
            duration_ms: 0,
            attempts: 0,
            note: Some(note.clone()),
        });
        let progress = StageProgress {
            run_id: self.run_id(),
            stage: kind,
            status: StageStatus::Skipped,
            message: note,
            data: None,
            duration_ms: 0,
        };
        self.sequencer
            .sink
            .emit(names::STAGE_SKIPPED, Some(json!(progress.to_dict())))
            .await;
        progress
    }

    async fn record_completion(
        &mut self,
        kind: StageKind,
        message: String,
        data: serde_json::Value,
        attempts: u32,
        duration_ms: u64,
    ) -> StageProgress {
        debug!(stage = %kind, duration_ms, attempts, "Stage completed");
        self.envelope.ledger.trace.push(StageTrace {
            stage: kind,
            status: StageStatus::Completed,
            duration_ms,
            attempts,
            note: None,
        });
        if kind == StageKind::Validate {
            self.apply_gate().await;
        }

        let progress = StageProgress {
            run_id: self.run_id(),
            stage: kind,
            status: StageStatus::Completed,
            message,
            data: Some(data),
            duration_ms,
        };
        self.sequencer
            .sink
            .emit(names::STAGE_COMPLETED, Some(json!(progress.to_dict())))
            .await;
        progress
    }

    async fn record_failure(&mut self, fault: StageFault, attempts: u32, duration_ms: u64) -> StageProgress {
        warn!(
            stage = %fault.stage,
            kind = %fault.kind,
            attempts,
            error = %fault.message,
            "Stage failed"
        );
        self.aborted = true;
        self.envelope
            .ledger
            .errors
            .push(StageErrorRecord::from_fault(&fault, attempts));
        self.envelope.ledger.trace.push(StageTrace {
            stage: fault.stage,
            status: StageStatus::Failed,
            duration_ms,
            attempts,
            note: Some(fault.message.clone()),
        });

        let progress = StageProgress {
            run_id: self.run_id(),
            stage: fault.stage,
            status: StageStatus::Failed,
            message: fault.to_string(),
            data: Some(json!(fault.to_dict())),
            duration_ms,
        };
        self.sequencer
            .sink
            .emit(names::STAGE_FAILED, Some(json!(progress.to_dict())))
            .await;
        progress
    }

    async fn apply_gate(&mut self) {
        let Some(validation) = self.envelope.validation() else {
            return;
        };
        let disposition = validation.disposition;
        let confidence = validation.aggregate_confidence;
        let decision = GateDecision::decide(disposition, self.sequencer.config.review_policy);
        self.gate = Some(decision);
        if decision.requires_review() {
            self.envelope.ledger.review_required = true;
        }
        if decision == GateDecision::Proceed {
            return;
        }

        info!(
            decision = %decision,
            disposition = %disposition,
            aggregate_confidence = confidence,
            "Validation gate engaged"
        );
        self.sequencer
            .sink
            .emit(
                names::PIPELINE_GATED,
                Some(json!({
                    "run_id": self.run_id(),
                    "decision": decision.as_str(),
                    "disposition": disposition,
                    "aggregate_confidence": confidence,
                })),
            )
            .await;
    }

    fn into_result(self) -> ProcessingResult {
        let _entered = self.span.enter();
        let elapsed_ms = self.envelope.elapsed_ms();
        let result = self.envelope.into_result(elapsed_ms);

        info!(
            status = %result.status,
            elapsed_ms,
            errors = result.errors.len(),
            review_required = result.review_required,
            "Pipeline run finished"
        );
        self.sequencer.sink.try_emit(
            names::PIPELINE_COMPLETED,
            Some(json!({
                "run_id": result.run_id,
                "status": result.status,
                "elapsed_ms": elapsed_ms,
                "review_required": result.review_required,
                "audit_key": result.audit_key,
            })),
        );
        result
    }
}
