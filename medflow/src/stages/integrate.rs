//! Clinical storage integration.

use super::Stage;
use crate::collaborators::ClinicalStorage;
use crate::context::{PipelineEnvelope, StageContext, StageOutput};
use crate::core::StageKind;
use crate::errors::StageFault;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tracing::info;

/// Hands the run as it stands to [`ClinicalStorage`].
///
/// Runs on every path, including rejected and failed runs, so the archive
/// sees each submission exactly once.
pub struct IntegrateStage {
    storage: Arc<dyn ClinicalStorage>,
}

impl IntegrateStage {
    /// Creates the stage.
    #[must_use]
    pub fn new(storage: Arc<dyn ClinicalStorage>) -> Self {
        Self { storage }
    }
}

impl fmt::Debug for IntegrateStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IntegrateStage").finish_non_exhaustive()
    }
}

#[async_trait]
impl Stage for IntegrateStage {
    fn kind(&self) -> StageKind {
        StageKind::Integrate
    }

    fn uses_session(&self) -> bool {
        true
    }

    async fn execute(
        &self,
        envelope: &PipelineEnvelope,
        _ctx: &StageContext<'_>,
    ) -> Result<StageOutput, StageFault> {
        let snapshot = envelope.provisional_result();
        let receipt = self
            .storage
            .store(&snapshot)
            .await
            .map_err(|e| StageFault::from_collaborator(self.kind(), &e))?;

        info!(
            receipt_id = %receipt.receipt_id,
            audit_key = %snapshot.audit_key,
            status = %snapshot.status,
            "Result archived"
        );
        Ok(StageOutput::Integrated(receipt))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::MockClinicalStorage;
    use crate::config::OrchestratorConfig;
    use crate::core::ProcessingStatus;
    use crate::errors::{CollaboratorError, ErrorKind};
    use crate::models::{ImageSource, MedicalImageInput, Modality, StorageReceipt};
    use uuid::Uuid;

    fn envelope() -> PipelineEnvelope {
        let input = MedicalImageInput::new("S1", "P1", Modality::Pet, ImageSource::uri("pacs://1"));
        PipelineEnvelope::new(Uuid::new_v4(), input)
    }

    #[tokio::test]
    async fn test_stores_snapshot() {
        let env = envelope();
        let expected_key = env.audit_key().to_string();
        let mut storage = MockClinicalStorage::new();
        storage
            .expect_store()
            .withf(move |r| r.audit_key == expected_key && r.status == ProcessingStatus::Partial)
            .times(1)
            .returning(|_| Ok(StorageReceipt::new("rcpt-1", "archive://S1")));

        let stage = IntegrateStage::new(Arc::new(storage));
        let config = OrchestratorConfig::default();
        let ctx = StageContext::new(env.run_id(), StageKind::Integrate, &config);

        let out = stage.execute(&env, &ctx).await.unwrap();
        assert!(matches!(out, StageOutput::Integrated(r) if r.receipt_id == "rcpt-1"));
    }

    #[tokio::test]
    async fn test_storage_failure_maps_to_integration_fault() {
        let mut storage = MockClinicalStorage::new();
        storage
            .expect_store()
            .returning(|_| Err(CollaboratorError::integration("archive offline")));

        let stage = IntegrateStage::new(Arc::new(storage));
        let config = OrchestratorConfig::default();
        let env = envelope();
        let ctx = StageContext::new(env.run_id(), StageKind::Integrate, &config);

        let fault = stage.execute(&env, &ctx).await.unwrap_err();
        assert_eq!(fault.kind, ErrorKind::Integration);
    }
}
