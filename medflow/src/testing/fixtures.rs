//! Inputs, masks, and a ready-made orchestrator for tests.

use std::sync::Arc;

use super::mocks::{MockNormalizer, MockSegmentation, MockStorage};
use crate::config::{OrchestratorConfig, StageTimeouts};
use crate::events::CollectingEventSink;
use crate::models::{ImageSource, MaskData, MedicalImageInput, Modality, SegmentationMask};
use crate::orchestrator::Orchestrator;
use crate::pipeline::{JitterStrategy, RetryConfig};

/// A valid chest X-ray input whose source is `pacs://<study_id>`.
#[must_use]
pub fn sample_input(study_id: &str) -> MedicalImageInput {
    MedicalImageInput::new(
        study_id,
        "patient-001",
        Modality::XRay,
        ImageSource::uri(format!("pacs://{study_id}")),
    )
    .with_body_part("chest")
    .with_clinical_context("persistent cough")
    .with_metadata("pixel_spacing_mm", serde_json::json!(0.5))
}

/// A `width` x `height` raster with the first `on` pixels set.
#[must_use]
pub fn raster_mask(label: &str, confidence: f64, width: u32, height: u32, on: usize) -> SegmentationMask {
    let total = (width as usize) * (height as usize);
    let mut pixels = vec![0u8; total];
    for p in pixels.iter_mut().take(on) {
        *p = 255;
    }
    SegmentationMask::new(
        label,
        confidence,
        MaskData::Raster {
            width,
            height,
            pixels,
        },
    )
}

/// Lung and heart masks that pass validation cleanly.
#[must_use]
pub fn two_confident_masks() -> Vec<SegmentationMask> {
    vec![
        raster_mask("lung", 0.92, 16, 16, 80),
        raster_mask("heart", 0.88, 16, 16, 40),
    ]
}

/// Defaults with millisecond retry delays and short time bounds.
#[must_use]
pub fn fast_config() -> OrchestratorConfig {
    OrchestratorConfig::default()
        .with_timeouts(StageTimeouts::uniform(2.0))
        .with_retry(
            RetryConfig::default()
                .with_base_delay_ms(1)
                .with_max_delay_ms(5)
                .with_jitter(JitterStrategy::None),
        )
}

/// An orchestrator wired to inspectable mocks.
#[derive(Debug, Clone)]
pub struct TestHarness {
    /// The orchestrator under test.
    pub orchestrator: Orchestrator,
    /// Normalizer double.
    pub normalizer: Arc<MockNormalizer>,
    /// Segmentation double.
    pub segmentation: Arc<MockSegmentation>,
    /// Storage double.
    pub storage: Arc<MockStorage>,
    /// Captured lifecycle events.
    pub events: Arc<CollectingEventSink>,
}

impl TestHarness {
    /// Builds a harness with [`fast_config`].
    #[must_use]
    pub fn new(segmentation: MockSegmentation) -> Self {
        Self::with_config(fast_config(), segmentation, MockStorage::new())
    }

    /// Builds a harness with explicit configuration and storage.
    ///
    /// # Panics
    ///
    /// Panics if `config` does not validate.
    #[must_use]
    pub fn with_config(
        config: OrchestratorConfig,
        segmentation: MockSegmentation,
        storage: MockStorage,
    ) -> Self {
        let normalizer = Arc::new(MockNormalizer::new());
        let segmentation = Arc::new(segmentation);
        let storage = Arc::new(storage);
        let events = Arc::new(CollectingEventSink::new());

        let built = Orchestrator::builder(config)
            .normalizer(normalizer.clone())
            .segmentation(segmentation.clone())
            .storage(storage.clone())
            .event_sink(events.clone())
            .build();
        let orchestrator = match built {
            Ok(orchestrator) => orchestrator,
            Err(e) => panic!("test harness configuration rejected: {e}"),
        };

        Self {
            orchestrator,
            normalizer,
            segmentation,
            storage,
            events,
        }
    }
}
