//! Hand-written collaborator doubles.
//!
//! Unlike `mockall` expectations these keep state across calls, which the
//! pipeline-level tests need: call counts, stored results, and transient
//! failures that clear after a number of attempts.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::collaborators::{ClinicalStorage, ImageNormalizer, SegmentationClient};
use crate::errors::CollaboratorError;
use crate::models::{
    ImageSource, Modality, ProcessingResult, SegmentationMask, StandardizedImage, StorageReceipt,
};

/// Normalizer returning a fixed-size image whose reference embeds the source.
#[derive(Debug)]
pub struct MockNormalizer {
    width: u32,
    height: u32,
    pixel_spacing_mm: Option<f64>,
    error: Option<CollaboratorError>,
    calls: AtomicUsize,
}

impl Default for MockNormalizer {
    fn default() -> Self {
        Self {
            width: 512,
            height: 512,
            pixel_spacing_mm: None,
            error: None,
            calls: AtomicUsize::new(0),
        }
    }
}

impl MockNormalizer {
    /// Creates a normalizer producing 512x512 images.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a normalizer that always fails with `error`.
    #[must_use]
    pub fn failing(error: CollaboratorError) -> Self {
        Self {
            error: Some(error),
            ..Self::default()
        }
    }

    /// Sets the output dimensions.
    #[must_use]
    pub const fn with_dimensions(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Sets the pixel spacing reported on every image.
    #[must_use]
    pub const fn with_spacing(mut self, mm: f64) -> Self {
        self.pixel_spacing_mm = Some(mm);
        self
    }

    /// Number of normalize calls.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageNormalizer for MockNormalizer {
    async fn normalize(
        &self,
        source: &ImageSource,
        modality: Modality,
        _target_size: u32,
    ) -> Result<StandardizedImage, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = &self.error {
            return Err(error.clone());
        }
        let mut image = StandardizedImage::new(
            format!("norm://{}", source.describe()),
            modality,
            self.width,
            self.height,
        );
        image.pixel_spacing_mm = self.pixel_spacing_mm;
        Ok(image)
    }
}

/// What a [`MockSegmentation`] does when called.
#[derive(Debug, Clone)]
pub enum SegmentationBehavior {
    /// Return these masks.
    Masks(Vec<SegmentationMask>),
    /// Return this error on every call.
    Fail(CollaboratorError),
    /// Fail with a transient error for the first `times` calls, then
    /// return the masks.
    FailTimes {
        /// Failing calls before success.
        times: usize,
        /// Masks returned afterwards.
        masks: Vec<SegmentationMask>,
    },
    /// Sleep, then return the masks.
    Slow {
        /// Time to sleep.
        delay: Duration,
        /// Masks returned afterwards.
        masks: Vec<SegmentationMask>,
    },
    /// Never complete.
    Hang,
    /// Panic inside the call.
    Panic,
}

/// Segmentation client with a default behavior and per-image overrides.
///
/// Overrides match when the normalized image reference contains the given
/// fragment; with [`MockNormalizer`] that is the input's image source.
#[derive(Debug)]
pub struct MockSegmentation {
    default: SegmentationBehavior,
    overrides: Vec<(String, SegmentationBehavior)>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl MockSegmentation {
    /// Creates a client with `behavior` for every image.
    #[must_use]
    pub fn new(behavior: SegmentationBehavior) -> Self {
        Self {
            default: behavior,
            overrides: Vec::new(),
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Creates a client that always returns `masks`.
    #[must_use]
    pub fn returning(masks: Vec<SegmentationMask>) -> Self {
        Self::new(SegmentationBehavior::Masks(masks))
    }

    /// Uses `behavior` for images whose reference contains `fragment`.
    #[must_use]
    pub fn with_override(mut self, fragment: impl Into<String>, behavior: SegmentationBehavior) -> Self {
        self.overrides.push((fragment.into(), behavior));
        self
    }

    /// Number of infer calls.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of concurrent infer calls observed.
    #[must_use]
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Prompts received, in call order.
    #[must_use]
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }

    fn behavior_for(&self, reference: &str) -> &SegmentationBehavior {
        self.overrides
            .iter()
            .find(|(fragment, _)| reference.contains(fragment.as_str()))
            .map_or(&self.default, |(_, behavior)| behavior)
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl SegmentationClient for MockSegmentation {
    async fn infer(
        &self,
        image: &StandardizedImage,
        prompt: &str,
    ) -> Result<Vec<SegmentationMask>, CollaboratorError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);
        self.prompts.lock().push(prompt.to_string());

        match self.behavior_for(&image.reference) {
            SegmentationBehavior::Masks(masks) => Ok(masks.clone()),
            SegmentationBehavior::Fail(error) => Err(error.clone()),
            SegmentationBehavior::FailTimes { times, masks } => {
                if call < *times {
                    Err(CollaboratorError::transient_inference(format!(
                        "service unavailable (call {})",
                        call + 1
                    )))
                } else {
                    Ok(masks.clone())
                }
            }
            SegmentationBehavior::Slow { delay, masks } => {
                tokio::time::sleep(*delay).await;
                Ok(masks.clone())
            }
            SegmentationBehavior::Hang => std::future::pending().await,
            SegmentationBehavior::Panic => panic!("segmentation mock panicked"),
        }
    }
}

/// Storage that records every stored result.
#[derive(Debug, Default)]
pub struct MockStorage {
    stored: Mutex<Vec<ProcessingResult>>,
    error: Option<CollaboratorError>,
    hang: bool,
}

impl MockStorage {
    /// Creates a storage that accepts everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a storage that always fails with `error`.
    #[must_use]
    pub fn failing(error: CollaboratorError) -> Self {
        Self {
            error: Some(error),
            ..Self::default()
        }
    }

    /// Creates a storage whose writes never complete.
    #[must_use]
    pub fn hanging() -> Self {
        Self {
            hang: true,
            ..Self::default()
        }
    }

    /// Number of store calls.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.stored.lock().len()
    }

    /// Every result handed to storage, in call order.
    #[must_use]
    pub fn stored(&self) -> Vec<ProcessingResult> {
        self.stored.lock().clone()
    }

    /// Store calls made for `study_id`.
    #[must_use]
    pub fn calls_for(&self, study_id: &str) -> usize {
        self.stored
            .lock()
            .iter()
            .filter(|r| r.input.study_id() == study_id)
            .count()
    }
}

#[async_trait]
impl ClinicalStorage for MockStorage {
    async fn store(&self, result: &ProcessingResult) -> Result<StorageReceipt, CollaboratorError> {
        let n = {
            let mut stored = self.stored.lock();
            stored.push(result.clone());
            stored.len()
        };
        if self.hang {
            return std::future::pending().await;
        }
        if let Some(error) = &self.error {
            return Err(error.clone());
        }
        Ok(StorageReceipt::new(
            format!("rcpt-{n}"),
            format!("archive://{}", result.input.study_id()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::two_confident_masks;

    #[tokio::test]
    async fn test_normalizer_embeds_source() {
        let normalizer = MockNormalizer::new().with_dimensions(64, 32).with_spacing(0.7);
        let image = normalizer
            .normalize(&ImageSource::uri("pacs://S9"), Modality::Ct, 1024)
            .await
            .unwrap();

        assert!(image.reference.contains("pacs://S9"));
        assert_eq!((image.width, image.height), (64, 32));
        assert_eq!(image.pixel_spacing_mm, Some(0.7));
        assert_eq!(normalizer.call_count(), 1);
    }

    #[tokio::test]
    async fn test_segmentation_override_and_fail_times() {
        let client = MockSegmentation::new(SegmentationBehavior::FailTimes {
            times: 1,
            masks: two_confident_masks(),
        })
        .with_override("bad", SegmentationBehavior::Fail(CollaboratorError::inference("no")));
        let good = StandardizedImage::new("norm://pacs://good", Modality::Ct, 8, 8);
        let bad = StandardizedImage::new("norm://pacs://bad", Modality::Ct, 8, 8);

        assert!(client.infer(&good, "lung").await.is_err());
        assert_eq!(client.infer(&good, "lung").await.unwrap().len(), 2);
        assert!(client.infer(&bad, "lung").await.is_err());
        assert_eq!(client.call_count(), 3);
        assert_eq!(client.max_in_flight(), 1);
    }

    #[tokio::test]
    async fn test_storage_records_calls() {
        let storage = MockStorage::failing(CollaboratorError::integration("offline"));
        let input = crate::testing::sample_input("S1");
        let result = crate::pipeline::failed_without_run(
            input,
            crate::errors::ErrorKind::Internal,
            "x".into(),
        );

        assert!(storage.store(&result).await.is_err());
        assert_eq!(storage.calls_for("S1"), 1);
    }
}
