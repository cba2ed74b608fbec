//! Quality gate over the raw masks.
//!
//! [`assess`] is a pure function of the masks, prompt, image, and
//! thresholds. Concerns are recoverable observations; only the resulting
//! [`Disposition`] influences what runs next.

use super::{required, Stage};
use crate::collaborators::split_targets;
use crate::config::ValidationConfig;
use crate::context::{PipelineEnvelope, StageContext, StageOutput};
use crate::core::StageKind;
use crate::errors::StageFault;
use crate::models::{Concern, Disposition, SegmentationMask, StandardizedImage, ValidationResult};
use async_trait::async_trait;
use std::collections::BTreeSet;
use tracing::debug;

/// Evaluates masks against the validation thresholds.
///
/// The run is rejected when there are no masks, when the mean confidence is
/// below `reject_below`, or when every mask has unusable geometry. Any other
/// concern, or `require_review`, downgrades to `AcceptWithReview`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn assess(
    masks: &[SegmentationMask],
    prompt: &str,
    image: &StandardizedImage,
    config: &ValidationConfig,
) -> ValidationResult {
    let mut concerns = BTreeSet::new();
    let mut notes = Vec::new();

    if masks.is_empty() {
        concerns.insert(Concern::MissingExpectedStructure);
        notes.push("inference returned no masks".to_string());
        return ValidationResult::new(0.0, concerns, Disposition::Reject, notes);
    }

    let aggregate = masks.iter().map(|m| m.confidence).sum::<f64>() / masks.len() as f64;
    let mut implausible = 0usize;

    for (i, mask) in masks.iter().enumerate() {
        if mask.confidence < config.min_confidence {
            concerns.insert(Concern::LowConfidence);
            notes.push(format!(
                "mask {i} ('{}') confidence {:.2} below {:.2}",
                mask.label, mask.confidence, config.min_confidence
            ));
        }

        let geometry = mask.data.structural_defect().or_else(|| {
            match mask.data.coverage(image.width, image.height) {
                Some(c) if c <= 0.0 => Some("mask is empty".to_string()),
                Some(c) if c > config.max_coverage => {
                    Some(format!("mask covers {:.0}% of the image", c * 100.0))
                }
                _ => None,
            }
        });
        if let Some(defect) = geometry {
            implausible += 1;
            concerns.insert(Concern::ImplausibleGeometry);
            notes.push(format!("mask {i} ('{}'): {defect}", mask.label));
        }

        let label = mask.label.to_lowercase();
        if config
            .artifact_markers
            .iter()
            .any(|marker| label.contains(&marker.to_lowercase()))
        {
            concerns.insert(Concern::ArtifactDetected);
            notes.push(format!("mask {i} labeled '{}'", mask.label));
        }
    }

    if config.require_all_targets {
        for target in split_targets(prompt) {
            let found = masks.iter().any(|m| m.label.eq_ignore_ascii_case(&target));
            if !found {
                concerns.insert(Concern::MissingExpectedStructure);
                notes.push(format!("no mask for '{target}'"));
            }
        }
    }

    let disposition = if aggregate < config.reject_below {
        notes.push(format!(
            "aggregate confidence {aggregate:.2} below {:.2}",
            config.reject_below
        ));
        Disposition::Reject
    } else if implausible == masks.len() {
        Disposition::Reject
    } else if !concerns.is_empty() || config.require_review {
        Disposition::AcceptWithReview
    } else {
        Disposition::Accept
    };

    ValidationResult::new(aggregate, concerns, disposition, notes)
}

/// Runs [`assess`] over the envelope's raw masks.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidateStage;

#[async_trait]
impl Stage for ValidateStage {
    fn kind(&self) -> StageKind {
        StageKind::Validate
    }

    async fn execute(
        &self,
        envelope: &PipelineEnvelope,
        ctx: &StageContext<'_>,
    ) -> Result<StageOutput, StageFault> {
        let masks = required(envelope.masks(), self.kind(), "raw masks")?;
        let image = required(envelope.standardized(), self.kind(), "a normalized image")?;
        let prompt = envelope.prompt().unwrap_or_default();

        let result = assess(masks, prompt, image, &ctx.config.validation);
        debug!(
            disposition = %result.disposition,
            aggregate_confidence = result.aggregate_confidence,
            concerns = result.concerns.len(),
            "Masks assessed"
        );
        Ok(StageOutput::Validated(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MaskData, Modality};
    use pretty_assertions::assert_eq;

    fn image() -> StandardizedImage {
        StandardizedImage::new("norm://1", Modality::XRay, 10, 10)
    }

    fn raster(label: &str, confidence: f64, on: usize) -> SegmentationMask {
        let mut pixels = vec![0u8; 100];
        for p in pixels.iter_mut().take(on) {
            *p = 1;
        }
        SegmentationMask::new(
            label,
            confidence,
            MaskData::Raster {
                width: 10,
                height: 10,
                pixels,
            },
        )
    }

    #[test]
    fn test_confident_masks_accepted() {
        let masks = vec![raster("lung", 0.9, 30), raster("heart", 0.85, 20)];
        let result = assess(&masks, "lung & heart", &image(), &ValidationConfig::default());

        assert_eq!(result.disposition, Disposition::Accept);
        assert!(result.concerns.is_empty());
        assert!((result.aggregate_confidence - 0.875).abs() < 1e-9);
    }

    #[test]
    fn test_no_masks_rejected() {
        let result = assess(&[], "lung", &image(), &ValidationConfig::default());

        assert_eq!(result.disposition, Disposition::Reject);
        assert_eq!(result.aggregate_confidence, 0.0);
        assert!(result.has_concern(Concern::MissingExpectedStructure));
        assert!(!result.passed);
    }

    #[test]
    fn test_low_aggregate_rejected() {
        let masks = vec![raster("lung", 0.3, 30), raster("heart", 0.35, 20)];
        let result = assess(&masks, "lung & heart", &image(), &ValidationConfig::default());

        assert_eq!(result.disposition, Disposition::Reject);
        assert!(result.has_concern(Concern::LowConfidence));
    }

    #[test]
    fn test_single_low_mask_needs_review() {
        let masks = vec![raster("lung", 0.95, 30), raster("heart", 0.5, 20)];
        let result = assess(&masks, "lung & heart", &image(), &ValidationConfig::default());

        assert_eq!(result.disposition, Disposition::AcceptWithReview);
        assert_eq!(
            result.concerns.iter().copied().collect::<Vec<_>>(),
            vec![Concern::LowConfidence]
        );
    }

    #[test]
    fn test_all_implausible_rejected() {
        let masks = vec![raster("lung", 0.9, 0), raster("heart", 0.9, 100)];
        let result = assess(&masks, "lung & heart", &image(), &ValidationConfig::default());

        assert_eq!(result.disposition, Disposition::Reject);
        assert!(result.has_concern(Concern::ImplausibleGeometry));
    }

    #[test]
    fn test_one_implausible_needs_review() {
        let masks = vec![raster("lung", 0.9, 0), raster("heart", 0.9, 20)];
        let result = assess(&masks, "lung & heart", &image(), &ValidationConfig::default());

        assert_eq!(result.disposition, Disposition::AcceptWithReview);
    }

    #[test]
    fn test_artifact_label_flagged() {
        let masks = vec![raster("lung", 0.9, 30), raster("Motion Artifact", 0.9, 5)];
        let result = assess(&masks, "lung", &image(), &ValidationConfig::default());

        assert!(result.has_concern(Concern::ArtifactDetected));
        assert_eq!(result.disposition, Disposition::AcceptWithReview);
    }

    #[test]
    fn test_missing_target_only_when_required() {
        let masks = vec![raster("lung", 0.9, 30)];
        let relaxed = assess(&masks, "lung & heart", &image(), &ValidationConfig::default());
        assert_eq!(relaxed.disposition, Disposition::Accept);

        let strict = ValidationConfig {
            require_all_targets: true,
            ..ValidationConfig::default()
        };
        let result = assess(&masks, "lung & heart", &image(), &strict);
        assert!(result.has_concern(Concern::MissingExpectedStructure));
        assert_eq!(result.disposition, Disposition::AcceptWithReview);
    }

    #[test]
    fn test_require_review_downgrades_accept() {
        let config = ValidationConfig {
            require_review: true,
            ..ValidationConfig::default()
        };
        let masks = vec![raster("lung", 0.9, 30)];
        let result = assess(&masks, "lung", &image(), &config);

        assert_eq!(result.disposition, Disposition::AcceptWithReview);
        assert!(result.concerns.is_empty());
    }

    #[test]
    fn test_reference_masks_skip_geometry() {
        let masks = vec![SegmentationMask::new(
            "lung",
            0.9,
            MaskData::Reference { uri: "m://lung".into() },
        )];
        let result = assess(&masks, "lung", &image(), &ValidationConfig::default());
        assert_eq!(result.disposition, Disposition::Accept);
    }
}
