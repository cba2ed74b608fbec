//! Mask refinement and measurement.

use super::{required, Stage};
use crate::context::{PipelineEnvelope, StageContext, StageOutput};
use crate::core::StageKind;
use crate::errors::StageFault;
use crate::models::{MaskData, MaskMetrics, SegmentationMask, StandardizedImage};
use async_trait::async_trait;

/// Cleans every raw mask and attaches [`MaskMetrics`].
///
/// Output keeps the raw mask count, order, and labels. Masks stored by
/// reference pass through unmeasured.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostProcessStage;

impl PostProcessStage {
    /// Refines one mask against the image it was inferred from.
    #[must_use]
    pub fn refine(mask: &SegmentationMask, image: &StandardizedImage) -> SegmentationMask {
        let data = mask.data.refined();
        let metrics = measure(&data, image);
        SegmentationMask {
            label: mask.label.clone(),
            confidence: mask.confidence,
            data,
            metrics,
        }
    }
}

fn measure(data: &MaskData, image: &StandardizedImage) -> Option<MaskMetrics> {
    let area_pixels = data.area_pixels()?;
    let coverage = data.coverage(image.width, image.height)?;
    let area_mm2 = image.pixel_spacing_mm.map(|s| area_pixels * s * s);
    let volume_mm3 = area_mm2.zip(image.slice_thickness_mm).map(|(a, t)| a * t);
    Some(MaskMetrics {
        area_pixels,
        coverage,
        area_mm2,
        volume_mm3,
    })
}

#[async_trait]
impl Stage for PostProcessStage {
    fn kind(&self) -> StageKind {
        StageKind::PostProcess
    }

    fn gate_sensitive(&self) -> bool {
        true
    }

    async fn execute(
        &self,
        envelope: &PipelineEnvelope,
        _ctx: &StageContext<'_>,
    ) -> Result<StageOutput, StageFault> {
        let masks = required(envelope.masks(), self.kind(), "raw masks")?;
        let image = required(envelope.standardized(), self.kind(), "a normalized image")?;

        let refined = masks.iter().map(|m| Self::refine(m, image)).collect();
        Ok(StageOutput::Refined(refined))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OrchestratorConfig;
    use crate::models::{ImageSource, MedicalImageInput, Modality};
    use uuid::Uuid;

    fn image() -> StandardizedImage {
        StandardizedImage::new("norm://1", Modality::Ct, 4, 4)
            .with_pixel_spacing(0.5)
            .with_slice_thickness(2.0)
    }

    #[test]
    fn test_raster_metrics() {
        let mask = SegmentationMask::new(
            "liver",
            0.9,
            MaskData::Raster {
                width: 4,
                height: 4,
                pixels: vec![255, 255, 7, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 9],
            },
        );
        let refined = PostProcessStage::refine(&mask, &image());
        let metrics = refined.metrics.unwrap();

        assert_eq!(metrics.area_pixels, 4.0);
        assert_eq!(metrics.coverage, 0.25);
        assert_eq!(metrics.area_mm2, Some(1.0));
        assert_eq!(metrics.volume_mm3, Some(2.0));
        assert_eq!(refined.label, "liver");
    }

    #[test]
    fn test_spacing_unknown_leaves_physical_metrics_empty() {
        let mask = SegmentationMask::new(
            "lesion",
            0.8,
            MaskData::Polygon {
                points: vec![[0.0, 0.0], [2.0, 0.0], [2.0, 2.0], [0.0, 2.0]],
            },
        );
        let bare = StandardizedImage::new("norm://2", Modality::Ct, 4, 4);
        let metrics = PostProcessStage::refine(&mask, &bare).metrics.unwrap();

        assert_eq!(metrics.area_pixels, 4.0);
        assert_eq!(metrics.area_mm2, None);
        assert_eq!(metrics.volume_mm3, None);
    }

    #[test]
    fn test_reference_mask_unmeasured() {
        let mask = SegmentationMask::new("vessel", 0.7, MaskData::Reference { uri: "m://v".into() });
        assert!(PostProcessStage::refine(&mask, &image()).metrics.is_none());
    }

    #[tokio::test]
    async fn test_output_keeps_order() {
        let input = MedicalImageInput::new("S1", "P1", Modality::Ct, ImageSource::uri("pacs://1"));
        let masks = vec![
            SegmentationMask::new("b", 0.9, MaskData::Reference { uri: "m://b".into() }),
            SegmentationMask::new("a", 0.9, MaskData::Reference { uri: "m://a".into() }),
        ];
        let env = PipelineEnvelope::new(Uuid::new_v4(), input)
            .apply(StageKind::Preprocess, StageOutput::Preprocessed(image()))
            .unwrap()
            .apply(StageKind::InferSegmentation, StageOutput::Segmented(masks))
            .unwrap();
        let config = OrchestratorConfig::default();
        let ctx = StageContext::new(env.run_id(), StageKind::PostProcess, &config);

        let out = PostProcessStage.execute(&env, &ctx).await.unwrap();
        let env = env.apply(StageKind::PostProcess, out).unwrap();
        let labels: Vec<_> = env.refined_masks().unwrap().iter().map(|m| m.label.as_str()).collect();
        assert_eq!(labels, vec!["b", "a"]);
    }
}
