//! Deterministic report generation.

use super::{required, Stage};
use crate::context::{PipelineEnvelope, StageContext, StageOutput};
use crate::core::StageKind;
use crate::errors::StageFault;
use crate::models::{
    ClinicalReport, Concern, Disposition, Finding, SegmentationMask, ValidationResult,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};

/// Builds a [`ClinicalReport`] from the refined masks and the verdict.
///
/// Quantitative keys are `<label>.<metric>`; a label seen more than once is
/// keyed `<label>#<index>.<metric>`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReportStage;

impl ReportStage {
    /// Generates the report.
    #[must_use]
    pub fn compose(masks: &[SegmentationMask], validation: &ValidationResult) -> ClinicalReport {
        let mut label_counts: HashMap<&str, usize> = HashMap::new();
        for mask in masks {
            *label_counts.entry(mask.label.as_str()).or_default() += 1;
        }

        let mut findings = Vec::with_capacity(masks.len());
        let mut quantitative = BTreeMap::new();

        for (i, mask) in masks.iter().enumerate() {
            let key = if label_counts.get(mask.label.as_str()).copied().unwrap_or(0) > 1 {
                format!("{}#{i}", mask.label)
            } else {
                mask.label.clone()
            };

            quantitative.insert(format!("{key}.confidence"), mask.confidence);
            let mut statement = format!(
                "{} segmented with confidence {:.0}%",
                mask.label,
                mask.confidence * 100.0
            );

            if let Some(metrics) = &mask.metrics {
                quantitative.insert(format!("{key}.coverage"), metrics.coverage);
                statement.push_str(&format!(", covering {:.1}% of the image", metrics.coverage * 100.0));
                if let Some(area) = metrics.area_mm2 {
                    quantitative.insert(format!("{key}.area_mm2"), area);
                    statement.push_str(&format!(", area {area:.1} mm²"));
                }
                if let Some(volume) = metrics.volume_mm3 {
                    quantitative.insert(format!("{key}.volume_mm3"), volume);
                    statement.push_str(&format!(", volume {volume:.1} mm³"));
                }
            }

            findings.push(Finding::new(statement, vec![i]));
        }
        quantitative.insert("aggregate_confidence".to_string(), validation.aggregate_confidence);

        let labels: Vec<&str> = masks.iter().map(|m| m.label.as_str()).collect();
        let mut impression = if labels.is_empty() {
            "No structures identified.".to_string()
        } else {
            format!(
                "Automated segmentation identified {} structure(s): {}.",
                labels.len(),
                labels.join(", ")
            )
        };
        if validation.disposition == Disposition::AcceptWithReview {
            impression.push_str(" Flagged for human review.");
        }

        let mut recommendations = Vec::new();
        if validation.disposition == Disposition::AcceptWithReview {
            recommendations.push("Radiologist review of the segmentation is required.".to_string());
        }
        if validation.has_concern(Concern::LowConfidence) {
            recommendations
                .push("Low-confidence structures should be confirmed manually.".to_string());
        }
        if validation.has_concern(Concern::ArtifactDetected) {
            recommendations.push("Imaging artifacts present; consider repeat acquisition.".to_string());
        }
        recommendations.push("Correlate with clinical findings.".to_string());

        ClinicalReport {
            findings,
            quantitative,
            impression,
            recommendations,
            generated_at: Utc::now(),
        }
    }
}

#[async_trait]
impl Stage for ReportStage {
    fn kind(&self) -> StageKind {
        StageKind::GenerateReport
    }

    fn gate_sensitive(&self) -> bool {
        true
    }

    async fn execute(
        &self,
        envelope: &PipelineEnvelope,
        _ctx: &StageContext<'_>,
    ) -> Result<StageOutput, StageFault> {
        let masks = required(envelope.refined_masks(), self.kind(), "refined masks")?;
        let validation = required(envelope.validation(), self.kind(), "a validation verdict")?;
        Ok(StageOutput::Reported(Self::compose(masks, validation)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MaskData, MaskMetrics};
    use std::collections::BTreeSet;

    fn measured(label: &str, confidence: f64, area_mm2: f64) -> SegmentationMask {
        let mut mask = SegmentationMask::new(label, confidence, MaskData::Reference { uri: "m://x".into() });
        mask.metrics = Some(MaskMetrics {
            area_pixels: 100.0,
            coverage: 0.1,
            area_mm2: Some(area_mm2),
            volume_mm3: None,
        });
        mask
    }

    fn verdict(disposition: Disposition, concerns: &[Concern]) -> ValidationResult {
        ValidationResult::new(
            0.85,
            concerns.iter().copied().collect::<BTreeSet<_>>(),
            disposition,
            vec![],
        )
    }

    #[test]
    fn test_findings_reference_masks() {
        let masks = vec![measured("lung", 0.9, 250.0), measured("heart", 0.8, 120.0)];
        let report = ReportStage::compose(&masks, &verdict(Disposition::Accept, &[]));

        assert_eq!(report.findings.len(), 2);
        assert_eq!(report.findings[1].mask_refs, vec![1]);
        assert_eq!(report.value("lung.area_mm2"), Some(250.0));
        assert_eq!(report.value("heart.confidence"), Some(0.8));
        assert_eq!(report.value("aggregate_confidence"), Some(0.85));
        assert!(!report.impression.contains("review"));
        assert_eq!(report.recommendations, vec!["Correlate with clinical findings."]);
    }

    #[test]
    fn test_duplicate_labels_are_indexed() {
        let masks = vec![measured("lesion", 0.9, 10.0), measured("lesion", 0.8, 20.0)];
        let report = ReportStage::compose(&masks, &verdict(Disposition::Accept, &[]));

        assert_eq!(report.value("lesion#0.area_mm2"), Some(10.0));
        assert_eq!(report.value("lesion#1.area_mm2"), Some(20.0));
        assert_eq!(report.value("lesion.area_mm2"), None);
    }

    #[test]
    fn test_review_flag_in_impression() {
        let masks = vec![measured("lung", 0.6, 250.0)];
        let report = ReportStage::compose(
            &masks,
            &verdict(Disposition::AcceptWithReview, &[Concern::LowConfidence]),
        );

        assert!(report.impression.contains("human review"));
        assert_eq!(report.recommendations.len(), 3);
    }

    #[test]
    fn test_unmeasured_mask_only_has_confidence() {
        let masks = vec![SegmentationMask::new("vessel", 0.75, MaskData::Reference { uri: "m://v".into() })];
        let report = ReportStage::compose(&masks, &verdict(Disposition::Accept, &[]));

        assert_eq!(report.quantitative.len(), 2);
        assert_eq!(report.value("vessel.confidence"), Some(0.75));
    }
}
