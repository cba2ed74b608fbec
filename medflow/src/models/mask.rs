//! Segmentation masks and their measurements.

use serde::{Deserialize, Serialize};

/// Geometry of one segmented structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MaskData {
    /// Row-major bitmap, one byte per pixel; nonzero means inside.
    Raster {
        /// Width in pixels.
        width: u32,
        /// Height in pixels.
        height: u32,
        /// Pixel values.
        #[serde(with = "crate::utils::base64_bytes")]
        pixels: Vec<u8>,
    },
    /// Closed polygon in image pixel coordinates.
    Polygon {
        /// Vertices as `[x, y]`.
        points: Vec<[f64; 2]>,
    },
    /// Mask stored elsewhere; geometry is not inspected.
    Reference {
        /// Location of the mask.
        uri: String,
    },
}

impl MaskData {
    /// Area covered by the mask in pixels, if it can be computed.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn area_pixels(&self) -> Option<f64> {
        match self {
            Self::Raster { pixels, .. } => {
                Some(pixels.iter().filter(|p| **p != 0).count() as f64)
            }
            Self::Polygon { points } if points.len() >= 3 => Some(shoelace_area(points)),
            Self::Polygon { .. } | Self::Reference { .. } => None,
        }
    }

    /// Fraction of the image the mask covers.
    ///
    /// Rasters use their own extent; polygons need the image size.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn coverage(&self, image_width: u32, image_height: u32) -> Option<f64> {
        let extent = match self {
            Self::Raster { width, height, .. } => f64::from(*width) * f64::from(*height),
            _ => f64::from(image_width) * f64::from(image_height),
        };
        if extent <= 0.0 {
            return None;
        }
        self.area_pixels().map(|area| (area / extent).clamp(0.0, 1.0))
    }

    /// Describes a structural defect that makes the geometry unusable.
    #[must_use]
    pub fn structural_defect(&self) -> Option<String> {
        match self {
            Self::Raster {
                width,
                height,
                pixels,
            } => {
                let expected = u64::from(*width) * u64::from(*height);
                if expected == 0 {
                    Some("raster has zero extent".to_string())
                } else if pixels.len() as u64 != expected {
                    Some(format!(
                        "raster holds {} pixels, expected {width}x{height}",
                        pixels.len()
                    ))
                } else {
                    None
                }
            }
            Self::Polygon { points } if points.len() < 3 => {
                Some(format!("polygon has {} vertices", points.len()))
            }
            Self::Polygon { points } if points.iter().flatten().any(|c| !c.is_finite()) => {
                Some("polygon has non-finite vertices".to_string())
            }
            Self::Polygon { .. } | Self::Reference { .. } => None,
        }
    }

    /// Returns a cleaned copy: rasters binarized to 0/1, polygons without
    /// repeated consecutive vertices.
    #[must_use]
    pub fn refined(&self) -> Self {
        match self {
            Self::Raster {
                width,
                height,
                pixels,
            } => Self::Raster {
                width: *width,
                height: *height,
                pixels: pixels.iter().map(|p| u8::from(*p != 0)).collect(),
            },
            Self::Polygon { points } => {
                let mut cleaned: Vec<[f64; 2]> = Vec::with_capacity(points.len());
                for p in points {
                    if cleaned.last() != Some(p) {
                        cleaned.push(*p);
                    }
                }
                if cleaned.len() > 1 && cleaned.first() == cleaned.last() {
                    cleaned.pop();
                }
                Self::Polygon { points: cleaned }
            }
            Self::Reference { .. } => self.clone(),
        }
    }
}

fn shoelace_area(points: &[[f64; 2]]) -> f64 {
    let n = points.len();
    let twice: f64 = (0..n)
        .map(|i| {
            let [x1, y1] = points[i];
            let [x2, y2] = points[(i + 1) % n];
            x1.mul_add(y2, -(x2 * y1))
        })
        .sum();
    twice.abs() / 2.0
}

/// Measurements attached to a mask by the post-process stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaskMetrics {
    /// Area in pixels.
    pub area_pixels: f64,
    /// Fraction of the image covered.
    pub coverage: f64,
    /// Physical area, when pixel spacing is known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub area_mm2: Option<f64>,
    /// Physical volume, when spacing and slice thickness are known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_mm3: Option<f64>,
}

/// One segmented structure returned by inference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentationMask {
    /// Structure label, one of the prompt targets.
    pub label: String,
    /// Model confidence in `[0, 1]`.
    pub confidence: f64,
    /// Geometry.
    pub data: MaskData,
    /// Filled in by refinement.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<MaskMetrics>,
}

impl SegmentationMask {
    /// Creates an unmeasured mask.
    #[must_use]
    pub fn new(label: impl Into<String>, confidence: f64, data: MaskData) -> Self {
        Self {
            label: label.into(),
            confidence,
            data,
            metrics: None,
        }
    }

    /// Returns true if the confidence is a number within `[0, 1]`.
    #[must_use]
    pub fn has_valid_confidence(&self) -> bool {
        (0.0..=1.0).contains(&self.confidence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raster(width: u32, height: u32, on: usize) -> MaskData {
        let total = (width * height) as usize;
        let mut pixels = vec![0u8; total];
        for p in pixels.iter_mut().take(on) {
            *p = 200;
        }
        MaskData::Raster {
            width,
            height,
            pixels,
        }
    }

    #[test]
    fn test_raster_area_and_coverage() {
        let mask = raster(10, 10, 25);
        assert_eq!(mask.area_pixels(), Some(25.0));
        assert_eq!(mask.coverage(512, 512), Some(0.25));
    }

    #[test]
    fn test_polygon_area() {
        let square = MaskData::Polygon {
            points: vec![[0.0, 0.0], [10.0, 0.0], [10.0, 10.0], [0.0, 10.0]],
        };
        assert_eq!(square.area_pixels(), Some(100.0));
        assert_eq!(square.coverage(100, 100), Some(0.01));
    }

    #[test]
    fn test_reference_has_no_geometry() {
        let mask = MaskData::Reference {
            uri: "s3://masks/1".into(),
        };
        assert_eq!(mask.area_pixels(), None);
        assert_eq!(mask.coverage(10, 10), None);
        assert_eq!(mask.structural_defect(), None);
    }

    #[test]
    fn test_structural_defects() {
        let short = MaskData::Raster {
            width: 4,
            height: 4,
            pixels: vec![1; 3],
        };
        assert!(short.structural_defect().is_some());

        let line = MaskData::Polygon {
            points: vec![[0.0, 0.0], [1.0, 1.0]],
        };
        assert!(line.structural_defect().is_some());

        assert!(raster(2, 2, 1).structural_defect().is_none());
    }

    #[test]
    fn test_refined_raster_is_binary() {
        let refined = raster(2, 2, 3).refined();
        let MaskData::Raster { pixels, .. } = refined else {
            panic!("expected raster");
        };
        assert_eq!(pixels, vec![1, 1, 1, 0]);
    }

    #[test]
    fn test_refined_polygon_drops_repeats() {
        let poly = MaskData::Polygon {
            points: vec![[0.0, 0.0], [0.0, 0.0], [4.0, 0.0], [4.0, 4.0], [0.0, 0.0]],
        };
        let MaskData::Polygon { points } = poly.refined() else {
            panic!("expected polygon");
        };
        assert_eq!(points, vec![[0.0, 0.0], [4.0, 0.0], [4.0, 4.0]]);
    }

    #[test]
    fn test_confidence_bounds() {
        let data = raster(1, 1, 1);
        assert!(SegmentationMask::new("lung", 0.9, data.clone()).has_valid_confidence());
        assert!(!SegmentationMask::new("lung", 1.2, data.clone()).has_valid_confidence());
        assert!(!SegmentationMask::new("lung", f64::NAN, data).has_valid_confidence());
    }

    #[test]
    fn test_mask_serde_shape() {
        let mask = SegmentationMask::new("heart", 0.8, raster(1, 2, 1));
        let json = serde_json::to_value(&mask).unwrap();

        assert_eq!(json["data"]["type"], "raster");
        assert_eq!(json["data"]["pixels"], "yAA=");
        assert!(json.get("metrics").is_none());
    }
}
