//! [`OrbDetector`], the default [`FeatureDetector`] for frames and markers.

use image::imageops::{self, FilterType};
use image::GrayImage;
use log::trace;
use marker_track_core::{FeatureDetector, FeatureSet, KeyPoint};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::brief::{BriefPattern, PATCH_RADIUS};
use crate::fast::{self, FastParams};
use crate::OrbParams;

const ORIENTATION_RADIUS: i32 = 7;

/// ORB-style extractor: FAST-9 + Harris ranking + rotated BRIEF over a
/// small image pyramid. Keypoints are reported in level-0 pixel coordinates.
pub struct OrbDetector {
    params: OrbParams,
    pattern: BriefPattern,
}

impl OrbDetector {
    pub fn new(params: OrbParams) -> Self {
        let pattern = BriefPattern::seeded(params.pattern_seed);
        Self { params, pattern }
    }

    pub fn params(&self) -> &OrbParams {
        &self.params
    }

    fn fast_params(&self) -> FastParams {
        FastParams {
            threshold: self.params.fast_threshold,
            nms_cell: self.params.nms_cell,
            harris_k: self.params.harris_k,
            border: PATCH_RADIUS + 1,
            orientation_radius: ORIENTATION_RADIUS,
        }
    }

    /// Feature budget per level, geometric in the scale factor and summing
    /// to `max_features`.
    fn level_budgets(&self, levels: usize) -> Vec<usize> {
        let inv = 1.0 / self.params.scale_factor.max(1.0) as f64;
        let total = self.params.max_features as f64;
        let first = if (inv - 1.0).abs() < 1e-9 {
            total / levels as f64
        } else {
            total * (1.0 - inv) / (1.0 - inv.powi(levels as i32))
        };
        let mut budgets: Vec<usize> = (0..levels)
            .map(|l| (first * inv.powi(l as i32)).floor() as usize)
            .collect();
        let assigned: usize = budgets.iter().sum();
        if let Some(b0) = budgets.first_mut() {
            *b0 += self.params.max_features.saturating_sub(assigned);
        }
        budgets
    }
}

impl Default for OrbDetector {
    fn default() -> Self {
        Self::new(OrbParams::default())
    }
}

impl FeatureDetector for OrbDetector {
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip_all, fields(w = image.width(), h = image.height()))
    )]
    fn extract(&self, image: &GrayImage) -> FeatureSet {
        if self.params.max_features == 0 {
            return FeatureSet::empty();
        }

        let base = if self.params.blur_sigma > 0.0 {
            imageops::blur(image, self.params.blur_sigma)
        } else {
            image.clone()
        };

        let min_side = 2 * (PATCH_RADIUS + 1) + 1;
        let scale = self.params.scale_factor.max(1.0);
        let levels = self.params.pyramid_levels.max(1) as usize;
        let budgets = self.level_budgets(levels);
        let fast_params = self.fast_params();

        let mut out: Vec<(KeyPoint, _)> = Vec::with_capacity(self.params.max_features);
        let mut level_img = base;
        for (level, &budget) in budgets.iter().enumerate() {
            let factor = scale.powi(level as i32);
            if level > 0 {
                let w = (image.width() as f32 / factor).round() as u32;
                let h = (image.height() as f32 / factor).round() as u32;
                if w < min_side || h < min_side {
                    break;
                }
                level_img = imageops::resize(&level_img, w, h, FilterType::Triangle);
            }

            let before = out.len();
            let kps = fast::detect(&level_img, &fast_params);
            for kp in kps {
                if out.len() - before >= budget {
                    break;
                }
                let Some(desc) = self.pattern.describe(&level_img, &kp) else {
                    continue;
                };
                let kp0 = KeyPoint {
                    x: kp.x * factor,
                    y: kp.y * factor,
                    ..kp
                };
                out.push((kp0, desc));
            }
            trace!("orb level {level} (x{factor:.2}): {} features", out.len() - before);
        }

        out.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn blocks(w: u32, h: u32) -> GrayImage {
        // pseudo-random 12px blocks: plenty of corners at every level
        GrayImage::from_fn(w, h, |x, y| {
            let (bx, by) = (x / 12, y / 12);
            let v = (bx * 73 + by * 151 + bx * by * 37) % 7;
            Luma([(v * 36) as u8])
        })
    }

    #[test]
    fn blank_image_yields_nothing() {
        let det = OrbDetector::default();
        let img = GrayImage::from_pixel(320, 240, Luma([90]));
        assert!(det.extract(&img).is_empty());
    }

    #[test]
    fn respects_feature_budget() {
        let det = OrbDetector::new(OrbParams {
            max_features: 50,
            ..OrbParams::default()
        });
        let set = det.extract(&blocks(320, 240));
        assert!(!set.is_empty());
        assert!(set.len() <= 50);
        assert_eq!(set.keypoints().len(), set.descriptors().len());
        assert!(set
            .keypoints()
            .iter()
            .all(|kp| kp.x >= 0.0 && kp.x < 320.0 && kp.y >= 0.0 && kp.y < 240.0));
    }

    #[test]
    fn extraction_is_deterministic() {
        let det = OrbDetector::new(OrbParams::for_markers());
        let img = blocks(200, 200);
        assert_eq!(det.extract(&img), det.extract(&img));
    }

    #[test]
    fn identical_images_match_exactly() {
        let det = OrbDetector::default();
        let a = det.extract(&blocks(240, 240));
        let b = det.extract(&blocks(240, 240));
        assert!(a
            .descriptors()
            .iter()
            .zip(b.descriptors())
            .all(|(x, y)| x.distance(y) == 0));
    }

    #[test]
    fn budgets_sum_to_max() {
        let det = OrbDetector::new(OrbParams {
            max_features: 1000,
            pyramid_levels: 4,
            ..OrbParams::default()
        });
        let b = det.level_budgets(4);
        assert_eq!(b.iter().sum::<usize>(), 1000);
        assert!(b.windows(2).all(|w| w[0] >= w[1]));
    }
}
