//! Rotated BRIEF: 256 intensity comparisons steered by keypoint orientation.

use image::GrayImage;
use marker_track_core::{Descriptor, KeyPoint};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Half-size of the square patch a keypoint needs around it.
pub(crate) const PATCH_RADIUS: u32 = 15;
// Sampling disc; stays inside the patch under any rotation.
const SAMPLE_RADIUS: i32 = 13;

type Pair = (i8, i8, i8, i8);

pub(crate) struct BriefPattern {
    pairs: [Pair; Descriptor::BITS as usize],
}

impl BriefPattern {
    /// Deterministic pattern for `seed`. Offsets follow a triangular
    /// distribution inside the sampling disc, denser near the center.
    pub fn seeded(seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut point = || loop {
            let x = rng.random_range(-6..=6) + rng.random_range(-6..=6);
            let y = rng.random_range(-6..=6) + rng.random_range(-6..=6);
            if x * x + y * y <= SAMPLE_RADIUS * SAMPLE_RADIUS {
                return (x as i8, y as i8);
            }
        };
        let pairs = std::array::from_fn(|_| loop {
            let (x1, y1) = point();
            let (x2, y2) = point();
            if (x1, y1) != (x2, y2) {
                break (x1, y1, x2, y2);
            }
        });
        Self { pairs }
    }

    /// `None` when the keypoint is too close to the border for a full patch.
    pub fn describe(&self, img: &GrayImage, kp: &KeyPoint) -> Option<Descriptor> {
        let (w, h) = img.dimensions();
        let r = PATCH_RADIUS as f32;
        if kp.x < r || kp.y < r || kp.x >= w as f32 - r || kp.y >= h as f32 - r {
            return None;
        }

        let (sin_a, cos_a) = kp.angle.sin_cos();
        let sample = |dx: i8, dy: i8| {
            let (dx, dy) = (dx as f32, dy as f32);
            let x = (kp.x + dx * cos_a - dy * sin_a).round() as u32;
            let y = (kp.y + dx * sin_a + dy * cos_a).round() as u32;
            img.get_pixel(x, y).0[0]
        };

        let mut d = Descriptor::zeros();
        for (bit, &(x1, y1, x2, y2)) in self.pairs.iter().enumerate() {
            if sample(x1, y1) < sample(x2, y2) {
                d.set_bit(bit);
            }
        }
        Some(d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn textured(w: u32, h: u32) -> GrayImage {
        GrayImage::from_fn(w, h, |x, y| Luma([((x * 31 + y * 17 + x * y) % 251) as u8]))
    }

    #[test]
    fn same_seed_same_pattern() {
        let a = BriefPattern::seeded(7);
        let b = BriefPattern::seeded(7);
        let c = BriefPattern::seeded(8);
        assert_eq!(a.pairs, b.pairs);
        assert_ne!(a.pairs, c.pairs);
        assert!(a
            .pairs
            .iter()
            .all(|&(x1, y1, x2, y2)| (x1 as i32).pow(2) + (y1 as i32).pow(2) <= 169
                && (x2 as i32).pow(2) + (y2 as i32).pow(2) <= 169));
    }

    #[test]
    fn border_keypoints_have_no_descriptor() {
        let p = BriefPattern::seeded(1);
        let img = textured(64, 64);
        assert!(p.describe(&img, &KeyPoint::at(5.0, 30.0)).is_none());
        assert!(p.describe(&img, &KeyPoint::at(30.0, 60.0)).is_none());
        assert!(p.describe(&img, &KeyPoint::at(30.0, 30.0)).is_some());
    }

    #[test]
    fn orientation_steers_the_pattern() {
        let p = BriefPattern::seeded(1);
        let img = textured(64, 64);
        let mut kp = KeyPoint::at(32.0, 32.0);
        let a = p.describe(&img, &kp).expect("a");
        assert_eq!(p.describe(&img, &kp), Some(a));
        kp.angle = std::f32::consts::FRAC_PI_3;
        let b = p.describe(&img, &kp).expect("b");
        assert!(a.distance(&b) > 0);
    }
}
