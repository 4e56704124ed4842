//! Keypoints, binary descriptors and the feature-extraction seam.

use image::GrayImage;
use serde::{Deserialize, Serialize};

/// A detected keypoint in pixel coordinates of the image it was extracted from.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct KeyPoint {
    pub x: f32,
    pub y: f32,
    /// Corner response, higher is stronger.
    pub response: f32,
    /// Orientation in radians.
    pub angle: f32,
}

impl KeyPoint {
    pub fn at(x: f32, y: f32) -> Self {
        Self {
            x,
            y,
            response: 0.0,
            angle: 0.0,
        }
    }
}

/// A 256-bit binary descriptor. Distances are Hamming bit counts (0..=256).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Descriptor(pub [u64; 4]);

impl Descriptor {
    pub const BITS: u32 = 256;

    pub const fn zeros() -> Self {
        Self([0; 4])
    }

    #[inline]
    pub fn distance(&self, other: &Self) -> u32 {
        (self.0[0] ^ other.0[0]).count_ones()
            + (self.0[1] ^ other.0[1]).count_ones()
            + (self.0[2] ^ other.0[2]).count_ones()
            + (self.0[3] ^ other.0[3]).count_ones()
    }

    #[inline]
    pub fn set_bit(&mut self, bit: usize) {
        self.0[bit / 64] |= 1 << (bit % 64);
    }
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("feature set has {keypoints} keypoints but {descriptors} descriptors")]
pub struct FeatureSetError {
    pub keypoints: usize,
    pub descriptors: usize,
}

/// Keypoints and their descriptors, index-aligned: `descriptors[i]` describes `keypoints[i]`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureSet {
    keypoints: Vec<KeyPoint>,
    descriptors: Vec<Descriptor>,
}

impl FeatureSet {
    pub fn new(
        keypoints: Vec<KeyPoint>,
        descriptors: Vec<Descriptor>,
    ) -> Result<Self, FeatureSetError> {
        if keypoints.len() != descriptors.len() {
            return Err(FeatureSetError {
                keypoints: keypoints.len(),
                descriptors: descriptors.len(),
            });
        }
        Ok(Self {
            keypoints,
            descriptors,
        })
    }

    pub fn empty() -> Self {
        Self::default()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    #[inline]
    pub fn keypoints(&self) -> &[KeyPoint] {
        &self.keypoints
    }

    #[inline]
    pub fn descriptors(&self) -> &[Descriptor] {
        &self.descriptors
    }

    pub fn iter(&self) -> impl Iterator<Item = (&KeyPoint, &Descriptor)> {
        self.keypoints.iter().zip(self.descriptors.iter())
    }
}

impl FromIterator<(KeyPoint, Descriptor)> for FeatureSet {
    fn from_iter<I: IntoIterator<Item = (KeyPoint, Descriptor)>>(iter: I) -> Self {
        let (keypoints, descriptors) = iter.into_iter().unzip();
        Self {
            keypoints,
            descriptors,
        }
    }
}

/// Image to keypoints + descriptors.
///
/// Implementations must be deterministic for a fixed image and configuration
/// and may return an empty set for featureless images. Extraction is treated
/// as a CPU-bound synchronous call; callers never hold shared locks across it.
pub trait FeatureDetector: Send + Sync {
    fn extract(&self, image: &GrayImage) -> FeatureSet;
}
