use serde::{Deserialize, Serialize};

/// Tuning knobs for [`crate::OrbDetector`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrbParams {
    /// Upper bound on returned features across all pyramid levels.
    pub max_features: usize,
    /// FAST segment-test intensity threshold.
    pub fast_threshold: u8,
    /// Side of the square non-maximum-suppression cell, in pixels.
    pub nms_cell: u32,
    pub harris_k: f32,
    /// Gaussian pre-blur; `0.0` disables it.
    pub blur_sigma: f32,
    pub pyramid_levels: u32,
    pub scale_factor: f32,
    /// Seed for the BRIEF sampling pattern. Frames and markers must share it.
    pub pattern_seed: u64,
}

impl Default for OrbParams {
    fn default() -> Self {
        Self {
            max_features: 800,
            fast_threshold: 20,
            nms_cell: 8,
            harris_k: 0.04,
            blur_sigma: 0.8,
            pyramid_levels: 4,
            scale_factor: 1.2,
            pattern_seed: 0x0b_b5eed,
        }
    }
}

impl OrbParams {
    /// Defaults for live camera frames.
    pub fn for_frames() -> Self {
        Self::default()
    }

    /// Defaults for marker reference images, which get a larger budget.
    pub fn for_markers() -> Self {
        Self {
            max_features: 1000,
            ..Self::default()
        }
    }
}
