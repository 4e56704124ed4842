//! Reference shapes, frame sizes and the normalized placement rectangle.

use nalgebra::Point2;
use serde::{Deserialize, Serialize};

/// Width/height of a marker's reference image in pixels. Marker keypoints
/// live in this coordinate system.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReferenceShape {
    pub width: u32,
    pub height: u32,
}

impl ReferenceShape {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Corners in order `(0,0), (w,0), (w,h), (0,h)`.
    pub fn corners(&self) -> [Point2<f64>; 4] {
        let w = self.width as f64;
        let h = self.height as f64;
        [
            Point2::new(0.0, 0.0),
            Point2::new(w, 0.0),
            Point2::new(w, h),
            Point2::new(0.0, h),
        ]
    }
}

impl Default for ReferenceShape {
    fn default() -> Self {
        Self::new(500, 500)
    }
}

/// Pixel dimensions of the frame a placement was computed in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

impl FrameSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Axis-aligned rectangle in percent (0-100) of the frame width/height.
///
/// Clients render overlays from these numbers without knowing the
/// server-side processing resolution.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Placement {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Placement {
    /// Bounding box of `quad` expressed in percent of `frame`.
    ///
    /// Returns `None` for an empty frame or a quad with non-finite corners.
    pub fn from_quad(quad: &[Point2<f64>; 4], frame: FrameSize) -> Option<Self> {
        if frame.width == 0 || frame.height == 0 {
            return None;
        }
        if quad.iter().any(|p| !p.x.is_finite() || !p.y.is_finite()) {
            return None;
        }

        let (min_x, max_x, min_y, max_y) = quad.iter().fold(
            (f64::INFINITY, f64::NEG_INFINITY, f64::INFINITY, f64::NEG_INFINITY),
            |(x0, x1, y0, y1), p| (x0.min(p.x), x1.max(p.x), y0.min(p.y), y1.max(p.y)),
        );

        let fw = frame.width as f64;
        let fh = frame.height as f64;
        Some(Self {
            x: min_x / fw * 100.0,
            y: min_y / fh * 100.0,
            width: (max_x - min_x) / fw * 100.0,
            height: (max_y - min_y) / fh * 100.0,
        })
    }
}
