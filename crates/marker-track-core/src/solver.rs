//! Robust marker-to-frame homography estimation.

use log::debug;
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::homography::{estimate_homography, homography_from_4pt, triangle_area2, Homography};
use crate::ransac::{ransac, Estimator, RansacOptions};

/// A matched point pair: `marker` in reference-image pixels, `frame` in frame pixels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Correspondence {
    pub marker: Point2<f64>,
    pub frame: Point2<f64>,
}

impl Correspondence {
    pub fn new(marker: Point2<f64>, frame: Point2<f64>) -> Self {
        Self { marker, frame }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SolveError {
    #[error("need at least 4 correspondences, got {got}")]
    TooFewCorrespondences { got: usize },
    #[error("correspondences are degenerate (collinear or collapsed)")]
    Degenerate,
    #[error("no consensus: {inliers} inliers, need {required}")]
    NoConsensus { inliers: usize, required: usize },
}

/// Estimates the planar transform from marker space to frame space.
///
/// Must be deterministic for identical input and configuration, and must fail
/// on degenerate input instead of returning garbage.
pub trait GeometricSolver: Send + Sync {
    fn estimate(&self, correspondences: &[Correspondence]) -> Result<Homography, SolveError>;
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverParams {
    /// Reprojection distance in frame pixels below which a pair is an inlier.
    pub reproj_threshold_px: f64,
    pub max_iters: usize,
    pub confidence: f64,
    pub min_inliers: usize,
    pub seed: u64,
}

impl Default for SolverParams {
    fn default() -> Self {
        Self {
            reproj_threshold_px: 5.0,
            max_iters: 500,
            confidence: 0.995,
            min_inliers: 8,
            seed: 0x5eed_cafe,
        }
    }
}

// Minimum spread (std-dev along the thinner axis, px) of the inlier set.
const MIN_SPREAD_PX: f64 = 1.0;
// Twice the triangle area, px^2, under which a sample triple counts as collinear.
const MIN_SAMPLE_AREA2: f64 = 1.0;
const MIN_ABS_DET: f64 = 1e-8;

struct HomographyEstimator;

impl Estimator for HomographyEstimator {
    type Datum = Correspondence;
    type Model = Homography;

    const MIN_SAMPLES: usize = 4;

    fn fit(data: &[Self::Datum], sample: &[usize]) -> Option<Self::Model> {
        let src = [
            data[sample[0]].marker,
            data[sample[1]].marker,
            data[sample[2]].marker,
            data[sample[3]].marker,
        ];
        let dst = [
            data[sample[0]].frame,
            data[sample[1]].frame,
            data[sample[2]].frame,
            data[sample[3]].frame,
        ];
        homography_from_4pt(&src, &dst)
    }

    fn residual(model: &Self::Model, datum: &Self::Datum) -> f64 {
        model
            .apply(datum.marker)
            .map(|p| (p - datum.frame).norm())
            .unwrap_or(f64::INFINITY)
    }

    fn is_degenerate(data: &[Self::Datum], sample: &[usize]) -> bool {
        let collinear = |pts: [Point2<f64>; 4]| {
            (0..4).any(|skip| {
                let mut it = (0..4).filter(|&i| i != skip).map(|i| pts[i]);
                match (it.next(), it.next(), it.next()) {
                    (Some(a), Some(b), Some(c)) => triangle_area2(a, b, c).abs() < MIN_SAMPLE_AREA2,
                    _ => true,
                }
            })
        };
        let marker = [0, 1, 2, 3].map(|k| data[sample[k]].marker);
        let frame = [0, 1, 2, 3].map(|k| data[sample[k]].frame);
        collinear(marker) || collinear(frame)
    }

    fn refit(data: &[Self::Datum], inliers: &[usize]) -> Option<Self::Model> {
        let src: Vec<_> = inliers.iter().map(|&i| data[i].marker).collect();
        let dst: Vec<_> = inliers.iter().map(|&i| data[i].frame).collect();
        estimate_homography(&src, &dst)
    }
}

/// Smallest standard deviation of `pts` along any direction.
fn min_spread(pts: impl Iterator<Item = Point2<f64>> + Clone) -> f64 {
    let n = pts.clone().count() as f64;
    if n < 1.0 {
        return 0.0;
    }
    let (sx, sy) = pts.clone().fold((0.0, 0.0), |(sx, sy), p| (sx + p.x, sy + p.y));
    let (mx, my) = (sx / n, sy / n);
    let (cxx, cxy, cyy) = pts.fold((0.0, 0.0, 0.0), |(a, b, c), p| {
        let (dx, dy) = (p.x - mx, p.y - my);
        (a + dx * dx, b + dx * dy, c + dy * dy)
    });
    let (cxx, cxy, cyy) = (cxx / n, cxy / n, cyy / n);
    let half_trace = 0.5 * (cxx + cyy);
    let disc = (0.25 * (cxx - cyy).powi(2) + cxy * cxy).sqrt();
    (half_trace - disc).max(0.0).sqrt()
}

/// RANSAC over 4-point samples, refit on the consensus set with the
/// normalized DLT.
#[derive(Clone, Debug, Default)]
pub struct RansacHomographySolver {
    pub params: SolverParams,
}

impl RansacHomographySolver {
    pub fn new(params: SolverParams) -> Self {
        Self { params }
    }

    fn options(&self) -> RansacOptions {
        RansacOptions {
            max_iters: self.params.max_iters,
            thresh: self.params.reproj_threshold_px,
            min_inliers: self.params.min_inliers.max(HomographyEstimator::MIN_SAMPLES),
            confidence: self.params.confidence,
            seed: self.params.seed,
            refit_on_inliers: true,
        }
    }
}

impl GeometricSolver for RansacHomographySolver {
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip_all, fields(n = correspondences.len()))
    )]
    fn estimate(&self, correspondences: &[Correspondence]) -> Result<Homography, SolveError> {
        let n = correspondences.len();
        if n < HomographyEstimator::MIN_SAMPLES {
            return Err(SolveError::TooFewCorrespondences { got: n });
        }

        let marker_pts = correspondences.iter().map(|c| c.marker);
        let frame_pts = correspondences.iter().map(|c| c.frame);
        if min_spread(marker_pts) < MIN_SPREAD_PX || min_spread(frame_pts) < MIN_SPREAD_PX {
            return Err(SolveError::Degenerate);
        }

        let opts = self.options();
        let res = ransac::<HomographyEstimator>(correspondences, &opts);
        let Some(h) = res.model else {
            debug!("homography: no consensus among {n} correspondences");
            return Err(SolveError::NoConsensus {
                inliers: 0,
                required: opts.min_inliers,
            });
        };

        let inlier_marker = res.inliers.iter().map(|&i| correspondences[i].marker);
        if min_spread(inlier_marker) < MIN_SPREAD_PX {
            return Err(SolveError::Degenerate);
        }
        if h.normalized_determinant().abs() < MIN_ABS_DET {
            return Err(SolveError::Degenerate);
        }

        debug!(
            "homography: {}/{} inliers, rms {:.3}px after {} iters",
            res.inliers.len(),
            n,
            res.inlier_rms,
            res.iters
        );
        Ok(h)
    }
}
