//! Descriptor matching, candidate scoring and placement.

use std::sync::Arc;

use log::{debug, trace};
use marker_track_core::{
    Correspondence, Descriptor, FeatureSet, FrameSize, GeometricSolver, Placement,
    RansacHomographySolver, SolveError,
};
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::registry::{MarkerRecord, RegistrySnapshot};

/// Thresholds for the full matching pass. Distances are Hamming bits.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchParams {
    /// Frames with fewer descriptors never match.
    pub min_frame_features: usize,
    /// A correspondence is "good" when its distance is strictly below this.
    pub match_distance_threshold: u32,
    /// A candidate needs strictly more good matches than this.
    pub min_good_matches: usize,
    /// A candidate's score (good / marker features) must exceed this.
    pub min_match_ratio: f64,
    /// Markers with fewer descriptors are skipped.
    pub min_marker_features: usize,
    /// Keep only mutual nearest neighbours.
    pub cross_check: bool,
}

impl Default for MatchParams {
    fn default() -> Self {
        Self {
            min_frame_features: 15,
            match_distance_threshold: 50,
            min_good_matches: 12,
            min_match_ratio: 0.15,
            min_marker_features: 8,
            cross_check: true,
        }
    }
}

/// Nearest-neighbour pairing of a marker descriptor with a frame descriptor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DescriptorMatch {
    pub marker_idx: usize,
    pub frame_idx: usize,
    pub distance: u32,
}

// First index wins ties.
fn nearest(query: &Descriptor, train: &[Descriptor]) -> Option<(usize, u32)> {
    train
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, u32)>, (j, d)| {
            let dist = query.distance(d);
            match best {
                Some((_, b)) if b <= dist => best,
                _ => Some((j, dist)),
            }
        })
}

/// One best frame match per marker descriptor, sorted by distance (stable).
///
/// With `cross_check`, a pair survives only if the marker descriptor is also
/// the frame descriptor's nearest marker descriptor.
pub fn match_descriptors(
    marker: &[Descriptor],
    frame: &[Descriptor],
    cross_check: bool,
) -> Vec<DescriptorMatch> {
    let mut reverse: Vec<Option<usize>> = vec![None; if cross_check { frame.len() } else { 0 }];
    let mut out: Vec<DescriptorMatch> = marker
        .iter()
        .enumerate()
        .filter_map(|(i, q)| {
            let (j, distance) = nearest(q, frame)?;
            if cross_check {
                let back = *reverse[j].get_or_insert_with(|| {
                    nearest(&frame[j], marker).map_or(usize::MAX, |(k, _)| k)
                });
                if back != i {
                    return None;
                }
            }
            Some(DescriptorMatch {
                marker_idx: i,
                frame_idx: j,
                distance,
            })
        })
        .collect();
    out.sort_by_key(|m| m.distance);
    out
}

/// A marker that passed the descriptor thresholds for one frame.
#[derive(Clone, Debug)]
pub struct Candidate {
    pub marker: Arc<MarkerRecord>,
    /// Good matches only, closest first.
    pub matches: Vec<DescriptorMatch>,
    pub score: f64,
}

/// A located marker: candidate plus its placement in the frame.
#[derive(Clone, Debug)]
pub struct MatchOutcome {
    pub marker: Arc<MarkerRecord>,
    pub placement: Placement,
    pub score: f64,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum LocateError {
    #[error(transparent)]
    Solve(#[from] SolveError),
    #[error("projected marker corners are not finite")]
    Projection,
}

/// Scores markers against a frame and locates the winner.
#[derive(Clone)]
pub struct MatchingEngine {
    params: MatchParams,
    solver: Arc<dyn GeometricSolver>,
}

impl std::fmt::Debug for MatchingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatchingEngine")
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

impl Default for MatchingEngine {
    fn default() -> Self {
        Self::new(MatchParams::default(), Arc::new(RansacHomographySolver::default()))
    }
}

impl MatchingEngine {
    pub fn new(params: MatchParams, solver: Arc<dyn GeometricSolver>) -> Self {
        Self { params, solver }
    }

    pub fn params(&self) -> &MatchParams {
        &self.params
    }

    /// Score one marker. `None` unless it clears both the good-match count
    /// and the ratio threshold.
    pub fn score_marker(
        &self,
        marker: &Arc<MarkerRecord>,
        frame: &FeatureSet,
    ) -> Option<Candidate> {
        let features = marker.features();
        if features.len() < self.params.min_marker_features {
            return None;
        }
        let matches: Vec<_> =
            match_descriptors(features.descriptors(), frame.descriptors(), self.params.cross_check)
                .into_iter()
                .filter(|m| m.distance < self.params.match_distance_threshold)
                .collect();
        if matches.len() <= self.params.min_good_matches {
            return None;
        }
        let score = matches.len() as f64 / features.len() as f64;
        trace!(
            "marker {}: {} good matches, score {score:.3}",
            marker.id(),
            matches.len()
        );
        (score > self.params.min_match_ratio).then(|| Candidate {
            marker: Arc::clone(marker),
            matches,
            score,
        })
    }

    /// Highest-scoring candidate; the earliest registered marker wins ties.
    pub fn best_candidate(
        &self,
        frame: &FeatureSet,
        snapshot: &RegistrySnapshot,
    ) -> Option<Candidate> {
        if frame.len() < self.params.min_frame_features {
            return None;
        }
        snapshot
            .iter()
            .filter_map(|marker| self.score_marker(marker, frame))
            .fold(None, |best: Option<Candidate>, c| match best {
                Some(b) if b.score >= c.score => Some(b),
                _ => Some(c),
            })
    }

    /// Solve for the candidate's homography and turn its projected reference
    /// corners into a placement.
    pub fn locate(
        &self,
        candidate: &Candidate,
        frame: &FeatureSet,
        frame_size: FrameSize,
    ) -> Result<Placement, LocateError> {
        let mk = candidate.marker.features().keypoints();
        let fk = frame.keypoints();
        let correspondences: Vec<Correspondence> = candidate
            .matches
            .iter()
            .map(|m| {
                let a = mk[m.marker_idx];
                let b = fk[m.frame_idx];
                Correspondence::new(
                    Point2::new(a.x as f64, a.y as f64),
                    Point2::new(b.x as f64, b.y as f64),
                )
            })
            .collect();

        let h = self.solver.estimate(&correspondences)?;
        let quad = h
            .project_shape(candidate.marker.shape())
            .ok_or(LocateError::Projection)?;
        Placement::from_quad(&quad, frame_size).ok_or(LocateError::Projection)
    }

    /// Full pass: best candidate, then geometry. A geometry failure is a
    /// miss; the runner-up is not tried.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip_all, fields(frame = frame.len(), markers = snapshot.len()))
    )]
    pub fn find(
        &self,
        frame: &FeatureSet,
        frame_size: FrameSize,
        snapshot: &RegistrySnapshot,
    ) -> Option<MatchOutcome> {
        let candidate = self.best_candidate(frame, snapshot)?;
        match self.locate(&candidate, frame, frame_size) {
            Ok(placement) => Some(MatchOutcome {
                marker: candidate.marker,
                placement,
                score: candidate.score,
            }),
            Err(e) => {
                debug!("marker {} matched but not located: {e}", candidate.marker.id());
                None
            }
        }
    }

    /// Cheap check that a locked marker is still in view: more than
    /// `min_matches` nearest-neighbour matches and a best distance below
    /// `max_distance`. No scoring, no geometry.
    pub fn reverify(
        &self,
        marker: &MarkerRecord,
        frame: &FeatureSet,
        min_matches: usize,
        max_distance: u32,
    ) -> bool {
        let features = marker.features();
        if features.is_empty() || frame.is_empty() {
            return false;
        }
        let matches =
            match_descriptors(features.descriptors(), frame.descriptors(), self.params.cross_check);
        matches.len() > min_matches && matches.first().is_some_and(|m| m.distance < max_distance)
    }
}
