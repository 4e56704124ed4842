//! Per-connection lock/hold/release state machine.
//!
//! Each frame is resolved in priority order:
//!
//! 1. Locked and within the continuity window: re-verify against the locked
//!    marker only. On success emit [`TrackStatus::Active`] with the stored
//!    placement, untouched, and refresh the lock time.
//! 2. Full scan of the registry. On a located match, lock onto it and emit
//!    [`TrackStatus::New`].
//! 3. A lock is still held (expired or failed re-verification): emit
//!    [`TrackStatus::Tracking`] with the stale placement once, then unlock.
//! 4. Otherwise emit nothing.
//!
//! Metadata is always read from the live registry when a result is built, so
//! renamed markers show their new name and removed markers produce nothing.

use std::time::{Duration, Instant};

use log::debug;
use marker_track_core::{FeatureSet, FrameSize, Placement};
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::detection::{DetectionResult, TrackStatus};
use crate::matching::MatchingEngine;
use crate::registry::{MarkerId, MarkerRegistry};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingParams {
    /// How long a lock survives without a fresh full match.
    pub continuity_window_ms: u64,
    /// Re-verification needs strictly more matches than this.
    pub reverify_min_matches: usize,
    /// Re-verification needs a best distance strictly below this.
    pub reverify_max_distance: u32,
}

impl Default for TrackingParams {
    fn default() -> Self {
        Self {
            continuity_window_ms: 5000,
            reverify_min_matches: 10,
            reverify_max_distance: 50,
        }
    }
}

impl TrackingParams {
    pub fn continuity_window(&self) -> Duration {
        Duration::from_millis(self.continuity_window_ms)
    }
}

#[derive(Clone, Debug)]
struct Lock {
    marker: MarkerId,
    since: Instant,
    placement: Placement,
}

/// Tracking state for one connection. Created when the connection opens,
/// dropped when it closes.
#[derive(Clone, Debug)]
pub struct Tracker {
    params: TrackingParams,
    lock: Option<Lock>,
}

impl Tracker {
    pub fn new(params: TrackingParams) -> Self {
        Self { params, lock: None }
    }

    pub fn params(&self) -> &TrackingParams {
        &self.params
    }

    pub fn locked_marker(&self) -> Option<&MarkerId> {
        self.lock.as_ref().map(|l| &l.marker)
    }

    pub fn last_placement(&self) -> Option<Placement> {
        self.lock.as_ref().map(|l| l.placement)
    }

    pub fn locked_since(&self) -> Option<Instant> {
        self.lock.as_ref().map(|l| l.since)
    }

    pub fn is_idle(&self) -> bool {
        self.lock.is_none()
    }

    /// True while a lock exists and is younger than the continuity window.
    pub fn is_locked_at(&self, now: Instant) -> bool {
        let window = self.params.continuity_window();
        self.lock
            .as_ref()
            .is_some_and(|l| now.saturating_duration_since(l.since) < window)
    }

    pub fn reset(&mut self) {
        self.lock = None;
    }

    /// Advance the state machine by one frame.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip_all, fields(frame = frame.len()))
    )]
    pub fn step(
        &mut self,
        engine: &MatchingEngine,
        registry: &MarkerRegistry,
        frame: &FeatureSet,
        frame_size: FrameSize,
        now: Instant,
    ) -> Option<DetectionResult> {
        if let Some(result) = self.try_reverify(engine, registry, frame, now) {
            return Some(result);
        }

        let snapshot = registry.snapshot();
        if let Some(hit) = engine.find(frame, frame_size, &snapshot) {
            drop(snapshot);
            // the marker may have been removed while we matched
            if let Some(current) = registry.get(hit.marker.id().as_str()) {
                debug!(
                    "lock on {} (score {:.3}) at {:?}",
                    current.id(),
                    hit.score,
                    hit.placement
                );
                self.lock = Some(Lock {
                    marker: current.id().clone(),
                    since: now,
                    placement: hit.placement,
                });
                return Some(DetectionResult::new(
                    &current,
                    Some(hit.placement),
                    TrackStatus::New,
                    Some(hit.score),
                ));
            }
        }

        let lock = self.lock.take()?;
        debug!("lock on {} released", lock.marker);
        let current = registry.get(lock.marker.as_str())?;
        Some(DetectionResult::new(
            &current,
            Some(lock.placement),
            TrackStatus::Tracking,
            None,
        ))
    }

    fn try_reverify(
        &mut self,
        engine: &MatchingEngine,
        registry: &MarkerRegistry,
        frame: &FeatureSet,
        now: Instant,
    ) -> Option<DetectionResult> {
        if !self.is_locked_at(now) {
            return None;
        }
        let lock = self.lock.as_mut()?;
        let marker = registry.get(lock.marker.as_str())?;
        if !engine.reverify(
            &marker,
            frame,
            self.params.reverify_min_matches,
            self.params.reverify_max_distance,
        ) {
            return None;
        }
        lock.since = now;
        Some(DetectionResult::new(
            &marker,
            Some(lock.placement),
            TrackStatus::Active,
            None,
        ))
    }
}
