//! ORB-style feature extraction for `marker-track`.
//!
//! [`OrbDetector`] implements [`marker_track_core::FeatureDetector`]. It is
//! deterministic for a fixed image and [`OrbParams`], which the matching
//! engine relies on for reproducible scores.

mod brief;
mod fast;
mod orb;
mod params;

pub use orb::OrbDetector;
pub use params::OrbParams;
