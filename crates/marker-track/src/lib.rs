//! Real-time planar marker detection and tracking.
//!
//! Clients stream camera frames over a websocket; for every frame the server
//! answers with at most one detected marker, its placement in the frame and a
//! lifecycle status (`new`, `active`, `tracking`).
//!
//! This crate provides:
//! - a concurrent [`MarkerRegistry`] of reference markers,
//! - the [`MatchingEngine`] that scores markers against a frame and locates
//!   the winner,
//! - the per-connection [`Tracker`] state machine,
//! - (feature `server`) the axum websocket surface in [`server`].
//!
//! ## Quickstart
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Instant;
//! use marker_track::{FrameProcessor, MarkerEnroller, MarkerRegistry, ServerConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ServerConfig::default();
//! let registry = Arc::new(MarkerRegistry::new());
//! let poster = std::fs::read("poster.png")?;
//! let record = MarkerEnroller::from_config(&config).enroll_bytes("m1", None, "clip1", &poster)?;
//! registry.add(record);
//!
//! let processor = FrameProcessor::from_config(&config, registry);
//! let mut tracker = processor.new_tracker();
//! let frame = std::fs::read("frame.jpg")?;
//! let result = processor.process_bytes(&mut tracker, &frame, Instant::now())?;
//! println!("{}", marker_track::encode_results(result.as_ref())?);
//! # Ok(())
//! # }
//! ```
//!
//! ## API map
//! - `marker_track::core`: feature sets, homography, placement, solver seam.
//! - `marker_track::orb`: the ORB feature detector.
//! - [`registry`], [`matching`], [`tracking`]: the detection core.
//! - [`pipeline`], [`session`]: frame decoding and the per-connection loop.

pub use marker_track_core as core;
pub use marker_track_orb as orb;

pub mod config;
pub mod detection;
pub mod enroll;
pub mod matching;
pub mod pipeline;
pub mod registry;
pub mod session;
pub mod tracking;

#[cfg(feature = "server")]
pub mod server;

pub use config::{ConfigError, ConfigIoError, MarkerSpec, ServerConfig};
pub use detection::{encode_results, DetectionResult, TrackStatus};
pub use enroll::{EnrollError, MarkerEnroller};
pub use matching::{MatchOutcome, MatchParams, MatchingEngine};
pub use pipeline::{FrameError, FrameProcessor};
pub use registry::{
    AddOutcome, MarkerError, MarkerId, MarkerRecord, MarkerRegistry, RegistryError,
    RegistrySnapshot,
};
pub use session::{run_session, ChannelTransport, FrameTransport, Inbound, SessionError};
pub use tracking::{Tracker, TrackingParams};
