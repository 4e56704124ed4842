//! Core types and geometry for planar marker tracking.
//!
//! This crate holds the feature/descriptor data model, the homography
//! estimator and the two extension seams used by the tracking engine:
//! [`FeatureDetector`] and [`GeometricSolver`]. It does not ship a concrete
//! feature detector.

mod features;
mod homography;
mod logger;
mod placement;
pub mod ransac;
mod solver;

pub use features::{Descriptor, FeatureDetector, FeatureSet, FeatureSetError, KeyPoint};
pub use homography::{estimate_homography, homography_from_4pt, Homography};
pub use placement::{FrameSize, Placement, ReferenceShape};
pub use solver::{
    Correspondence, GeometricSolver, RansacHomographySolver, SolveError, SolverParams,
};

#[cfg(feature = "tracing")]
pub use logger::init_tracing;

pub use logger::init_with_level;

/// Re-exported so downstream crates name the same image type.
pub use image::GrayImage;
