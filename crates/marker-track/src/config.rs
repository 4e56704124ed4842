//! JSON server configuration.

use std::collections::HashSet;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use marker_track_core::{ReferenceShape, SolverParams};
use marker_track_orb::OrbParams;
use serde::{Deserialize, Serialize};

use crate::matching::MatchParams;
use crate::tracking::TrackingParams;

#[derive(thiserror::Error, Debug)]
pub enum ConfigIoError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{field} must be {expected}, got {value}")]
    OutOfRange {
        field: &'static str,
        expected: &'static str,
        value: String,
    },
    #[error("bind address {addr:?} is not a socket address")]
    InvalidBind { addr: String },
    #[error("marker #{index} has an empty id")]
    EmptyMarkerId { index: usize },
    #[error("marker id {0:?} is listed more than once")]
    DuplicateMarker(String),
}

/// One marker to enroll at startup.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MarkerSpec {
    pub id: String,
    /// Display name; defaults to the id.
    #[serde(default)]
    pub name: Option<String>,
    /// Reference image; relative paths resolve against the config file.
    pub image_path: PathBuf,
    #[serde(default)]
    pub media_url: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub markers: Vec<MarkerSpec>,
    /// `[width, height]` every marker image is resized to before extraction.
    pub reference_size: [u32; 2],
    /// Wider frames are downscaled to this width before extraction.
    pub max_frame_width: u32,
    pub matching: MatchParams,
    pub tracking: TrackingParams,
    pub frame_orb: OrbParams,
    pub marker_orb: OrbParams,
    pub solver: SolverParams,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8000".to_string(),
            markers: Vec::new(),
            reference_size: [500, 500],
            max_frame_width: 640,
            matching: MatchParams::default(),
            tracking: TrackingParams::default(),
            frame_orb: OrbParams::for_frames(),
            marker_orb: OrbParams::for_markers(),
            solver: SolverParams::default(),
        }
    }
}

fn out_of_range(field: &'static str, expected: &'static str, value: impl ToString) -> ConfigError {
    ConfigError::OutOfRange {
        field,
        expected,
        value: value.to_string(),
    }
}

impl ServerConfig {
    /// Load a JSON config from disk.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, ConfigIoError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Write this config to disk as pretty JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), ConfigIoError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Make relative marker image paths relative to `base`.
    pub fn resolve_paths(&mut self, base: &Path) {
        for m in &mut self.markers {
            if m.image_path.is_relative() {
                m.image_path = base.join(&m.image_path);
            }
        }
    }

    pub fn reference_shape(&self) -> ReferenceShape {
        ReferenceShape::new(self.reference_size[0], self.reference_size[1])
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.bind.parse().map_err(|_| ConfigError::InvalidBind {
            addr: self.bind.clone(),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.bind_addr()?;

        let m = &self.matching;
        if m.match_distance_threshold == 0 || m.match_distance_threshold > 256 {
            return Err(out_of_range(
                "matching.match_distance_threshold",
                "in 1..=256",
                m.match_distance_threshold,
            ));
        }
        if !(m.min_match_ratio > 0.0 && m.min_match_ratio <= 1.0) {
            return Err(out_of_range(
                "matching.min_match_ratio",
                "in (0, 1]",
                m.min_match_ratio,
            ));
        }
        if m.min_frame_features == 0 {
            return Err(out_of_range("matching.min_frame_features", "positive", 0));
        }
        if m.min_good_matches < 3 {
            // a homography needs four correspondences
            return Err(out_of_range(
                "matching.min_good_matches",
                "at least 3",
                m.min_good_matches,
            ));
        }

        let t = &self.tracking;
        if t.continuity_window_ms == 0 {
            return Err(out_of_range("tracking.continuity_window_ms", "positive", 0));
        }
        if t.reverify_max_distance == 0 || t.reverify_max_distance > 256 {
            return Err(out_of_range(
                "tracking.reverify_max_distance",
                "in 1..=256",
                t.reverify_max_distance,
            ));
        }

        if self.reference_shape().is_empty() {
            return Err(out_of_range(
                "reference_size",
                "non-zero",
                format!("{:?}", self.reference_size),
            ));
        }
        if self.max_frame_width < 32 {
            return Err(out_of_range(
                "max_frame_width",
                "at least 32",
                self.max_frame_width,
            ));
        }

        let s = &self.solver;
        if !(s.reproj_threshold_px.is_finite() && s.reproj_threshold_px > 0.0) {
            return Err(out_of_range(
                "solver.reproj_threshold_px",
                "positive",
                s.reproj_threshold_px,
            ));
        }
        if !(s.confidence > 0.0 && s.confidence < 1.0) {
            return Err(out_of_range("solver.confidence", "in (0, 1)", s.confidence));
        }
        if s.max_iters == 0 {
            return Err(out_of_range("solver.max_iters", "positive", 0));
        }

        for (name, orb) in [("frame_orb", &self.frame_orb), ("marker_orb", &self.marker_orb)] {
            if orb.max_features == 0 {
                return Err(out_of_range(name, "max_features > 0", 0));
            }
            if !(orb.scale_factor >= 1.0 && orb.scale_factor.is_finite()) {
                return Err(out_of_range(name, "scale_factor >= 1", orb.scale_factor));
            }
        }

        let mut seen = HashSet::new();
        for (index, spec) in self.markers.iter().enumerate() {
            if spec.id.trim().is_empty() {
                return Err(ConfigError::EmptyMarkerId { index });
            }
            if !seen.insert(spec.id.as_str()) {
                return Err(ConfigError::DuplicateMarker(spec.id.clone()));
            }
        }
        Ok(())
    }
}
