//! Frame decoding and the per-frame processing pipeline shared by sessions.

use std::sync::Arc;
use std::time::Instant;

use base64::Engine as _;
use image::imageops::{self, FilterType};
use image::GrayImage;
use log::trace;
use marker_track_core::{FeatureDetector, FrameSize, RansacHomographySolver};
use marker_track_orb::OrbDetector;

use crate::config::ServerConfig;
use crate::detection::DetectionResult;
use crate::matching::MatchingEngine;
use crate::registry::MarkerRegistry;
use crate::tracking::{Tracker, TrackingParams};

#[derive(thiserror::Error, Debug)]
pub enum FrameError {
    #[error("frame payload is empty")]
    Empty,
    #[error("frame is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("frame image could not be decoded: {0}")]
    Image(#[from] image::ImageError),
}

/// Strip an optional `data:<mime>;base64,` prefix and decode.
pub fn decode_base64_payload(text: &str) -> Result<Vec<u8>, FrameError> {
    let text = text.trim();
    let payload = match text.split_once(";base64,") {
        Some((head, rest)) if head.starts_with("data:") => rest,
        _ => text,
    };
    if payload.is_empty() {
        return Err(FrameError::Empty);
    }
    Ok(base64::engine::general_purpose::STANDARD.decode(payload)?)
}

/// Decode an encoded still image to grayscale, downscaled so that its width
/// does not exceed `max_width` (aspect ratio kept).
pub fn decode_frame(bytes: &[u8], max_width: u32) -> Result<GrayImage, FrameError> {
    if bytes.is_empty() {
        return Err(FrameError::Empty);
    }
    let gray = image::load_from_memory(bytes)?.to_luma8();
    Ok(downscale(gray, max_width))
}

pub(crate) fn downscale(gray: GrayImage, max_width: u32) -> GrayImage {
    let (w, h) = gray.dimensions();
    if max_width == 0 || w <= max_width {
        return gray;
    }
    let nh = ((h as u64 * max_width as u64) / w as u64).max(1) as u32;
    imageops::resize(&gray, max_width, nh, FilterType::Triangle)
}

/// Everything a session needs to turn a frame into a result. Shared
/// read-only across connections; per-connection state lives in [`Tracker`].
pub struct FrameProcessor {
    registry: Arc<MarkerRegistry>,
    detector: Arc<dyn FeatureDetector>,
    engine: MatchingEngine,
    tracker_params: TrackingParams,
    max_frame_width: u32,
}

impl FrameProcessor {
    pub fn new(
        registry: Arc<MarkerRegistry>,
        detector: Arc<dyn FeatureDetector>,
        engine: MatchingEngine,
        tracker_params: TrackingParams,
        max_frame_width: u32,
    ) -> Self {
        Self {
            registry,
            detector,
            engine,
            tracker_params,
            max_frame_width,
        }
    }

    /// ORB frame detector and RANSAC solver configured from `config`.
    pub fn from_config(config: &ServerConfig, registry: Arc<MarkerRegistry>) -> Self {
        let solver = Arc::new(RansacHomographySolver::new(config.solver.clone()));
        Self::new(
            registry,
            Arc::new(OrbDetector::new(config.frame_orb.clone())),
            MatchingEngine::new(config.matching.clone(), solver),
            config.tracking.clone(),
            config.max_frame_width,
        )
    }

    pub fn registry(&self) -> &Arc<MarkerRegistry> {
        &self.registry
    }

    pub fn engine(&self) -> &MatchingEngine {
        &self.engine
    }

    pub fn new_tracker(&self) -> Tracker {
        Tracker::new(self.tracker_params.clone())
    }

    /// Extract features from an already decoded frame and step the tracker.
    pub fn process_image(
        &self,
        tracker: &mut Tracker,
        frame: &GrayImage,
        now: Instant,
    ) -> Option<DetectionResult> {
        let size = FrameSize::new(frame.width(), frame.height());
        let features = self.detector.extract(frame);
        trace!(
            "frame {}x{}: {} features",
            size.width,
            size.height,
            features.len()
        );
        tracker.step(&self.engine, &self.registry, &features, size, now)
    }

    /// Decode, downscale and process. A decode failure leaves the tracker
    /// untouched.
    pub fn process_bytes(
        &self,
        tracker: &mut Tracker,
        bytes: &[u8],
        now: Instant,
    ) -> Result<Option<DetectionResult>, FrameError> {
        let frame = decode_frame(bytes, self.max_frame_width)?;
        Ok(self.process_image(tracker, &frame, now))
    }
}
