//! Turning reference images into registry records.

use std::path::PathBuf;
use std::sync::Arc;

use image::imageops::{self, FilterType};
use image::DynamicImage;
use log::{info, warn};
use marker_track_core::{FeatureDetector, ReferenceShape};
use marker_track_orb::OrbDetector;

use crate::config::{MarkerSpec, ServerConfig};
use crate::registry::{MarkerError, MarkerRecord, MarkerRegistry};

#[derive(thiserror::Error, Debug)]
pub enum EnrollError {
    #[error("failed to read marker image {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("failed to decode marker image: {0}")]
    Decode(#[from] image::ImageError),
    #[error(transparent)]
    Marker(#[from] MarkerError),
}

/// Builds [`MarkerRecord`]s: grayscale, resize to the reference shape,
/// extract features with the marker-side detector.
pub struct MarkerEnroller {
    detector: Arc<dyn FeatureDetector>,
    shape: ReferenceShape,
}

impl MarkerEnroller {
    pub fn new(detector: Arc<dyn FeatureDetector>, shape: ReferenceShape) -> Self {
        Self { detector, shape }
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new(
            Arc::new(OrbDetector::new(config.marker_orb.clone())),
            config.reference_shape(),
        )
    }

    pub fn shape(&self) -> ReferenceShape {
        self.shape
    }

    pub fn enroll_image(
        &self,
        id: &str,
        name: Option<&str>,
        media_url: &str,
        image: &DynamicImage,
    ) -> Result<MarkerRecord, EnrollError> {
        let gray = image.to_luma8();
        let gray = imageops::resize(
            &gray,
            self.shape.width,
            self.shape.height,
            FilterType::Triangle,
        );
        let features = self.detector.extract(&gray);
        let record = MarkerRecord::new(id, self.shape, features)?
            .with_name(name.unwrap_or(id))
            .with_media_url(media_url);
        if record.features().is_empty() {
            warn!("marker {id}: reference image has no features; it will never match");
        }
        Ok(record)
    }

    pub fn enroll_bytes(
        &self,
        id: &str,
        name: Option<&str>,
        media_url: &str,
        bytes: &[u8],
    ) -> Result<MarkerRecord, EnrollError> {
        let image = image::load_from_memory(bytes)?;
        self.enroll_image(id, name, media_url, &image)
    }

    pub fn enroll_spec(&self, spec: &MarkerSpec) -> Result<MarkerRecord, EnrollError> {
        let image = image::open(&spec.image_path).map_err(|source| EnrollError::Image {
            path: spec.image_path.clone(),
            source,
        })?;
        self.enroll_image(&spec.id, spec.name.as_deref(), &spec.media_url, &image)
    }

    /// Enroll every spec into `registry`. Failures are logged and skipped;
    /// returns how many markers were added.
    pub fn enroll_all(&self, specs: &[MarkerSpec], registry: &MarkerRegistry) -> usize {
        let mut added = 0;
        for spec in specs {
            match self.enroll_spec(spec) {
                Ok(record) => {
                    info!(
                        "enrolled marker {} with {} features",
                        record.id(),
                        record.features().len()
                    );
                    registry.add(record);
                    added += 1;
                }
                Err(e) => warn!("skipping marker {}: {e}", spec.id),
            }
        }
        added
    }
}
