//! Marker registry shared by every connection.
//!
//! The registry is a copy-on-write list: readers take a [`RegistrySnapshot`]
//! (an `Arc` clone under a short read lock) and iterate it without holding
//! any lock; writers clone the list only when a snapshot is still alive,
//! mutate it and publish it under the write lock. A record is an immutable
//! `Arc<MarkerRecord>`, so a reader never sees a half-updated entry.

use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

use log::{debug, info};
use marker_track_core::{Descriptor, FeatureSet, FeatureSetError, KeyPoint, ReferenceShape};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Opaque, stable marker identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MarkerId(String);

impl MarkerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MarkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MarkerId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for MarkerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl Borrow<str> for MarkerId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum MarkerError {
    #[error("marker id must not be empty")]
    EmptyId,
    #[error("marker {id}: reference shape {width}x{height} has no area")]
    EmptyShape { id: MarkerId, width: u32, height: u32 },
    #[error("marker {id}: keypoint at ({x}, {y}) is not finite")]
    NonFiniteKeypoint { id: MarkerId, x: f32, y: f32 },
    #[error(transparent)]
    Features(#[from] FeatureSetError),
}

/// One registered marker. Descriptors and reference shape are fixed at
/// construction; only the display name can change, by replacing the record.
#[derive(Clone, Debug)]
pub struct MarkerRecord {
    id: MarkerId,
    name: String,
    media_url: String,
    shape: ReferenceShape,
    features: Arc<FeatureSet>,
}

impl MarkerRecord {
    /// Validate and build a record. Empty feature sets are allowed; such a
    /// marker simply never becomes a candidate.
    pub fn new(
        id: impl Into<MarkerId>,
        shape: ReferenceShape,
        features: FeatureSet,
    ) -> Result<Self, MarkerError> {
        let id = id.into();
        if id.as_str().trim().is_empty() {
            return Err(MarkerError::EmptyId);
        }
        if shape.is_empty() {
            return Err(MarkerError::EmptyShape {
                id,
                width: shape.width,
                height: shape.height,
            });
        }
        if let Some(kp) = features
            .keypoints()
            .iter()
            .find(|kp| !kp.x.is_finite() || !kp.y.is_finite())
        {
            return Err(MarkerError::NonFiniteKeypoint {
                id,
                x: kp.x,
                y: kp.y,
            });
        }
        Ok(Self {
            name: id.as_str().to_owned(),
            id,
            media_url: String::new(),
            shape,
            features: Arc::new(features),
        })
    }

    /// Like [`MarkerRecord::new`] from unpaired keypoints and descriptors.
    pub fn from_parts(
        id: impl Into<MarkerId>,
        shape: ReferenceShape,
        keypoints: Vec<KeyPoint>,
        descriptors: Vec<Descriptor>,
    ) -> Result<Self, MarkerError> {
        Self::new(id, shape, FeatureSet::new(keypoints, descriptors)?)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_media_url(mut self, url: impl Into<String>) -> Self {
        self.media_url = url.into();
        self
    }

    pub fn id(&self) -> &MarkerId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn media_url(&self) -> &str {
        &self.media_url
    }

    pub fn shape(&self) -> ReferenceShape {
        self.shape
    }

    pub fn features(&self) -> &FeatureSet {
        &self.features
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("marker {0} not found")]
    NotFound(MarkerId),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddOutcome {
    Inserted,
    Replaced,
}

type Records = Arc<Vec<Arc<MarkerRecord>>>;

/// Immutable view of the registry at one instant, in insertion order.
#[derive(Clone, Debug, Default)]
pub struct RegistrySnapshot {
    records: Records,
}

impl RegistrySnapshot {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<MarkerRecord>> {
        self.records.iter()
    }

    pub fn get(&self, id: &str) -> Option<&Arc<MarkerRecord>> {
        self.records.iter().find(|r| r.id.as_str() == id)
    }
}

impl<'a> IntoIterator for &'a RegistrySnapshot {
    type Item = &'a Arc<MarkerRecord>;
    type IntoIter = std::slice::Iter<'a, Arc<MarkerRecord>>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

#[derive(Debug, Default)]
pub struct MarkerRegistry {
    records: RwLock<Records>,
}

impl MarkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            records: Arc::clone(&self.records.read()),
        }
    }

    /// Insert a record, or replace the one with the same id in place
    /// (it keeps its original insertion slot).
    pub fn add(&self, record: MarkerRecord) -> AddOutcome {
        let record = Arc::new(record);
        let mut guard = self.records.write();
        let list = Arc::make_mut(&mut *guard);
        let outcome = match list.iter().position(|r| r.id == record.id) {
            Some(i) => {
                list[i] = Arc::clone(&record);
                AddOutcome::Replaced
            }
            None => {
                list.push(Arc::clone(&record));
                AddOutcome::Inserted
            }
        };
        drop(guard);
        info!(
            "registry: {:?} marker {} ({} features)",
            outcome,
            record.id,
            record.features.len()
        );
        outcome
    }

    pub fn remove(&self, id: &str) -> Result<Arc<MarkerRecord>, RegistryError> {
        let mut guard = self.records.write();
        let Some(i) = guard.iter().position(|r| r.id.as_str() == id) else {
            debug!("registry: remove of unknown marker {id}");
            return Err(RegistryError::NotFound(MarkerId::new(id)));
        };
        let removed = Arc::make_mut(&mut *guard).remove(i);
        drop(guard);
        info!("registry: removed marker {id}");
        Ok(removed)
    }

    /// Rename a marker. Descriptors and shape are shared with the old record.
    pub fn update_name(&self, id: &str, name: impl Into<String>) -> Result<(), RegistryError> {
        let name = name.into();
        let mut guard = self.records.write();
        let Some(i) = guard.iter().position(|r| r.id.as_str() == id) else {
            return Err(RegistryError::NotFound(MarkerId::new(id)));
        };
        let list = Arc::make_mut(&mut *guard);
        let renamed = MarkerRecord {
            name,
            ..MarkerRecord::clone(&list[i])
        };
        list[i] = Arc::new(renamed);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Arc<MarkerRecord>> {
        self.records
            .read()
            .iter()
            .find(|r| r.id.as_str() == id)
            .cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.records.read().iter().any(|r| r.id.as_str() == id)
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}
