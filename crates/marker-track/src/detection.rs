//! The per-frame result record and its wire encoding.

use marker_track_core::Placement;
use serde::{Deserialize, Serialize};

use crate::registry::{MarkerId, MarkerRecord};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackStatus {
    /// Fresh full match this frame.
    New,
    /// Lock re-verified; placement carried over unchanged.
    Active,
    /// Lock lost this frame; last placement shown one more time.
    Tracking,
}

/// What a client is told about one frame.
///
/// Serializes to `{"id","x","y","width","height","videoUrl","name","score","status"}`;
/// placement fields and `score` are omitted when absent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub id: MarkerId,
    #[serde(flatten)]
    pub placement: Option<Placement>,
    #[serde(rename = "videoUrl")]
    pub media_url: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    pub status: TrackStatus,
}

impl DetectionResult {
    pub fn new(
        marker: &MarkerRecord,
        placement: Option<Placement>,
        status: TrackStatus,
        score: Option<f64>,
    ) -> Self {
        Self {
            id: marker.id().clone(),
            placement,
            media_url: marker.media_url().to_owned(),
            name: marker.name().to_owned(),
            score,
            status,
        }
    }
}

/// Encode a frame's outcome as the JSON array sent to clients; `[]` means
/// nothing was detected.
pub fn encode_results(result: Option<&DetectionResult>) -> Result<String, serde_json::Error> {
    serde_json::to_string(result.map(std::slice::from_ref).unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use marker_track_core::{FeatureSet, ReferenceShape};
    use serde_json::{json, Value};

    fn record() -> MarkerRecord {
        MarkerRecord::new("m1", ReferenceShape::default(), FeatureSet::empty())
            .expect("record")
            .with_name("Poster")
            .with_media_url("clip1")
    }

    #[test]
    fn empty_is_an_empty_array() {
        assert_eq!(encode_results(None).expect("json"), "[]");
    }

    #[test]
    fn new_result_carries_placement_and_score() {
        let placement = Placement {
            x: 10.0,
            y: 20.0,
            width: 30.0,
            height: 40.0,
        };
        let r = DetectionResult::new(&record(), Some(placement), TrackStatus::New, Some(0.5));
        let text = encode_results(Some(&r)).expect("json");
        let v: Value = serde_json::from_str(&text).expect("parse");
        assert_eq!(
            v,
            json!([{
                "id": "m1",
                "x": 10.0,
                "y": 20.0,
                "width": 30.0,
                "height": 40.0,
                "videoUrl": "clip1",
                "name": "Poster",
                "score": 0.5,
                "status": "new"
            }])
        );
    }

    #[test]
    fn absent_fields_are_omitted() {
        let r = DetectionResult::new(&record(), None, TrackStatus::Tracking, None);
        let v = serde_json::to_value(&r).expect("json");
        let obj = v.as_object().expect("object");
        assert!(!obj.contains_key("x"));
        assert!(!obj.contains_key("score"));
        assert_eq!(obj["status"], "tracking");

        let back: DetectionResult = serde_json::from_value(v).expect("round trip");
        assert_eq!(back, r);
    }
}
