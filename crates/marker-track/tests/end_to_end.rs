//! Full matching and tracking passes with the real RANSAC solver over
//! synthetic feature sets.

use std::sync::Arc;
use std::time::{Duration, Instant};

use approx::assert_relative_eq;
use marker_track::core::{Descriptor, FeatureSet, FrameSize, KeyPoint, ReferenceShape};
use marker_track::{
    encode_results, MarkerRecord, MarkerRegistry, MatchParams, MatchingEngine, TrackStatus,
    Tracker, TrackingParams,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn desc(seed: u64) -> Descriptor {
    let mut z = seed.wrapping_mul(0x2545_f491_4f6c_dd1d);
    Descriptor(std::array::from_fn(|_| {
        z = z.wrapping_add(0x9e37_79b9_7f4a_7c15);
        let x = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
        let x = (x ^ (x >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
        x ^ (x >> 31)
    }))
}

/// 50 keypoints spread over the 500x500 reference image.
fn marker_keypoint(i: u64) -> KeyPoint {
    KeyPoint::at((i % 10) as f32 * 50.0 + 25.0, (i / 10) as f32 * 100.0 + 50.0)
}

fn marker_features() -> FeatureSet {
    (0..50).map(|i| (marker_keypoint(i), desc(i))).collect()
}

/// Half scale, shifted by (100, 50).
fn to_frame(kp: KeyPoint) -> KeyPoint {
    KeyPoint::at(kp.x * 0.5 + 100.0, kp.y * 0.5 + 50.0)
}

/// The first `hits` marker descriptors seen through [`to_frame`], padded with
/// unrelated features to `total`.
fn frame_features(hits: u64, total: u64) -> FeatureSet {
    (0..total)
        .map(|i| {
            if i < hits {
                (to_frame(marker_keypoint(i)), desc(i))
            } else {
                let k = i * 37 % 600;
                (KeyPoint::at(k as f32, (k % 470) as f32), desc(10_000 + i))
            }
        })
        .collect()
}

fn noise(n: u64, salt: u64) -> FeatureSet {
    (0..n)
        .map(|i| (KeyPoint::at(i as f32 * 7.0, i as f32 * 3.0), desc(50_000 + salt * 1000 + i)))
        .collect()
}

fn registry() -> MarkerRegistry {
    let reg = MarkerRegistry::new();
    reg.add(
        MarkerRecord::new("m1", ReferenceShape::new(500, 500), marker_features())
            .expect("record")
            .with_name("Poster")
            .with_media_url("clip1"),
    );
    reg
}

const FRAME: FrameSize = FrameSize::new(640, 480);

#[test]
fn first_sighting_locks_and_reports_placement() {
    init_logging();
    let reg = registry();
    let engine = MatchingEngine::default();
    let mut tracker = Tracker::new(TrackingParams::default());

    let r = tracker
        .step(&engine, &reg, &frame_features(20, 40), FRAME, Instant::now())
        .expect("detected");
    assert_eq!(r.id.as_str(), "m1");
    assert_eq!(r.status, TrackStatus::New);
    assert_eq!(r.media_url, "clip1");
    assert_eq!(r.name, "Poster");
    assert_relative_eq!(r.score.expect("score"), 0.4, epsilon = 1e-12);

    let p = r.placement.expect("placement");
    assert_relative_eq!(p.x, 100.0 / 640.0 * 100.0, epsilon = 1e-6);
    assert_relative_eq!(p.y, 50.0 / 480.0 * 100.0, epsilon = 1e-6);
    assert_relative_eq!(p.width, 250.0 / 640.0 * 100.0, epsilon = 1e-6);
    assert_relative_eq!(p.height, 250.0 / 480.0 * 100.0, epsilon = 1e-6);
    assert_eq!(tracker.locked_marker().map(|m| m.as_str()), Some("m1"));

    let json: serde_json::Value =
        serde_json::from_str(&encode_results(Some(&r)).expect("encode")).expect("json");
    assert_eq!(json[0]["status"], "new");
    assert_eq!(json[0]["videoUrl"], "clip1");
}

#[test]
fn lifecycle_new_active_tracking_idle() {
    init_logging();
    let reg = registry();
    let engine = MatchingEngine::default();
    let mut tracker = Tracker::new(TrackingParams::default());
    let t0 = Instant::now();
    let seen = frame_features(20, 40);

    let first = tracker.step(&engine, &reg, &seen, FRAME, t0).expect("new");
    assert_eq!(first.status, TrackStatus::New);

    let second = tracker
        .step(&engine, &reg, &seen, FRAME, t0 + Duration::from_millis(33))
        .expect("active");
    assert_eq!(second.status, TrackStatus::Active);
    assert_eq!(second.placement, first.placement);

    // lock refreshed at t0+33ms, so t0+5s is still inside the window
    let third = tracker
        .step(&engine, &reg, &seen, FRAME, t0 + Duration::from_millis(5000))
        .expect("active");
    assert_eq!(third.status, TrackStatus::Active);

    let gone = t0 + Duration::from_secs(11);
    let fourth = tracker
        .step(&engine, &reg, &noise(40, 1), FRAME, gone)
        .expect("tracking");
    assert_eq!(fourth.status, TrackStatus::Tracking);
    assert_eq!(fourth.placement, first.placement);

    assert!(tracker
        .step(&engine, &reg, &noise(40, 2), FRAME, gone + Duration::from_millis(33))
        .is_none());
    assert!(tracker.is_idle());
}

#[test]
fn too_few_frame_features_never_match() {
    let reg = registry();
    let engine = MatchingEngine::default();
    let mut tracker = Tracker::new(TrackingParams::default());
    // 14 features, all of them perfect matches
    let frame = frame_features(14, 14);
    assert!(engine.best_candidate(&frame, &reg.snapshot()).is_none());
    assert!(tracker
        .step(&engine, &reg, &frame, FRAME, Instant::now())
        .is_none());
}

#[test]
fn marker_matches_its_own_features() {
    let reg = registry();
    let engine = MatchingEngine::default();
    let snapshot = reg.snapshot();
    let hit = engine
        .find(&marker_features(), FrameSize::new(500, 500), &snapshot)
        .expect("self match");
    assert_relative_eq!(hit.score, 1.0);
    assert_relative_eq!(hit.placement.x, 0.0, epsilon = 1e-6);
    assert_relative_eq!(hit.placement.width, 100.0, epsilon = 1e-6);
}

#[test]
fn below_threshold_match_count_is_rejected() {
    let reg = registry();
    let engine = MatchingEngine::new(
        MatchParams {
            min_good_matches: 12,
            ..MatchParams::default()
        },
        Arc::new(marker_track::core::RansacHomographySolver::default()),
    );
    // exactly 12 good matches is not enough
    assert!(engine
        .best_candidate(&frame_features(12, 40), &reg.snapshot())
        .is_none());
    assert!(engine
        .best_candidate(&frame_features(13, 40), &reg.snapshot())
        .is_some());
}

#[test]
fn empty_registry_yields_nothing() {
    let reg = MarkerRegistry::new();
    let engine = MatchingEngine::default();
    let mut tracker = Tracker::new(TrackingParams::default());
    let t0 = Instant::now();
    for k in 0..10u64 {
        let now = t0 + Duration::from_millis(k * 33);
        assert!(tracker
            .step(&engine, &reg, &frame_features(30, 40), FRAME, now)
            .is_none());
    }
    assert!(tracker.is_idle());
}
