//! Registry behaviour under concurrent readers and writers, plus config
//! driven enrollment from disk.

use std::sync::Arc;
use std::thread;

use image::{GrayImage, Luma};
use marker_track::core::{Descriptor, FeatureSet, KeyPoint, ReferenceShape};
use marker_track::{
    AddOutcome, MarkerEnroller, MarkerRecord, MarkerRegistry, MarkerSpec, RegistryError,
    ServerConfig,
};

fn features(n: u64) -> FeatureSet {
    (0..n)
        .map(|i| (KeyPoint::at(i as f32, i as f32), Descriptor([i, !i, i << 3, i >> 1])))
        .collect()
}

fn record(id: &str, n: u64) -> MarkerRecord {
    MarkerRecord::new(id, ReferenceShape::default(), features(n)).expect("record")
}

/// Shape side and feature count both equal `k`, so a torn record is visible.
fn versioned(id: &str, k: u32) -> MarkerRecord {
    MarkerRecord::new(id, ReferenceShape::new(k, k), features(k as u64)).expect("record")
}

#[test]
fn snapshots_are_stable_while_writers_run() {
    let reg = Arc::new(MarkerRegistry::new());
    for i in 0..4 {
        reg.add(record(&format!("base{i}"), 10));
    }

    let writer = {
        let reg = Arc::clone(&reg);
        thread::spawn(move || {
            for i in 0..200 {
                reg.add(record(&format!("w{i}"), 5));
                if i % 3 == 0 {
                    reg.remove(&format!("w{i}")).expect("just added");
                }
            }
        })
    };

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let reg = Arc::clone(&reg);
            thread::spawn(move || {
                for _ in 0..200 {
                    let snap = reg.snapshot();
                    let before: Vec<String> =
                        snap.iter().map(|r| r.id().as_str().to_owned()).collect();
                    thread::yield_now();
                    let after: Vec<String> =
                        snap.iter().map(|r| r.id().as_str().to_owned()).collect();
                    assert_eq!(before, after);
                    assert_eq!(before[..4], ["base0", "base1", "base2", "base3"]);
                }
            })
        })
        .collect();

    writer.join().expect("writer");
    for r in readers {
        r.join().expect("reader");
    }
    // 200 added, 67 of them removed again
    assert_eq!(reg.len(), 4 + 200 - 67);
}

#[test]
fn replacing_one_id_never_tears_shape_from_features() {
    let reg = Arc::new(MarkerRegistry::new());
    reg.add(versioned("m1", 8));

    let writer = {
        let reg = Arc::clone(&reg);
        thread::spawn(move || {
            for k in 8..400 {
                reg.add(versioned("m1", k));
            }
        })
    };

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let reg = Arc::clone(&reg);
            thread::spawn(move || {
                for _ in 0..2000 {
                    let snap = reg.snapshot();
                    assert_eq!(snap.len(), 1);
                    for r in &snap {
                        assert_eq!(r.shape().width as usize, r.features().len());
                        assert_eq!(r.shape().height as usize, r.features().len());
                    }
                    if let Some(r) = reg.get("m1") {
                        assert_eq!(r.shape().width as usize, r.features().len());
                    }
                }
            })
        })
        .collect();

    writer.join().expect("writer");
    for r in readers {
        r.join().expect("reader");
    }
    let last = reg.get("m1").expect("present");
    assert_eq!(last.shape(), ReferenceShape::new(399, 399));
    assert_eq!(last.features().len(), 399);
}

#[test]
fn replace_keeps_position_and_remove_is_idempotent_on_absence() {
    let reg = MarkerRegistry::new();
    assert_eq!(reg.add(record("a", 3)), AddOutcome::Inserted);
    assert_eq!(reg.add(record("b", 3)), AddOutcome::Inserted);
    assert_eq!(reg.add(record("a", 7)), AddOutcome::Replaced);

    let snap = reg.snapshot();
    let ids: Vec<_> = snap.iter().map(|r| r.id().as_str()).collect();
    assert_eq!(ids, ["a", "b"]);
    assert_eq!(snap.get("a").expect("a").features().len(), 7);

    reg.remove("a").expect("present");
    assert!(matches!(reg.remove("a"), Err(RegistryError::NotFound(_))));
    assert!(matches!(reg.remove("a"), Err(RegistryError::NotFound(_))));
    assert_eq!(reg.len(), 1);
    // an old snapshot still sees the removed marker
    assert!(snap.get("a").is_some());
}

#[test]
fn config_on_disk_enrolls_relative_marker_images() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut img = GrayImage::from_pixel(300, 200, Luma([30]));
    for y in 50..150 {
        for x in 60..240 {
            img.put_pixel(x, y, Luma([220]));
        }
    }
    img.save(dir.path().join("poster.png")).expect("save");

    let mut config = ServerConfig::default();
    config.markers = vec![
        MarkerSpec {
            id: "m1".into(),
            name: Some("Poster".into()),
            image_path: "poster.png".into(),
            media_url: "clip1".into(),
        },
        MarkerSpec {
            id: "m2".into(),
            name: None,
            image_path: "missing.png".into(),
            media_url: String::new(),
        },
    ];
    let path = dir.path().join("config.json");
    config.write_json(&path).expect("write");

    let mut loaded = ServerConfig::load_json(&path).expect("load");
    assert_eq!(loaded, config);
    loaded.resolve_paths(dir.path());
    loaded.validate().expect("valid");

    let reg = MarkerRegistry::new();
    let added = MarkerEnroller::from_config(&loaded).enroll_all(&loaded.markers, &reg);
    assert_eq!(added, 1);
    let m1 = reg.get("m1").expect("enrolled");
    assert_eq!(m1.name(), "Poster");
    assert_eq!(m1.media_url(), "clip1");
    assert_eq!(m1.shape(), ReferenceShape::new(500, 500));
    assert!(!reg.contains("m2"));
}
