//! Sessions driven end to end with encoded images: enrollment, ORB
//! extraction, matching, tracking and the wire format.

use std::io::Cursor;
use std::sync::Arc;

use base64::Engine as _;
use image::{GrayImage, ImageFormat, Luma};
use marker_track::session::{ChannelPeer, SessionStats};
use marker_track::{
    run_session, ChannelTransport, FrameProcessor, Inbound, MarkerEnroller, MarkerRegistry,
    ServerConfig,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Random overlapping blocks on mid gray: plenty of corners.
fn poster(seed: u64) -> GrayImage {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut img = GrayImage::from_pixel(500, 500, Luma([128]));
    for _ in 0..250 {
        let (x0, y0) = (rng.random_range(10..460), rng.random_range(10..460));
        let (w, h) = (rng.random_range(6..30), rng.random_range(6..30));
        let v = if rng.random_bool(0.5) {
            rng.random_range(0..60)
        } else {
            rng.random_range(190..=255)
        };
        for y in y0..(y0 + h).min(490) {
            for x in x0..(x0 + w).min(490) {
                img.put_pixel(x, y, Luma([v]));
            }
        }
    }
    img
}

/// `inner` pasted at (`dx`, `dy`) on an 800x600 gray canvas.
fn scene(inner: &GrayImage, dx: i64, dy: i64) -> GrayImage {
    let mut canvas = GrayImage::from_pixel(800, 600, Luma([128]));
    image::imageops::replace(&mut canvas, inner, dx, dy);
    canvas
}

fn png(img: &GrayImage) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png).expect("encode png");
    buf.into_inner()
}

fn processor() -> Arc<FrameProcessor> {
    let mut config = ServerConfig::default();
    // keep frames at native resolution so marker pixels appear unscaled
    config.max_frame_width = 1024;
    config.matching.min_match_ratio = 0.05;
    let registry = Arc::new(MarkerRegistry::new());
    let record = MarkerEnroller::from_config(&config)
        .enroll_bytes("m1", Some("Poster"), "clip1", &png(&poster(42)))
        .expect("enroll");
    assert!(record.features().len() > 100, "poster should be feature rich");
    registry.add(record);
    Arc::new(FrameProcessor::from_config(&config, registry))
}

async fn roundtrip(peer: &mut ChannelPeer, msg: Inbound) -> serde_json::Value {
    peer.frames.send(msg).await.expect("send frame");
    let text = peer.results.recv().await.expect("one result per frame");
    serde_json::from_str(&text).expect("result is json")
}

#[tokio::test]
async fn marker_is_found_held_and_released() {
    init_logging();
    let (transport, mut peer) = ChannelTransport::pair(4);
    let session = tokio::spawn(run_session(transport, processor()));

    let seen = png(&scene(&poster(42), 152, 48));
    let first = roundtrip(&mut peer, Inbound::Image(seen.clone())).await;
    assert_eq!(first[0]["id"], "m1");
    assert_eq!(first[0]["status"], "new");
    assert_eq!(first[0]["videoUrl"], "clip1");
    assert_eq!(first[0]["name"], "Poster");
    let x = first[0]["x"].as_f64().expect("x");
    let w = first[0]["width"].as_f64().expect("width");
    assert!((x - 19.0).abs() < 2.0, "x = {x}");
    assert!((w - 62.5).abs() < 3.0, "width = {w}");

    // same frame again, this time as a data URL
    let b64 = base64::engine::general_purpose::STANDARD.encode(&seen);
    let url = format!("data:image/png;base64,{b64}");
    let second = roundtrip(&mut peer, Inbound::Base64(url)).await;
    assert_eq!(second[0]["status"], "active");
    assert_eq!(second[0]["x"], first[0]["x"]);
    assert!(second[0].get("score").is_none());

    let blank = png(&GrayImage::from_pixel(800, 600, Luma([128])));
    let third = roundtrip(&mut peer, Inbound::Image(blank.clone())).await;
    assert_eq!(third[0]["status"], "tracking");
    assert_eq!(third[0]["x"], first[0]["x"]);

    let fourth = roundtrip(&mut peer, Inbound::Image(blank)).await;
    assert_eq!(fourth, serde_json::json!([]));

    drop(peer.frames);
    let stats = session.await.expect("join").expect("session");
    assert_eq!(
        stats,
        SessionStats {
            frames: 4,
            detections: 3,
            decode_errors: 0
        }
    );
}

#[tokio::test]
async fn connections_track_independently() {
    init_logging();
    let processor = processor();
    let (ta, mut a) = ChannelTransport::pair(4);
    let (tb, mut b) = ChannelTransport::pair(4);
    let sa = tokio::spawn(run_session(ta, Arc::clone(&processor)));
    let sb = tokio::spawn(run_session(tb, Arc::clone(&processor)));

    let seen = png(&scene(&poster(42), 152, 48));
    let blank = png(&GrayImage::from_pixel(800, 600, Luma([128])));

    assert_eq!(roundtrip(&mut a, Inbound::Image(seen.clone())).await[0]["status"], "new");
    // b has never seen the marker, so a blank frame is simply empty there
    assert_eq!(roundtrip(&mut b, Inbound::Image(blank)).await, serde_json::json!([]));
    assert_eq!(roundtrip(&mut b, Inbound::Image(seen.clone())).await[0]["status"], "new");
    assert_eq!(roundtrip(&mut a, Inbound::Image(seen)).await[0]["status"], "active");

    drop(a.frames);
    drop(b.frames);
    sa.await.expect("join").expect("session a");
    sb.await.expect("join").expect("session b");
}
