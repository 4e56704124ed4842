//! One connection's receive, process, respond loop.
//!
//! Frames are handled strictly one at a time in arrival order. The CPU-bound
//! part (decode, feature extraction, matching, solving) runs on the blocking
//! pool; the connection's [`Tracker`] moves into that job and back, so no
//! lock guards it. Dropping the session drops the tracker.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use log::{debug, info, warn};
use tokio::sync::mpsc;

use crate::detection::{encode_results, DetectionResult};
use crate::pipeline::{decode_base64_payload, FrameError, FrameProcessor};
use crate::tracking::Tracker;

/// An inbound message, already stripped of transport framing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Inbound {
    /// Raw encoded image bytes.
    Image(Vec<u8>),
    /// Base64 text, optionally a `data:` URL.
    Base64(String),
    /// Anything that is not a frame (pings, pongs).
    Ignored,
}

#[derive(thiserror::Error, Debug)]
pub enum SessionError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("frame worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
    #[error("failed to encode result: {0}")]
    Encode(#[from] serde_json::Error),
}

/// The duplex channel a session runs over.
pub trait FrameTransport: Send {
    /// Next inbound message; `None` once the peer has closed.
    fn recv(&mut self) -> impl Future<Output = Option<Result<Inbound, SessionError>>> + Send;

    fn send(&mut self, text: String) -> impl Future<Output = Result<(), SessionError>> + Send;
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub frames: u64,
    pub detections: u64,
    pub decode_errors: u64,
}

/// Decode and process one message. Decode failures yield `Err` and leave the
/// tracker as it was.
fn handle_frame(
    processor: &FrameProcessor,
    tracker: &mut Tracker,
    msg: Inbound,
) -> Result<Option<DetectionResult>, FrameError> {
    let bytes = match msg {
        Inbound::Image(bytes) => bytes,
        Inbound::Base64(text) => decode_base64_payload(&text)?,
        Inbound::Ignored => return Ok(None),
    };
    processor.process_bytes(tracker, &bytes, Instant::now())
}

/// Drive one connection until the peer closes or the transport fails.
///
/// Exactly one outbound message is sent per inbound frame, in order; `[]` when
/// nothing was detected or the frame could not be decoded.
pub async fn run_session<T: FrameTransport>(
    mut transport: T,
    processor: Arc<FrameProcessor>,
) -> Result<SessionStats, SessionError> {
    let mut tracker = processor.new_tracker();
    let mut stats = SessionStats::default();
    info!("session opened");

    while let Some(msg) = transport.recv().await {
        let msg = msg?;
        if msg == Inbound::Ignored {
            continue;
        }
        stats.frames += 1;

        let job = Arc::clone(&processor);
        let (returned, outcome) = tokio::task::spawn_blocking(move || {
            let outcome = handle_frame(&job, &mut tracker, msg);
            (tracker, outcome)
        })
        .await?;
        tracker = returned;

        let result = match outcome {
            Ok(result) => result,
            Err(e) => {
                stats.decode_errors += 1;
                warn!("frame {}: {e}", stats.frames);
                None
            }
        };
        if result.is_some() {
            stats.detections += 1;
        }
        debug!(
            "frame {}: {:?}",
            stats.frames,
            result.as_ref().map(|r| (r.id.as_str(), r.status))
        );
        transport.send(encode_results(result.as_ref())?).await?;
    }

    info!(
        "session closed after {} frames ({} detections, {} undecodable)",
        stats.frames, stats.detections, stats.decode_errors
    );
    Ok(stats)
}

/// In-memory transport, for tests and embedding.
pub struct ChannelTransport {
    inbound: mpsc::Receiver<Inbound>,
    outbound: mpsc::Sender<String>,
}

/// The peer side of a [`ChannelTransport`]. Dropping `frames` closes the session.
pub struct ChannelPeer {
    pub frames: mpsc::Sender<Inbound>,
    pub results: mpsc::Receiver<String>,
}

impl ChannelTransport {
    pub fn pair(capacity: usize) -> (Self, ChannelPeer) {
        let (frames, inbound) = mpsc::channel(capacity);
        let (outbound, results) = mpsc::channel(capacity);
        (Self { inbound, outbound }, ChannelPeer { frames, results })
    }
}

impl FrameTransport for ChannelTransport {
    async fn recv(&mut self) -> Option<Result<Inbound, SessionError>> {
        self.inbound.recv().await.map(Ok)
    }

    async fn send(&mut self, text: String) -> Result<(), SessionError> {
        self.outbound
            .send(text)
            .await
            .map_err(|_| SessionError::Transport("peer dropped the result channel".into()))
    }
}
