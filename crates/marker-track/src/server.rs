//! Websocket server: `GET /` health, `GET /ws/detect` frame stream.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::{Json, Router};
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::pipeline::FrameProcessor;
use crate::session::{run_session, FrameTransport, Inbound, SessionError};

#[derive(thiserror::Error, Debug)]
pub enum ServeError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Health {
    pub message: String,
    pub markers: usize,
}

/// [`FrameTransport`] over an axum websocket.
pub struct WsTransport {
    socket: WebSocket,
}

impl WsTransport {
    pub fn new(socket: WebSocket) -> Self {
        Self { socket }
    }
}

impl FrameTransport for WsTransport {
    async fn recv(&mut self) -> Option<Result<Inbound, SessionError>> {
        let msg = match self.socket.recv().await? {
            Ok(msg) => msg,
            Err(e) => return Some(Err(SessionError::Transport(e.to_string()))),
        };
        match msg {
            Message::Text(text) => Some(Ok(Inbound::Base64(text.as_str().to_owned()))),
            Message::Binary(bytes) => Some(Ok(Inbound::Image(bytes.to_vec()))),
            Message::Ping(_) | Message::Pong(_) => Some(Ok(Inbound::Ignored)),
            Message::Close(_) => None,
        }
    }

    async fn send(&mut self, text: String) -> Result<(), SessionError> {
        self.socket
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| SessionError::Transport(e.to_string()))
    }
}

async fn health(State(processor): State<Arc<FrameProcessor>>) -> Json<Health> {
    Json(Health {
        message: "marker-track running".to_string(),
        markers: processor.registry().len(),
    })
}

async fn ws_detect(
    ws: WebSocketUpgrade,
    State(processor): State<Arc<FrameProcessor>>,
) -> Response {
    ws.on_upgrade(move |socket| async move {
        if let Err(e) = run_session(WsTransport::new(socket), processor).await {
            warn!("session ended with error: {e}");
        }
    })
}

pub fn router(processor: Arc<FrameProcessor>) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/ws/detect", get(ws_detect))
        .with_state(processor)
}

/// Serve until `shutdown` resolves.
pub async fn serve(
    addr: SocketAddr,
    processor: Arc<FrameProcessor>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), ServeError> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| ServeError::Bind { addr, source })?;
    info!(
        "listening on {} with {} markers",
        listener.local_addr()?,
        processor.registry().len()
    );
    axum::serve(listener, router(processor))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
