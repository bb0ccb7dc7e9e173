//! HTTP/WebSocket surface of the signaling relay.

use std::future::Future;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
    routing::get,
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::{debug, error, info};

use crate::config::ServerConfig;
use crate::protocol::{ControlMessage, ErrorReason};
use crate::signaling::challenge::ChallengeEngine;
use crate::signaling::registry::RoomRegistry;
use crate::signaling::room::PeerSocket;
use crate::signaling::router::{Connection, SignalingRouter};

/// Shared state handed to every request handler.
#[derive(Clone)]
pub struct AppState {
    router: SignalingRouter,
    max_message_bytes: usize,
}

impl AppState {
    pub fn new(config: &ServerConfig) -> Self {
        Self {
            router: SignalingRouter::new(
                RoomRegistry::new(config.registry_config()),
                ChallengeEngine::new(config.challenge_config()),
            ),
            max_message_bytes: config.max_message_bytes,
        }
    }

    pub fn router(&self) -> &SignalingRouter {
        &self.router
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(websocket_handler))
        .route("/ws", get(websocket_handler))
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    info!(addr = ?listener.local_addr().ok(), "signaling relay listening");
    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "rooms": state.router.registry().len(),
        "challenges": state.router.challenges().outstanding(),
    }))
}

async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.max_message_size(state.max_message_bytes)
        .on_upgrade(move |socket| handle_socket(socket, state.router))
}

async fn handle_socket(socket: WebSocket, router: SignalingRouter) {
    let (mut sender, mut receiver) = socket.split();
    let (peer, mut outbound) = PeerSocket::channel();
    let socket_id = peer.id();

    let writer = tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            let json = match serde_json::to_string(&message) {
                Ok(json) => json,
                Err(e) => {
                    error!(socket = %socket_id, "failed to encode control message: {e}");
                    continue;
                }
            };
            if sender.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
        debug!(socket = %socket_id, "writer task ended");
    });

    debug!(socket = %socket_id, "control socket connected");
    let mut conn = Connection::new(peer);

    while let Some(frame) = receiver.next().await {
        match frame {
            Ok(Message::Text(text)) => router.handle_text(&mut conn, &text),
            Ok(Message::Binary(_)) => {
                conn.socket()
                    .send(ControlMessage::error(ErrorReason::MalformedMessage));
            }
            Ok(Message::Close(_)) => break,
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Err(e) => {
                debug!(socket = %socket_id, "socket error: {e}");
                break;
            }
        }
    }

    router.disconnect(&mut conn);
    drop(conn);
    writer.abort();
    debug!(socket = %socket_id, "control socket closed");
}
