//! WebSocket endpoint.
//!
//! `GET /ws` upgrades to a WebSocket. Each socket gets a session id from
//! the hub and runs one task that interleaves outbound deliveries with
//! inbound frames until either side closes or the relay shuts down.

use crate::errors::RelayError;
use crate::hub::RelayHub;
use crate::observability::metrics;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use common::types::SessionId;
use mesh_protocol::EnvelopeCodec;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

/// Shared state for the WebSocket route.
#[derive(Debug, Clone)]
pub struct RelayState {
    pub hub: RelayHub,
    pub codec: EnvelopeCodec,
    pub shutdown: CancellationToken,
}

impl RelayState {
    #[must_use]
    pub fn new(hub: RelayHub, max_frame_bytes: usize, shutdown: CancellationToken) -> Self {
        Self {
            hub,
            codec: EnvelopeCodec::new(max_frame_bytes),
            shutdown,
        }
    }
}

pub fn relay_router(state: RelayState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .with_state(state)
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<RelayState>) -> Response {
    let max = state.codec.max_frame_bytes();
    ws.max_message_size(max)
        .max_frame_size(max)
        .on_upgrade(move |socket| run_socket(socket, state))
}

#[instrument(skip_all, name = "mesh.relay.socket", fields(session_id))]
async fn run_socket(mut socket: WebSocket, state: RelayState) {
    let (session_id, mut outbound) = state.hub.register().await;
    tracing::Span::current().record("session_id", session_id.as_str());

    loop {
        tokio::select! {
            () = state.shutdown.cancelled() => {
                let _ = socket.send(Message::Close(None)).await;
                break;
            }

            Some(envelope) = outbound.recv() => {
                let frame = match state.codec.encode(&envelope) {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!(
                            target: "mesh.relay",
                            session_id = %session_id,
                            event = %envelope.kind(),
                            error = %e,
                            "Outbound envelope not encodable"
                        );
                        continue;
                    }
                };
                if socket.send(Message::Text(frame)).await.is_err() {
                    break;
                }
            }

            inbound = socket.recv() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        handle_frame(&state, &session_id, &text).await;
                    }
                    Some(Ok(Message::Binary(_))) => {
                        state
                            .hub
                            .send_error(&session_id, "Binary frames are not supported".to_string())
                            .await;
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        debug!(target: "mesh.relay", session_id = %session_id, error = %e, "Socket error");
                        break;
                    }
                }
            }
        }
    }

    state.hub.unregister(&session_id).await;
}

async fn handle_frame(state: &RelayState, session_id: &SessionId, text: &str) {
    match state.codec.decode(text) {
        Ok(envelope) => state.hub.dispatch(session_id, envelope).await,
        Err(e) => {
            metrics::record_frame_rejected();
            let err = RelayError::from(e);
            debug!(target: "mesh.relay", session_id = %session_id, error = %err, "Frame rejected");
            state.hub.send_error(session_id, err.client_message()).await;
        }
    }
}

