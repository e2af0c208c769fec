//! Socket registry and delivery.
//!
//! The hub pairs [`RelayRooms`] with one outbound queue per connected
//! socket. Routing happens under a single lock so fan-out order matches
//! arrival order.

use crate::observability::metrics;
use crate::rooms::{Delivery, RelayRooms};
use common::types::SessionId;
use mesh_protocol::{ErrorPayload, SignalingEnvelope};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

/// Outbound queue depth per socket.
pub const SOCKET_CHANNEL_BUFFER: usize = 256;

#[derive(Debug, Default)]
struct HubState {
    rooms: RelayRooms,
    peers: HashMap<SessionId, mpsc::Sender<SignalingEnvelope>>,
}

/// Shared relay state. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct RelayHub {
    state: Arc<Mutex<HubState>>,
}

impl RelayHub {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new socket under a fresh session id.
    pub async fn register(&self) -> (SessionId, mpsc::Receiver<SignalingEnvelope>) {
        let session_id = SessionId::new();
        let (tx, rx) = mpsc::channel(SOCKET_CHANNEL_BUFFER);

        let mut state = self.state.lock().await;
        state.peers.insert(session_id.clone(), tx);
        metrics::set_sockets_active(state.peers.len());
        drop(state);

        info!(target: "mesh.relay", session_id = %session_id, "Socket connected");
        (session_id, rx)
    }

    /// Route one envelope from `from`.
    pub async fn dispatch(&self, from: &SessionId, envelope: SignalingEnvelope) {
        metrics::record_envelope(envelope.kind().as_str());
        debug!(
            target: "mesh.relay",
            session_id = %from,
            event = %envelope.kind(),
            "Envelope received"
        );

        let mut state = self.state.lock().await;
        let deliveries = state.rooms.handle(from, envelope);
        metrics::set_rooms_active(state.rooms.room_count());
        state.deliver(deliveries);
    }

    /// Remove a socket, announcing its departure to its room.
    pub async fn unregister(&self, session_id: &SessionId) {
        let mut state = self.state.lock().await;
        state.peers.remove(session_id);
        let deliveries = state.rooms.disconnect(session_id);
        metrics::set_rooms_active(state.rooms.room_count());
        metrics::set_sockets_active(state.peers.len());
        state.deliver(deliveries);
        drop(state);

        info!(target: "mesh.relay", session_id = %session_id, "Socket disconnected");
    }

    /// Send an `error` envelope to one socket.
    pub async fn send_error(&self, to: &SessionId, message: String) {
        let state = self.state.lock().await;
        state.deliver(vec![Delivery {
            to: to.clone(),
            envelope: SignalingEnvelope::Error(ErrorPayload { message }),
        }]);
    }

    pub async fn room_count(&self) -> usize {
        self.state.lock().await.rooms.room_count()
    }

    pub async fn socket_count(&self) -> usize {
        self.state.lock().await.peers.len()
    }
}

impl HubState {
    fn deliver(&self, deliveries: Vec<Delivery>) {
        for Delivery { to, envelope } in deliveries {
            let Some(peer) = self.peers.get(&to) else {
                debug!(target: "mesh.relay", session_id = %to, "Delivery to departed socket");
                continue;
            };
            if let Err(e) = peer.try_send(envelope) {
                metrics::record_delivery_dropped();
                warn!(
                    target: "mesh.relay",
                    session_id = %to,
                    error = %e,
                    "Delivery dropped"
                );
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use common::types::{MeetingId, UserId};
    use mesh_protocol::RoomMembership;

    fn join(user: &str) -> SignalingEnvelope {
        SignalingEnvelope::Join(RoomMembership {
            room: MeetingId::from("m-1"),
            user_id: UserId::from(user),
        })
    }

    #[tokio::test]
    async fn test_join_and_disconnect_fan_out() {
        let hub = RelayHub::new();
        let (a, mut a_rx) = hub.register().await;
        let (b, mut b_rx) = hub.register().await;
        assert_eq!(hub.socket_count().await, 2);

        hub.dispatch(&a, join("alice")).await;
        assert!(matches!(
            a_rx.recv().await,
            Some(SignalingEnvelope::ExistingParticipants(_))
        ));

        hub.dispatch(&b, join("bob")).await;
        assert!(matches!(
            b_rx.recv().await,
            Some(SignalingEnvelope::ExistingParticipants(p)) if p.participants.len() == 1
        ));
        assert!(matches!(
            a_rx.recv().await,
            Some(SignalingEnvelope::UserJoined(p)) if p.socket_id == b
        ));

        hub.unregister(&b).await;
        assert!(matches!(
            a_rx.recv().await,
            Some(SignalingEnvelope::UserLeft(p)) if p.socket_id == b
        ));
        assert_eq!(hub.room_count().await, 1);
        assert_eq!(hub.socket_count().await, 1);
    }

    #[tokio::test]
    async fn test_send_error() {
        let hub = RelayHub::new();
        let (a, mut a_rx) = hub.register().await;
        hub.send_error(&a, "bad frame".to_string()).await;
        let Some(SignalingEnvelope::Error(payload)) = a_rx.recv().await else {
            panic!("expected error envelope");
        };
        assert_eq!(payload.message, "bad frame");
    }
}
