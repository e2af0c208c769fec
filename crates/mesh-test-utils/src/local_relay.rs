//! In-process relay.
//!
//! `LocalRelay` routes envelopes through the relay's own
//! [`RelayRooms`] without sockets. Each [`RelayClient`] exposes the same
//! pair of channels a real `SignalingClient` hands to the session
//! controller: a [`SignalingSender`] for outbound envelopes and a receiver
//! of [`SignalingEvent`]s.

use common::types::SessionId;
use mesh_client::signaling::{SignalingEvent, SignalingSender};
use mesh_protocol::{EnvelopeKind, SignalingEnvelope};
use mesh_relay::rooms::{Delivery, RelayRooms};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Queue depth of each client's inbound and outbound channel.
pub const LOCAL_RELAY_BUFFER: usize = 256;

#[derive(Debug, Default)]
struct RelayInner {
    rooms: RelayRooms,
    peers: HashMap<SessionId, mpsc::Sender<SignalingEvent>>,
    sent: Vec<(SessionId, SignalingEnvelope)>,
}

impl RelayInner {
    fn deliver(&self, deliveries: Vec<Delivery>) {
        for Delivery { to, envelope } in deliveries {
            if let Some(peer) = self.peers.get(&to) {
                let _ = peer.try_send(SignalingEvent::Envelope(envelope));
            }
        }
    }
}

/// In-process relay. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct LocalRelay {
    inner: Arc<Mutex<RelayInner>>,
}

/// One connected client.
pub struct RelayClient {
    session: Arc<Mutex<SessionId>>,
    /// Outbound half, handed to the session controller and orchestrator.
    pub sender: SignalingSender,
    /// Inbound half. Take it with [`RelayClient::take_events`].
    events: Option<mpsc::Receiver<SignalingEvent>>,
    inject: mpsc::Sender<SignalingEvent>,
    pump: JoinHandle<()>,
}

impl RelayClient {
    /// Session id the relay currently knows this client by.
    pub fn session_id(&self) -> SessionId {
        self.session.lock().unwrap().clone()
    }

    /// Take the inbound event receiver. Panics if taken twice.
    pub fn take_events(&mut self) -> mpsc::Receiver<SignalingEvent> {
        self.events.take().expect("events already taken")
    }

    /// Push an event straight into the inbound queue.
    pub async fn inject(&self, event: SignalingEvent) {
        self.inject.send(event).await.expect("client receiver dropped");
    }
}

impl Drop for RelayClient {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

impl LocalRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect a new client under a fresh session id.
    pub fn connect(&self) -> RelayClient {
        let session_id = SessionId::new();
        let (sender, mut outbound) = SignalingSender::channel(LOCAL_RELAY_BUFFER);
        let (inject, events) = mpsc::channel(LOCAL_RELAY_BUFFER);

        self.inner
            .lock()
            .unwrap()
            .peers
            .insert(session_id.clone(), inject.clone());

        let session = Arc::new(Mutex::new(session_id));
        let pump = {
            let relay = self.clone();
            let session = Arc::clone(&session);
            tokio::spawn(async move {
                while let Some(envelope) = outbound.recv().await {
                    let from = session.lock().unwrap().clone();
                    relay.dispatch(&from, envelope);
                }
                let from = session.lock().unwrap().clone();
                relay.disconnect(&from);
            })
        };

        RelayClient {
            session,
            sender,
            events: Some(events),
            inject,
            pump,
        }
    }

    /// Route one envelope as if it arrived from `from`.
    pub fn dispatch(&self, from: &SessionId, envelope: SignalingEnvelope) {
        let mut inner = self.inner.lock().unwrap();
        inner.sent.push((from.clone(), envelope.clone()));
        let deliveries = inner.rooms.handle(from, envelope);
        inner.deliver(deliveries);
    }

    /// Drop `session` as a lost socket would.
    pub fn disconnect(&self, session: &SessionId) {
        let mut inner = self.inner.lock().unwrap();
        inner.peers.remove(session);
        let deliveries = inner.rooms.disconnect(session);
        inner.deliver(deliveries);
    }

    /// Simulate a transport loss followed by a successful reconnect: the
    /// old session leaves the room, the client gets a new session id and a
    /// `Reconnected` event.
    pub async fn reconnect(&self, client: &RelayClient) {
        let old = client.session_id();
        self.disconnect(&old);

        let new = SessionId::new();
        self.inner
            .lock()
            .unwrap()
            .peers
            .insert(new.clone(), client.inject.clone());
        *client.session.lock().unwrap() = new;
        client.inject(SignalingEvent::Reconnected).await;
    }

    /// Simulate reconnection giving up.
    pub async fn close(&self, client: &RelayClient) {
        self.disconnect(&client.session_id());
        client.inject(SignalingEvent::Closed).await;
    }

    /// Every envelope `session` sent, in order.
    pub fn sent_by(&self, session: &SessionId) -> Vec<SignalingEnvelope> {
        self.inner
            .lock()
            .unwrap()
            .sent
            .iter()
            .filter(|(from, _)| from == session)
            .map(|(_, envelope)| envelope.clone())
            .collect()
    }

    /// Kinds of every envelope `session` sent, in order.
    pub fn sent_kinds(&self, session: &SessionId) -> Vec<EnvelopeKind> {
        self.sent_by(session).iter().map(SignalingEnvelope::kind).collect()
    }

    pub fn room_count(&self) -> usize {
        self.inner.lock().unwrap().rooms.room_count()
    }
}

#[cfg(test)]
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

    async fn next_envelope(events: &mut mpsc::Receiver<SignalingEvent>) -> SignalingEnvelope {
        match events.recv().await {
            Some(SignalingEvent::Envelope(envelope)) => envelope,
            other => panic!("expected envelope, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_clients_see_each_other() {
        let relay = LocalRelay::new();
        let mut alice = relay.connect();
        let mut bob = relay.connect();
        let mut alice_events = alice.take_events();
        let mut bob_events = bob.take_events();

        alice.sender.send(join("alice")).unwrap();
        assert!(matches!(
            next_envelope(&mut alice_events).await,
            SignalingEnvelope::ExistingParticipants(_)
        ));

        bob.sender.send(join("bob")).unwrap();
        assert!(matches!(
            next_envelope(&mut bob_events).await,
            SignalingEnvelope::ExistingParticipants(p) if p.participants.len() == 1
        ));
        assert!(matches!(
            next_envelope(&mut alice_events).await,
            SignalingEnvelope::UserJoined(p) if p.socket_id == bob.session_id()
        ));
        assert_eq!(relay.sent_kinds(&bob.session_id()), vec![EnvelopeKind::Join]);
    }

    #[tokio::test]
    async fn test_reconnect_changes_session_id() {
        let relay = LocalRelay::new();
        let mut alice = relay.connect();
        let mut events = alice.take_events();
        let before = alice.session_id();

        relay.reconnect(&alice).await;
        assert_ne!(alice.session_id(), before);
        assert_eq!(events.recv().await, Some(SignalingEvent::Reconnected));
    }
}
