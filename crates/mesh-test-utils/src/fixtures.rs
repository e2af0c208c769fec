//! Fixtures: envelope builders and a wired-up orchestrator harness.

use crate::local_relay::{LocalRelay, RelayClient};
use crate::mock_capture::MockCaptureDevice;
use crate::mock_endpoint::{MockEndpoint, MockEndpointFactory};
use crate::mock_membership::MockMembership;
use common::types::{SessionId, UserId};
use mesh_client::actors::{
    ConnectionOrchestrator, OrchestratorDeps, OrchestratorHandle, OrchestratorState,
    SessionController, SessionDeps, SessionHandle, SessionNotice, SessionSnapshot,
};
use mesh_client::config::ConnectionTimings;
use mesh_client::media::{EndpointConfig, EndpointFactory};
use mesh_client::membership::MeetingParticipant;
use mesh_client::signaling::SignalingSender;
use mesh_protocol::{
    AnswerPayload, CandidatePayload, ExistingParticipants, IceCandidate, MessageId, OfferPayload,
    PeerAnnouncement, Route, SessionDescription, SignalingEnvelope,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Let every runnable task run to idle.
///
/// Under `start_paused` this returns only once the runtime has nothing
/// left to do, then advances the clock by one millisecond.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

pub fn peer(user: &str, socket: &str) -> PeerAnnouncement {
    PeerAnnouncement {
        user_id: UserId::from(user),
        socket_id: SessionId::from(socket),
    }
}

pub fn existing(peers: &[PeerAnnouncement]) -> SignalingEnvelope {
    SignalingEnvelope::ExistingParticipants(ExistingParticipants {
        participants: peers.to_vec(),
        socket_id: None,
    })
}

/// `existing-participants` as delivered to the joiner on `own_socket`.
pub fn existing_as(own_socket: &str, peers: &[PeerAnnouncement]) -> SignalingEnvelope {
    SignalingEnvelope::ExistingParticipants(ExistingParticipants {
        participants: peers.to_vec(),
        socket_id: Some(SessionId::from(own_socket)),
    })
}

pub fn user_joined(user: &str, socket: &str) -> SignalingEnvelope {
    SignalingEnvelope::UserJoined(peer(user, socket))
}

pub fn user_left(user: &str, socket: &str) -> SignalingEnvelope {
    SignalingEnvelope::UserLeft(peer(user, socket))
}

fn delivered_from(socket: &str) -> Route {
    Route {
        target_socket: None,
        from_socket: Some(SessionId::from(socket)),
    }
}

/// An offer as the relay delivers it.
pub fn remote_offer(user: &str, socket: &str, msg_seq: u64) -> OfferPayload {
    OfferPayload {
        offer: SessionDescription::offer(format!("v=0\r\no=remote-{user} {msg_seq}\r\n")),
        route: delivered_from(socket),
        from_user_id: UserId::from(user),
        msg_id: MessageId::from_sequence(msg_seq),
        is_restart: false,
        is_recreate: false,
    }
}

pub fn remote_answer(user: &str, socket: &str, msg_id: MessageId) -> SignalingEnvelope {
    SignalingEnvelope::Answer(AnswerPayload {
        answer: SessionDescription::answer(format!("v=0\r\no=remote-{user}\r\n")),
        route: delivered_from(socket),
        from_user_id: UserId::from(user),
        msg_id,
    })
}

pub fn host_candidate(n: u16) -> IceCandidate {
    IceCandidate {
        candidate: format!("candidate:{n} 1 udp 2122260223 10.0.0.{n} 5000{n} typ host"),
        sdp_mid: Some("0".to_string()),
        sdp_mline_index: Some(0),
        username_fragment: None,
    }
}

pub fn remote_candidate(user: &str, socket: &str, candidate: IceCandidate) -> SignalingEnvelope {
    SignalingEnvelope::IceCandidate(CandidatePayload {
        candidate,
        route: delivered_from(socket),
        from_user_id: UserId::from(user),
    })
}

pub fn participant(user: &str, is_host: bool) -> MeetingParticipant {
    MeetingParticipant {
        user_id: UserId::from(user),
        username: user.to_string(),
        display_name: None,
        is_host,
        joined_at: None,
    }
}

/// A `ConnectionOrchestrator` over mock endpoints, mock capture and a
/// captured outbound signaling queue.
pub struct OrchestratorHarness {
    pub handle: OrchestratorHandle,
    pub task: JoinHandle<()>,
    pub factory: Arc<MockEndpointFactory>,
    pub capture: MockCaptureDevice,
    pub outbound: mpsc::Receiver<SignalingEnvelope>,
    pub cancel: CancellationToken,
}

impl OrchestratorHarness {
    pub fn new(local_user: &str) -> Self {
        Self::with_timings(local_user, ConnectionTimings::default())
    }

    pub fn with_timings(local_user: &str, timings: ConnectionTimings) -> Self {
        let factory = Arc::new(MockEndpointFactory::new());
        let capture = MockCaptureDevice::new();
        let (signaling, outbound) = SignalingSender::channel(1024);
        let cancel = CancellationToken::new();

        let (handle, task) = ConnectionOrchestrator::spawn(
            OrchestratorDeps {
                local_user_id: UserId::from(local_user),
                factory: Arc::clone(&factory) as Arc<dyn EndpointFactory>,
                endpoint_config: EndpointConfig::default(),
                capture_device: Arc::new(capture.clone()),
                signaling,
                timings,
            },
            cancel.clone(),
        );

        Self {
            handle,
            task,
            factory,
            capture,
            outbound,
            cancel,
        }
    }

    /// Hand an inbound envelope to the orchestrator and let it settle.
    pub async fn deliver(&self, envelope: SignalingEnvelope) {
        self.handle.signaling(envelope).await.unwrap();
        settle().await;
    }

    pub async fn state(&self) -> OrchestratorState {
        settle().await;
        self.handle.get_state().await.unwrap()
    }

    /// Latest endpoint built for `socket`. Panics if there is none.
    pub fn endpoint(&self, socket: &str) -> Arc<MockEndpoint> {
        self.factory
            .latest(&SessionId::from(socket))
            .unwrap_or_else(|| panic!("no endpoint for {socket}"))
    }

    /// Everything sent to the relay since the last drain.
    pub fn drain_outbound(&mut self) -> Vec<SignalingEnvelope> {
        let mut sent = Vec::new();
        while let Ok(envelope) = self.outbound.try_recv() {
            sent.push(envelope);
        }
        sent
    }

    /// Offers sent since the last drain, in order.
    pub fn drain_offers(&mut self) -> Vec<OfferPayload> {
        self.drain_outbound()
            .into_iter()
            .filter_map(|e| match e {
                SignalingEnvelope::Offer(offer) => Some(offer),
                _ => None,
            })
            .collect()
    }

    pub async fn shutdown(self) {
        self.cancel.cancel();
        self.task.await.unwrap();
    }
}

/// A full client stack on a [`LocalRelay`]: session controller,
/// orchestrator, mock endpoints and mock capture.
pub struct SessionHarness {
    pub session: SessionHandle,
    pub orchestrator: OrchestratorHandle,
    pub client: RelayClient,
    pub factory: Arc<MockEndpointFactory>,
    pub capture: MockCaptureDevice,
    pub notices: broadcast::Receiver<SessionNotice>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl SessionHarness {
    /// Connect a client that still has to authenticate.
    pub fn connect(relay: &LocalRelay, membership: &MockMembership, username: &str) -> Self {
        Self::build(relay, membership, username, None, ConnectionTimings::default())
    }

    /// Connect a client already registered as `user_id`.
    pub fn signed_in(relay: &LocalRelay, membership: &MockMembership, user_id: &str) -> Self {
        Self::build(
            relay,
            membership,
            user_id,
            Some(UserId::from(user_id)),
            ConnectionTimings::default(),
        )
    }

    pub fn build(
        relay: &LocalRelay,
        membership: &MockMembership,
        username: &str,
        user_id: Option<UserId>,
        timings: ConnectionTimings,
    ) -> Self {
        let mut client = relay.connect();
        let factory = Arc::new(MockEndpointFactory::new());
        let capture = MockCaptureDevice::new();
        let cancel = CancellationToken::new();

        let (orchestrator, orchestrator_task) = ConnectionOrchestrator::spawn(
            OrchestratorDeps {
                local_user_id: user_id.clone().unwrap_or_default(),
                factory: Arc::clone(&factory) as Arc<dyn EndpointFactory>,
                endpoint_config: EndpointConfig::default(),
                capture_device: Arc::new(capture.clone()),
                signaling: client.sender.clone(),
                timings,
            },
            cancel.child_token(),
        );

        let (session, session_task) = SessionController::spawn(
            SessionDeps {
                orchestrator: orchestrator.clone(),
                signaling: client.sender.clone(),
                signaling_events: client.take_events(),
                membership: Arc::new(membership.clone()),
                timings,
                username: username.to_string(),
                user_id,
            },
            cancel.child_token(),
        );
        let notices = session.subscribe();

        Self {
            session,
            orchestrator,
            client,
            factory,
            capture,
            notices,
            cancel,
            tasks: vec![session_task, orchestrator_task],
        }
    }

    pub async fn state(&self) -> SessionSnapshot {
        settle().await;
        self.session.get_state().await.unwrap()
    }

    pub async fn media_state(&self) -> OrchestratorState {
        settle().await;
        self.orchestrator.get_state().await.unwrap()
    }

    /// Notices published since the last drain.
    pub fn drain_notices(&mut self) -> Vec<SessionNotice> {
        let mut notices = Vec::new();
        while let Ok(notice) = self.notices.try_recv() {
            notices.push(notice);
        }
        notices
    }

    pub async fn shutdown(self) {
        self.cancel.cancel();
        for task in self.tasks {
            task.await.unwrap();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_offer_is_delivered_shape() {
        let offer = remote_offer("bob", "sock-b", 3);
        assert!(offer.route.target_socket.is_none());
        assert_eq!(offer.route.from_socket, Some(SessionId::from("sock-b")));
        assert_eq!(offer.msg_id, MessageId::from_sequence(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_harness_starts_empty() {
        let harness = OrchestratorHarness::new("alice");
        let state = harness.state().await;
        assert!(state.connections.is_empty());
        assert!(!state.local_media.active);
        harness.shutdown().await;
    }
}
