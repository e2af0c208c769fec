//! Media transport endpoint contract.
//!
//! One endpoint carries the negotiated media between the local participant
//! and one remote participant. Endpoint observers are delivered to the
//! orchestrator as [`EndpointEvent`] values tagged with the remote session id
//! and the endpoint epoch, so events from a replaced endpoint can be
//! recognised and dropped.

use crate::errors::NegotiationError;
use crate::media::track::{LocalTrack, MediaKind, RemoteStream};
use async_trait::async_trait;
use common::secret::TurnCredential;
use common::types::SessionId;
use mesh_protocol::{IceCandidate, SessionDescription};
use std::sync::Arc;
use tokio::sync::mpsc;

/// ICE connection state as reported by the endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IceConnectionState {
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

/// Aggregate peer connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Offer/answer signaling state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalingState {
    Stable,
    HaveLocalOffer,
    HaveRemoteOffer,
    HaveLocalPranswer,
    HaveRemotePranswer,
    Closed,
}

/// Observer callbacks of one endpoint.
#[derive(Debug, Clone)]
pub enum EndpointEventKind {
    /// A local candidate was gathered. `None` marks the end of gathering.
    CandidateDiscovered(Option<IceCandidate>),
    TrackReceived(Arc<RemoteStream>),
    IceStateChanged(IceConnectionState),
    OverallStateChanged(PeerConnectionState),
    SignalingStateChanged(SignalingState),
}

#[derive(Debug, Clone)]
pub struct EndpointEvent {
    pub remote: SessionId,
    pub epoch: u64,
    pub kind: EndpointEventKind,
}

/// Channel endpoints report their observer events on.
pub type EndpointEventSender = mpsc::UnboundedSender<EndpointEvent>;

/// One STUN or TURN server entry.
#[derive(Debug, Clone)]
pub struct IceServerConfig {
    pub urls: Vec<String>,
    pub credential: Option<TurnCredential>,
}

/// Relay hints handed to every endpoint.
#[derive(Debug, Clone, Default)]
pub struct EndpointConfig {
    pub ice_servers: Vec<IceServerConfig>,
}

/// An outbound sender and the track it currently carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderInfo {
    pub kind: MediaKind,
    pub track_id: Option<String>,
}

/// Media transport to one remote participant.
#[async_trait]
pub trait MediaEndpoint: Send + Sync {
    /// Create an offer. `ice_restart` requests fresh ICE credentials.
    async fn create_offer(&self, ice_restart: bool)
        -> Result<SessionDescription, NegotiationError>;

    async fn create_answer(&self) -> Result<SessionDescription, NegotiationError>;

    async fn set_local_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), NegotiationError>;

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), NegotiationError>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), NegotiationError>;

    /// Mark ICE for restart; the next offer carries new credentials.
    async fn restart_ice(&self) -> Result<(), NegotiationError>;

    fn signaling_state(&self) -> SignalingState;

    async fn senders(&self) -> Vec<SenderInfo>;

    /// Swap the track on the first sender of `kind` without renegotiation.
    async fn replace_track(
        &self,
        kind: MediaKind,
        track: Arc<LocalTrack>,
    ) -> Result<(), NegotiationError>;

    /// Add an outbound track. Requires a fresh offer/answer round.
    async fn add_track(&self, track: Arc<LocalTrack>) -> Result<(), NegotiationError>;

    async fn close(&self) -> Result<(), NegotiationError>;
}

/// Builds endpoints for the orchestrator.
#[async_trait]
pub trait EndpointFactory: Send + Sync {
    async fn create(
        &self,
        remote: &SessionId,
        epoch: u64,
        config: &EndpointConfig,
        events: EndpointEventSender,
    ) -> Result<Arc<dyn MediaEndpoint>, NegotiationError>;
}
