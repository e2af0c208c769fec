//! Scriptable media endpoints.
//!
//! `MockEndpoint` walks the offer/answer signaling states like a real peer
//! connection, records every call, and lets the test push observer events
//! (ICE state, overall state, tracks, candidates) into the orchestrator.
//!
//! # Example
//!
//! ```rust,ignore
//! let factory = Arc::new(MockEndpointFactory::new());
//! // ... orchestrator creates an endpoint for sock-b ...
//! let endpoint = factory.latest(&SessionId::from("sock-b")).unwrap();
//! endpoint.emit_ice_state(IceConnectionState::Failed);
//! assert_eq!(endpoint.restart_ice_calls(), 0);
//! ```

use async_trait::async_trait;
use common::types::SessionId;
use mesh_client::errors::NegotiationError;
use mesh_client::media::{
    EndpointConfig, EndpointEvent, EndpointEventKind, EndpointEventSender, EndpointFactory,
    IceConnectionState, LocalTrack, MediaEndpoint, MediaKind, PeerConnectionState,
    RemoteStream, RemoteTrackInfo, SenderInfo, SignalingState,
};
use mesh_protocol::{IceCandidate, SdpType, SessionDescription};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// Endpoint calls that can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockFailure {
    CreateOffer,
    CreateAnswer,
    RemoteDescription,
    Candidate,
    RestartIce,
}

#[derive(Debug)]
struct EndpointLog {
    signaling_state: SignalingState,
    senders: Vec<SenderInfo>,
    offers: Vec<bool>,
    answers: usize,
    local_descriptions: Vec<SessionDescription>,
    remote_descriptions: Vec<SessionDescription>,
    candidates: Vec<IceCandidate>,
    restart_ice_calls: usize,
    replaced_tracks: Vec<String>,
    added_tracks: Vec<String>,
    failures: HashSet<MockFailure>,
    closed: bool,
}

impl Default for EndpointLog {
    fn default() -> Self {
        Self {
            signaling_state: SignalingState::Stable,
            senders: Vec::new(),
            offers: Vec::new(),
            answers: 0,
            local_descriptions: Vec::new(),
            remote_descriptions: Vec::new(),
            candidates: Vec::new(),
            restart_ice_calls: 0,
            replaced_tracks: Vec::new(),
            added_tracks: Vec::new(),
            failures: HashSet::new(),
            closed: false,
        }
    }
}

/// In-memory media endpoint for one remote participant.
#[derive(Debug)]
pub struct MockEndpoint {
    remote: SessionId,
    epoch: u64,
    events: EndpointEventSender,
    log: Mutex<EndpointLog>,
}

impl MockEndpoint {
    fn new(remote: SessionId, epoch: u64, events: EndpointEventSender) -> Self {
        Self {
            remote,
            epoch,
            events,
            log: Mutex::new(EndpointLog::default()),
        }
    }

    pub fn remote(&self) -> &SessionId {
        &self.remote
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    // ------------------------------------------------------------------
    // Event injection
    // ------------------------------------------------------------------

    /// Push a raw observer event tagged with this endpoint's epoch.
    pub fn emit(&self, kind: EndpointEventKind) {
        let _ = self.events.send(EndpointEvent {
            remote: self.remote.clone(),
            epoch: self.epoch,
            kind,
        });
    }

    pub fn emit_ice_state(&self, state: IceConnectionState) {
        self.emit(EndpointEventKind::IceStateChanged(state));
    }

    pub fn emit_peer_state(&self, state: PeerConnectionState) {
        self.emit(EndpointEventKind::OverallStateChanged(state));
    }

    pub fn emit_candidate(&self, candidate: IceCandidate) {
        self.emit(EndpointEventKind::CandidateDiscovered(Some(candidate)));
    }

    /// Deliver an inbound audio+video stream. The caller keeps the `Arc`
    /// only if it wants to; the orchestrator's view holds its own.
    pub fn emit_track(&self, stream_id: &str) -> Arc<RemoteStream> {
        let stream = RemoteStream::new(stream_id);
        stream.add_track(RemoteTrackInfo {
            id: format!("{stream_id}-audio"),
            kind: MediaKind::Audio,
        });
        stream.add_track(RemoteTrackInfo {
            id: format!("{stream_id}-video"),
            kind: MediaKind::Video,
        });
        self.emit(EndpointEventKind::TrackReceived(Arc::clone(&stream)));
        stream
    }

    // ------------------------------------------------------------------
    // Scripting
    // ------------------------------------------------------------------

    pub fn fail(&self, failure: MockFailure) {
        self.log.lock().unwrap().failures.insert(failure);
    }

    pub fn heal(&self, failure: MockFailure) {
        self.log.lock().unwrap().failures.remove(&failure);
    }

    // ------------------------------------------------------------------
    // Recorded calls
    // ------------------------------------------------------------------

    /// `ice_restart` flag of every `create_offer` call, in order.
    pub fn offers(&self) -> Vec<bool> {
        self.log.lock().unwrap().offers.clone()
    }

    pub fn answers(&self) -> usize {
        self.log.lock().unwrap().answers
    }

    pub fn remote_descriptions(&self) -> Vec<SessionDescription> {
        self.log.lock().unwrap().remote_descriptions.clone()
    }

    pub fn local_descriptions(&self) -> Vec<SessionDescription> {
        self.log.lock().unwrap().local_descriptions.clone()
    }

    pub fn candidates(&self) -> Vec<IceCandidate> {
        self.log.lock().unwrap().candidates.clone()
    }

    pub fn restart_ice_calls(&self) -> usize {
        self.log.lock().unwrap().restart_ice_calls
    }

    /// Track ids installed by sender-replace.
    pub fn replaced_tracks(&self) -> Vec<String> {
        self.log.lock().unwrap().replaced_tracks.clone()
    }

    /// Track ids installed by add-track.
    pub fn added_tracks(&self) -> Vec<String> {
        self.log.lock().unwrap().added_tracks.clone()
    }

    /// Track currently on the sender of `kind`.
    pub fn sender_track(&self, kind: MediaKind) -> Option<String> {
        self.log
            .lock()
            .unwrap()
            .senders
            .iter()
            .find(|s| s.kind == kind)
            .and_then(|s| s.track_id.clone())
    }

    pub fn is_closed(&self) -> bool {
        self.log.lock().unwrap().closed
    }

    fn check(&self, failure: MockFailure, error: NegotiationError) -> Result<(), NegotiationError> {
        let log = self.log.lock().unwrap();
        if log.closed {
            return Err(NegotiationError::Closed);
        }
        if log.failures.contains(&failure) {
            return Err(error);
        }
        Ok(())
    }

    fn check_open(&self) -> Result<(), NegotiationError> {
        if self.log.lock().unwrap().closed {
            return Err(NegotiationError::Closed);
        }
        Ok(())
    }

    fn transition(&self, next: SignalingState) {
        let changed = {
            let mut log = self.log.lock().unwrap();
            let changed = log.signaling_state != next;
            log.signaling_state = next;
            changed
        };
        if changed {
            self.emit(EndpointEventKind::SignalingStateChanged(next));
        }
    }

    fn describe(&self, sdp_type: SdpType, n: usize) -> SessionDescription {
        let sdp = format!(
            "v=0\r\no=mock {} {n} IN IP4 127.0.0.1\r\ns=-\r\n",
            self.epoch
        );
        match sdp_type {
            SdpType::Answer => SessionDescription::answer(sdp),
            _ => SessionDescription::offer(sdp),
        }
    }
}

#[async_trait]
impl MediaEndpoint for MockEndpoint {
    async fn create_offer(
        &self,
        ice_restart: bool,
    ) -> Result<SessionDescription, NegotiationError> {
        self.check(
            MockFailure::CreateOffer,
            NegotiationError::Offer("scripted failure".to_string()),
        )?;
        let n = {
            let mut log = self.log.lock().unwrap();
            log.offers.push(ice_restart);
            log.offers.len()
        };
        Ok(self.describe(SdpType::Offer, n))
    }

    async fn create_answer(&self) -> Result<SessionDescription, NegotiationError> {
        self.check(
            MockFailure::CreateAnswer,
            NegotiationError::Answer("scripted failure".to_string()),
        )?;
        let n = {
            let mut log = self.log.lock().unwrap();
            if log.signaling_state != SignalingState::HaveRemoteOffer {
                return Err(NegotiationError::Answer(
                    "no remote offer to answer".to_string(),
                ));
            }
            log.answers += 1;
            log.answers
        };
        Ok(self.describe(SdpType::Answer, n))
    }

    async fn set_local_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), NegotiationError> {
        self.check_open()?;
        let next = match description.sdp_type {
            SdpType::Offer => SignalingState::HaveLocalOffer,
            _ => SignalingState::Stable,
        };
        self.log
            .lock()
            .unwrap()
            .local_descriptions
            .push(description);
        self.transition(next);
        Ok(())
    }

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), NegotiationError> {
        self.check(
            MockFailure::RemoteDescription,
            NegotiationError::RemoteDescription("scripted failure".to_string()),
        )?;
        let next = {
            let mut log = self.log.lock().unwrap();
            let next = match description.sdp_type {
                SdpType::Offer => SignalingState::HaveRemoteOffer,
                _ if log.signaling_state == SignalingState::HaveLocalOffer => {
                    SignalingState::Stable
                }
                _ => {
                    return Err(NegotiationError::RemoteDescription(
                        "answer without local offer".to_string(),
                    ))
                }
            };
            log.remote_descriptions.push(description);
            next
        };
        self.transition(next);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), NegotiationError> {
        self.check(
            MockFailure::Candidate,
            NegotiationError::Candidate("scripted failure".to_string()),
        )?;
        self.log.lock().unwrap().candidates.push(candidate);
        Ok(())
    }

    async fn restart_ice(&self) -> Result<(), NegotiationError> {
        self.check(
            MockFailure::RestartIce,
            NegotiationError::Offer("scripted restart failure".to_string()),
        )?;
        self.log.lock().unwrap().restart_ice_calls += 1;
        Ok(())
    }

    fn signaling_state(&self) -> SignalingState {
        let log = self.log.lock().unwrap();
        if log.closed {
            SignalingState::Closed
        } else {
            log.signaling_state
        }
    }

    async fn senders(&self) -> Vec<SenderInfo> {
        self.log.lock().unwrap().senders.clone()
    }

    async fn replace_track(
        &self,
        kind: MediaKind,
        track: Arc<LocalTrack>,
    ) -> Result<(), NegotiationError> {
        self.check_open()?;
        let mut log = self.log.lock().unwrap();
        let sender = log
            .senders
            .iter_mut()
            .find(|s| s.kind == kind)
            .ok_or(NegotiationError::NoSender(kind))?;
        sender.track_id = Some(track.id().to_string());
        log.replaced_tracks.push(track.id().to_string());
        Ok(())
    }

    async fn add_track(&self, track: Arc<LocalTrack>) -> Result<(), NegotiationError> {
        self.check_open()?;
        let mut log = self.log.lock().unwrap();
        log.senders.push(SenderInfo {
            kind: track.kind(),
            track_id: Some(track.id().to_string()),
        });
        log.added_tracks.push(track.id().to_string());
        Ok(())
    }

    async fn close(&self) -> Result<(), NegotiationError> {
        let mut log = self.log.lock().unwrap();
        if log.closed {
            return Err(NegotiationError::Closed);
        }
        log.closed = true;
        Ok(())
    }
}

#[derive(Debug, Default)]
struct FactoryLog {
    endpoints: Vec<Arc<MockEndpoint>>,
    configs: Vec<EndpointConfig>,
    fail_next: usize,
}

/// Factory that hands out [`MockEndpoint`]s and keeps every one it built.
#[derive(Debug, Default)]
pub struct MockEndpointFactory {
    log: Mutex<FactoryLog>,
}

impl MockEndpointFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` creations fail.
    pub fn fail_next_creations(&self, count: usize) {
        self.log.lock().unwrap().fail_next = count;
    }

    pub fn created(&self) -> Vec<Arc<MockEndpoint>> {
        self.log.lock().unwrap().endpoints.clone()
    }

    pub fn created_count(&self) -> usize {
        self.log.lock().unwrap().endpoints.len()
    }

    /// Every endpoint built for `remote`, oldest first.
    pub fn for_remote(&self, remote: &SessionId) -> Vec<Arc<MockEndpoint>> {
        self.log
            .lock()
            .unwrap()
            .endpoints
            .iter()
            .filter(|e| &e.remote == remote)
            .cloned()
            .collect()
    }

    /// Most recent endpoint built for `remote`.
    pub fn latest(&self, remote: &SessionId) -> Option<Arc<MockEndpoint>> {
        self.for_remote(remote).pop()
    }

    /// Config handed to the most recent creation.
    pub fn last_config(&self) -> Option<EndpointConfig> {
        self.log.lock().unwrap().configs.last().cloned()
    }
}

#[async_trait]
impl EndpointFactory for MockEndpointFactory {
    async fn create(
        &self,
        remote: &SessionId,
        epoch: u64,
        config: &EndpointConfig,
        events: EndpointEventSender,
    ) -> Result<Arc<dyn MediaEndpoint>, NegotiationError> {
        let mut log = self.log.lock().unwrap();
        if log.fail_next > 0 {
            log.fail_next -= 1;
            return Err(NegotiationError::EndpointCreation(
                "scripted failure".to_string(),
            ));
        }
        let endpoint = Arc::new(MockEndpoint::new(remote.clone(), epoch, events));
        log.endpoints.push(Arc::clone(&endpoint));
        log.configs.push(config.clone());
        Ok(endpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_offer_answer_walks_signaling_states() {
        let factory = MockEndpointFactory::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let remote = SessionId::from("sock-b");
        let endpoint = factory
            .create(&remote, 1, &EndpointConfig::default(), tx)
            .await
            .unwrap();

        let offer = endpoint.create_offer(false).await.unwrap();
        endpoint.set_local_description(offer).await.unwrap();
        assert_eq!(endpoint.signaling_state(), SignalingState::HaveLocalOffer);

        endpoint
            .set_remote_description(SessionDescription::answer("v=0"))
            .await
            .unwrap();
        assert_eq!(endpoint.signaling_state(), SignalingState::Stable);

        let first = rx.recv().await.unwrap();
        assert_eq!(first.epoch, 1);
        assert!(matches!(
            first.kind,
            EndpointEventKind::SignalingStateChanged(SignalingState::HaveLocalOffer)
        ));
        assert_eq!(factory.latest(&remote).unwrap().offers(), vec![false]);
    }

    #[tokio::test]
    async fn test_scripted_failures_and_close() {
        let factory = MockEndpointFactory::new();
        factory.fail_next_creations(1);
        let (tx, _rx) = mpsc::unbounded_channel();
        let remote = SessionId::from("sock-b");
        assert!(factory
            .create(&remote, 1, &EndpointConfig::default(), tx.clone())
            .await
            .is_err());

        let endpoint = factory
            .create(&remote, 2, &EndpointConfig::default(), tx)
            .await
            .unwrap();
        let mock = factory.latest(&remote).unwrap();
        mock.fail(MockFailure::RestartIce);
        assert!(endpoint.restart_ice().await.is_err());
        mock.heal(MockFailure::RestartIce);
        endpoint.restart_ice().await.unwrap();
        assert_eq!(mock.restart_ice_calls(), 1);

        endpoint.close().await.unwrap();
        assert!(mock.is_closed());
        assert!(matches!(
            endpoint.add_ice_candidate(IceCandidate::new("c")).await,
            Err(NegotiationError::Closed)
        ));
    }
}
