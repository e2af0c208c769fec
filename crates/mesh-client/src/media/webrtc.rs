//! `webrtc` crate implementation of [`MediaEndpoint`].

use crate::errors::NegotiationError;
use crate::media::endpoint::{
    EndpointConfig, EndpointEvent, EndpointEventKind, EndpointEventSender, EndpointFactory,
    IceConnectionState, MediaEndpoint, PeerConnectionState, SenderInfo, SignalingState,
};
use crate::media::track::{LocalTrack, MediaKind, RemoteStream, RemoteTrackInfo};
use async_trait::async_trait;
use common::secret::ExposeSecret;
use common::types::SessionId;
use mesh_protocol::{IceCandidate, SdpType, SessionDescription};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, trace};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::offer_answer_options::RTCOfferOptions;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

type StreamMap = Arc<Mutex<HashMap<String, Arc<RemoteStream>>>>;

fn media_kind(kind: RTPCodecType) -> Option<MediaKind> {
    match kind {
        RTPCodecType::Audio => Some(MediaKind::Audio),
        RTPCodecType::Video => Some(MediaKind::Video),
        RTPCodecType::Unspecified => None,
    }
}

fn ice_state(state: RTCIceConnectionState) -> IceConnectionState {
    match state {
        RTCIceConnectionState::Unspecified | RTCIceConnectionState::New => IceConnectionState::New,
        RTCIceConnectionState::Checking => IceConnectionState::Checking,
        RTCIceConnectionState::Connected => IceConnectionState::Connected,
        RTCIceConnectionState::Completed => IceConnectionState::Completed,
        RTCIceConnectionState::Disconnected => IceConnectionState::Disconnected,
        RTCIceConnectionState::Failed => IceConnectionState::Failed,
        RTCIceConnectionState::Closed => IceConnectionState::Closed,
    }
}

fn peer_state(state: RTCPeerConnectionState) -> PeerConnectionState {
    match state {
        RTCPeerConnectionState::Unspecified | RTCPeerConnectionState::New => {
            PeerConnectionState::New
        }
        RTCPeerConnectionState::Connecting => PeerConnectionState::Connecting,
        RTCPeerConnectionState::Connected => PeerConnectionState::Connected,
        RTCPeerConnectionState::Disconnected => PeerConnectionState::Disconnected,
        RTCPeerConnectionState::Failed => PeerConnectionState::Failed,
        RTCPeerConnectionState::Closed => PeerConnectionState::Closed,
    }
}

fn signaling_state(state: RTCSignalingState) -> SignalingState {
    match state {
        RTCSignalingState::Unspecified | RTCSignalingState::Stable => SignalingState::Stable,
        RTCSignalingState::HaveLocalOffer => SignalingState::HaveLocalOffer,
        RTCSignalingState::HaveRemoteOffer => SignalingState::HaveRemoteOffer,
        RTCSignalingState::HaveLocalPranswer => SignalingState::HaveLocalPranswer,
        RTCSignalingState::HaveRemotePranswer => SignalingState::HaveRemotePranswer,
        RTCSignalingState::Closed => SignalingState::Closed,
    }
}

fn to_rtc_description(description: SessionDescription) -> Result<RTCSessionDescription, String> {
    let result = match description.sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(description.sdp),
        SdpType::Answer => RTCSessionDescription::answer(description.sdp),
        SdpType::Pranswer => RTCSessionDescription::pranswer(description.sdp),
        SdpType::Rollback => return Err("rollback descriptions are not supported".to_string()),
    };
    result.map_err(|e| e.to_string())
}

fn ice_servers(config: &EndpointConfig) -> Vec<RTCIceServer> {
    config
        .ice_servers
        .iter()
        .map(|server| match &server.credential {
            Some(turn) => RTCIceServer {
                urls: server.urls.clone(),
                username: turn.username.clone(),
                credential: turn.credential.expose_secret().to_string(),
                ..Default::default()
            },
            None => RTCIceServer {
                urls: server.urls.clone(),
                ..Default::default()
            },
        })
        .collect()
}

/// Builds `webrtc` peer connections with default codecs and interceptors.
pub struct WebRtcEndpointFactory {
    api: API,
}

impl WebRtcEndpointFactory {
    /// # Errors
    ///
    /// Returns `EndpointCreation` if codec or interceptor registration fails.
    pub fn new() -> Result<Self, NegotiationError> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| NegotiationError::EndpointCreation(e.to_string()))?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(|e| NegotiationError::EndpointCreation(e.to_string()))?;
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();
        Ok(Self { api })
    }
}

fn emit(events: &EndpointEventSender, remote: &SessionId, epoch: u64, kind: EndpointEventKind) {
    // The orchestrator dropping its receiver means shutdown; nothing to report.
    let _ = events.send(EndpointEvent {
        remote: remote.clone(),
        epoch,
        kind,
    });
}

fn wire_observers(
    pc: &RTCPeerConnection,
    remote: &SessionId,
    epoch: u64,
    events: &EndpointEventSender,
    streams: &StreamMap,
) {
    let (tx, id) = (events.clone(), remote.clone());
    pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
        let (tx, id) = (tx.clone(), id.clone());
        Box::pin(async move {
            let candidate = match candidate {
                Some(c) => match c.to_json() {
                    Ok(init) => Some(IceCandidate {
                        candidate: init.candidate,
                        sdp_mid: init.sdp_mid,
                        sdp_mline_index: init.sdp_mline_index,
                        username_fragment: init.username_fragment,
                    }),
                    Err(e) => {
                        debug!(target: "mesh.media", error = %e, "Candidate serialization failed");
                        return;
                    }
                },
                None => None,
            };
            emit(&tx, &id, epoch, EndpointEventKind::CandidateDiscovered(candidate));
        })
    }));

    let (tx, id, streams) = (events.clone(), remote.clone(), Arc::clone(streams));
    pc.on_track(Box::new(
        move |track: Arc<TrackRemote>,
              _receiver: Arc<RTCRtpReceiver>,
              _transceiver: Arc<RTCRtpTransceiver>| {
            let (tx, id, streams) = (tx.clone(), id.clone(), Arc::clone(&streams));
            Box::pin(async move {
                let Some(kind) = media_kind(track.kind()) else {
                    return;
                };
                let stream_id = track.stream_id();
                let stream = {
                    let mut map = match streams.lock() {
                        Ok(guard) => guard,
                        Err(poisoned) => poisoned.into_inner(),
                    };
                    Arc::clone(
                        map.entry(stream_id.clone())
                            .or_insert_with(|| RemoteStream::new(stream_id)),
                    )
                };
                stream.add_track(RemoteTrackInfo {
                    id: track.id(),
                    kind,
                });
                emit(&tx, &id, epoch, EndpointEventKind::TrackReceived(stream));

                // Rendering is out of process; drain RTP until the track ends.
                tokio::spawn(async move {
                    while track.read_rtp().await.is_ok() {}
                    trace!(target: "mesh.media", track = %track.id(), "Remote track ended");
                });
            })
        },
    ));

    let (tx, id) = (events.clone(), remote.clone());
    pc.on_ice_connection_state_change(Box::new(move |state: RTCIceConnectionState| {
        emit(
            &tx,
            &id,
            epoch,
            EndpointEventKind::IceStateChanged(ice_state(state)),
        );
        Box::pin(async {})
    }));

    let (tx, id) = (events.clone(), remote.clone());
    pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
        emit(
            &tx,
            &id,
            epoch,
            EndpointEventKind::OverallStateChanged(peer_state(state)),
        );
        Box::pin(async {})
    }));

    let (tx, id) = (events.clone(), remote.clone());
    pc.on_signaling_state_change(Box::new(move |state: RTCSignalingState| {
        emit(
            &tx,
            &id,
            epoch,
            EndpointEventKind::SignalingStateChanged(signaling_state(state)),
        );
        Box::pin(async {})
    }));
}

#[async_trait]
impl EndpointFactory for WebRtcEndpointFactory {
    async fn create(
        &self,
        remote: &SessionId,
        epoch: u64,
        config: &EndpointConfig,
        events: EndpointEventSender,
    ) -> Result<Arc<dyn MediaEndpoint>, NegotiationError> {
        let rtc_config = RTCConfiguration {
            ice_servers: ice_servers(config),
            ..Default::default()
        };
        let pc = self
            .api
            .new_peer_connection(rtc_config)
            .await
            .map_err(|e| NegotiationError::EndpointCreation(e.to_string()))?;

        let streams: StreamMap = Arc::new(Mutex::new(HashMap::new()));
        wire_observers(&pc, remote, epoch, &events, &streams);

        debug!(target: "mesh.media", remote = %remote, epoch, "Peer connection created");
        Ok(Arc::new(WebRtcEndpoint {
            pc: Arc::new(pc),
            ice_restart_pending: AtomicBool::new(false),
        }))
    }
}

/// A `webrtc` peer connection.
pub struct WebRtcEndpoint {
    pc: Arc<RTCPeerConnection>,
    ice_restart_pending: AtomicBool,
}

#[async_trait]
impl MediaEndpoint for WebRtcEndpoint {
    async fn create_offer(
        &self,
        ice_restart: bool,
    ) -> Result<SessionDescription, NegotiationError> {
        let restart = ice_restart || self.ice_restart_pending.swap(false, Ordering::SeqCst);
        let options = restart.then(|| RTCOfferOptions {
            ice_restart: true,
            ..Default::default()
        });
        let offer = self
            .pc
            .create_offer(options)
            .await
            .map_err(|e| NegotiationError::Offer(e.to_string()))?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn create_answer(&self) -> Result<SessionDescription, NegotiationError> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| NegotiationError::Answer(e.to_string()))?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn set_local_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), NegotiationError> {
        let desc = to_rtc_description(description)
            .map_err(NegotiationError::LocalDescription)?;
        self.pc
            .set_local_description(desc)
            .await
            .map_err(|e| NegotiationError::LocalDescription(e.to_string()))
    }

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), NegotiationError> {
        let desc = to_rtc_description(description)
            .map_err(NegotiationError::RemoteDescription)?;
        self.pc
            .set_remote_description(desc)
            .await
            .map_err(|e| NegotiationError::RemoteDescription(e.to_string()))
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), NegotiationError> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        };
        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|e| NegotiationError::Candidate(e.to_string()))
    }

    async fn restart_ice(&self) -> Result<(), NegotiationError> {
        if self.pc.connection_state() == RTCPeerConnectionState::Closed {
            return Err(NegotiationError::Closed);
        }
        self.ice_restart_pending.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn signaling_state(&self) -> SignalingState {
        signaling_state(self.pc.signaling_state())
    }

    async fn senders(&self) -> Vec<SenderInfo> {
        let mut out = Vec::new();
        for sender in self.pc.get_senders().await {
            if let Some(track) = sender.track().await {
                if let Some(kind) = media_kind(track.kind()) {
                    out.push(SenderInfo {
                        kind,
                        track_id: Some(track.id().to_string()),
                    });
                }
            }
        }
        out
    }

    async fn replace_track(
        &self,
        kind: MediaKind,
        track: Arc<LocalTrack>,
    ) -> Result<(), NegotiationError> {
        for sender in self.pc.get_senders().await {
            let Some(current) = sender.track().await else {
                continue;
            };
            if media_kind(current.kind()) != Some(kind) {
                continue;
            }
            let replacement: Arc<dyn TrackLocal + Send + Sync> = track.rtc_track();
            return sender
                .replace_track(Some(replacement))
                .await
                .map_err(|e| NegotiationError::TrackReplace(e.to_string()));
        }
        Err(NegotiationError::NoSender(kind))
    }

    async fn add_track(&self, track: Arc<LocalTrack>) -> Result<(), NegotiationError> {
        let local: Arc<dyn TrackLocal + Send + Sync> = track.rtc_track();
        let sender = self
            .pc
            .add_track(local)
            .await
            .map_err(|e| NegotiationError::TrackReplace(e.to_string()))?;

        // RTCP must be read for interceptors such as NACK to work.
        tokio::spawn(async move {
            let mut rtcp_buf = vec![0u8; 1500];
            while sender.read(&mut rtcp_buf).await.is_ok() {}
        });
        Ok(())
    }

    async fn close(&self) -> Result<(), NegotiationError> {
        self.pc
            .close()
            .await
            .map_err(|e| NegotiationError::Close(e.to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use common::secret::TurnCredential;
    use crate::media::endpoint::IceServerConfig;

    #[test]
    fn test_ice_servers_carry_turn_credential() {
        let config = EndpointConfig {
            ice_servers: vec![
                IceServerConfig {
                    urls: vec!["stun:stun.example.org:3478".to_string()],
                    credential: None,
                },
                IceServerConfig {
                    urls: vec!["turn:turn.example.org:443".to_string()],
                    credential: Some(TurnCredential::new("relay", "pw")),
                },
            ],
        };
        let servers = ice_servers(&config);
        assert_eq!(servers.len(), 2);
        assert!(servers[0].username.is_empty());
        assert_eq!(servers[1].username, "relay");
        assert_eq!(servers[1].credential, "pw");
    }

    #[test]
    fn test_state_mapping() {
        assert_eq!(
            ice_state(RTCIceConnectionState::Failed),
            IceConnectionState::Failed
        );
        assert_eq!(
            peer_state(RTCPeerConnectionState::Unspecified),
            PeerConnectionState::New
        );
        assert_eq!(
            signaling_state(RTCSignalingState::HaveLocalOffer),
            SignalingState::HaveLocalOffer
        );
    }

    #[tokio::test]
    async fn test_offer_answer_between_two_endpoints() {
        let factory = WebRtcEndpointFactory::new().unwrap();
        let config = EndpointConfig::default();
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();

        let a = factory
            .create(&SessionId::from("a"), 1, &config, tx.clone())
            .await
            .unwrap();
        let b = factory
            .create(&SessionId::from("b"), 1, &config, tx)
            .await
            .unwrap();

        a.add_track(LocalTrack::new(crate::media::track::TrackSource::Microphone))
            .await
            .unwrap();

        let offer = a.create_offer(false).await.unwrap();
        a.set_local_description(offer.clone()).await.unwrap();
        assert_eq!(a.signaling_state(), SignalingState::HaveLocalOffer);

        b.set_remote_description(offer).await.unwrap();
        let answer = b.create_answer().await.unwrap();
        b.set_local_description(answer.clone()).await.unwrap();
        a.set_remote_description(answer).await.unwrap();
        assert_eq!(a.signaling_state(), SignalingState::Stable);

        let senders = a.senders().await;
        assert_eq!(senders.len(), 1);
        assert_eq!(senders[0].kind, MediaKind::Audio);

        a.close().await.unwrap();
        b.close().await.unwrap();
    }
}
