//! `ConnectionOrchestrator` - owns every participant connection.
//!
//! The orchestrator is the single owner of the [`ConnectionRegistry`], the
//! participant view, the buffered candidates and every pending timer. All
//! inputs arrive on one mailbox:
//!
//! - Connection-related envelopes from the relay
//! - Endpoint observer events, tagged with an epoch so that events from a
//!   replaced endpoint are dropped
//! - Local media commands from the session controller
//! - Timer firings from the [`TaskScheduler`]
//!
//! # Liveness
//!
//! A connection that does not reach `connected` within the health timeout
//! is recreated. ICE `failed` triggers up to `max_restart_attempts` ICE
//! restarts with exponential backoff, then a full recreation. Recreation
//! tears the endpoint down, waits for the settle delay, builds a fresh
//! initiator endpoint and offers with `isRecreate` after the offer delay.
//! A recreation never runs for a participant that has left.

use crate::actors::messages::{
    ConnectionSnapshot, LocalMediaStatus, OrchestratorMessage, OrchestratorState,
    ParticipantSnapshot,
};
use crate::actors::registry::{
    ConnectionRegistry, ConnectionState, ParticipantConnection, PendingCandidates,
};
use crate::actors::renegotiation::{InstallOutcome, TrackRenegotiationManager};
use crate::actors::scheduler::{TaskKind, TaskScheduler};
use crate::config::ConnectionTimings;
use crate::errors::{ClientError, NegotiationError};
use crate::media::capture::{CaptureDevice, LocalCaptureManager};
use crate::media::endpoint::{
    EndpointConfig, EndpointEvent, EndpointEventKind, EndpointEventSender, EndpointFactory,
    IceConnectionState, PeerConnectionState, SignalingState,
};
use crate::media::track::{LocalTrack, RemoteStream};
use crate::observability::metrics;
use crate::signaling::SignalingSender;
use common::types::{SessionId, UserId};
use mesh_protocol::{
    AnswerPayload, CandidatePayload, IceCandidate, MediaFlags, MessageId, OfferPayload,
    PeerAnnouncement, Route, SignalingEnvelope,
};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

/// Mailbox size of the orchestrator.
const ORCHESTRATOR_CHANNEL_BUFFER: usize = 500;

/// Handle to the `ConnectionOrchestrator`.
#[derive(Clone)]
pub struct OrchestratorHandle {
    sender: mpsc::Sender<OrchestratorMessage>,
    cancel_token: CancellationToken,
}

impl OrchestratorHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> OrchestratorMessage,
    ) -> Result<T, ClientError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|e| ClientError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| ClientError::Internal(format!("response receive failed: {e}")))
    }

    /// Forward a connection-related envelope.
    pub async fn signaling(&self, envelope: SignalingEnvelope) -> Result<(), ClientError> {
        self.sender
            .send(OrchestratorMessage::Signaling { envelope })
            .await
            .map_err(|e| ClientError::Internal(format!("channel send failed: {e}")))
    }

    pub async fn set_local_user(&self, user_id: UserId) -> Result<(), ClientError> {
        self.sender
            .send(OrchestratorMessage::SetLocalUser { user_id })
            .await
            .map_err(|e| ClientError::Internal(format!("channel send failed: {e}")))
    }

    pub async fn acquire_local_media(&self) -> Result<(), ClientError> {
        self.request(|respond_to| OrchestratorMessage::AcquireLocalMedia { respond_to })
            .await?
    }

    pub async fn stop_local_media(&self) -> Result<(), ClientError> {
        self.request(|respond_to| OrchestratorMessage::StopLocalMedia { respond_to })
            .await
    }

    pub async fn set_audio_enabled(&self, enabled: bool) -> Result<(), ClientError> {
        self.request(|respond_to| OrchestratorMessage::SetAudioEnabled {
            enabled,
            respond_to,
        })
        .await?
    }

    pub async fn set_video_enabled(&self, enabled: bool) -> Result<(), ClientError> {
        self.request(|respond_to| OrchestratorMessage::SetVideoEnabled {
            enabled,
            respond_to,
        })
        .await?
    }

    pub async fn start_screen_share(&self) -> Result<(), ClientError> {
        self.request(|respond_to| OrchestratorMessage::StartScreenShare { respond_to })
            .await?
    }

    pub async fn stop_screen_share(&self) -> Result<(), ClientError> {
        self.request(|respond_to| OrchestratorMessage::StopScreenShare { respond_to })
            .await?
    }

    /// Close every connection and cancel every timer. Returns the number of
    /// connections closed.
    pub async fn close_all(&self) -> Result<usize, ClientError> {
        self.request(|respond_to| OrchestratorMessage::CloseAll { respond_to })
            .await
    }

    pub async fn get_state(&self) -> Result<OrchestratorState, ClientError> {
        self.request(|respond_to| OrchestratorMessage::GetState { respond_to })
            .await
    }

    /// Cancel the orchestrator. Open connections are closed on the way out.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// Everything the orchestrator needs from the outside.
pub struct OrchestratorDeps {
    pub local_user_id: UserId,
    pub factory: Arc<dyn EndpointFactory>,
    pub endpoint_config: EndpointConfig,
    pub capture_device: Arc<dyn CaptureDevice>,
    pub signaling: SignalingSender,
    pub timings: ConnectionTimings,
}

/// Participant view entry: who is in the room, their flags and stream.
#[derive(Debug)]
struct RemoteParticipant {
    user_id: UserId,
    flags: MediaFlags,
    stream: Option<Arc<RemoteStream>>,
}

impl RemoteParticipant {
    fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            flags: MediaFlags::default(),
            stream: None,
        }
    }
}

/// What an outbound offer is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OfferKind {
    Initial,
    Restart,
    Recreate,
}

/// The `ConnectionOrchestrator` actor.
pub struct ConnectionOrchestrator {
    local_user_id: UserId,
    /// Our socket id as announced by the relay on join.
    local_session_id: Option<SessionId>,
    receiver: mpsc::Receiver<OrchestratorMessage>,
    cancel_token: CancellationToken,
    factory: Arc<dyn EndpointFactory>,
    endpoint_config: EndpointConfig,
    signaling: SignalingSender,
    timings: ConnectionTimings,
    registry: ConnectionRegistry,
    participants: HashMap<SessionId, RemoteParticipant>,
    pending_candidates: PendingCandidates,
    scheduler: TaskScheduler,
    mailbox: mpsc::WeakSender<OrchestratorMessage>,
    endpoint_events_tx: EndpointEventSender,
    endpoint_events: mpsc::UnboundedReceiver<EndpointEvent>,
    capture: LocalCaptureManager,
    renegotiation: TrackRenegotiationManager,
    next_epoch: u64,
    next_msg_seq: u64,
}

impl ConnectionOrchestrator {
    /// Spawn the orchestrator.
    ///
    /// Returns a handle and the task join handle.
    pub fn spawn(
        deps: OrchestratorDeps,
        cancel_token: CancellationToken,
    ) -> (OrchestratorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(ORCHESTRATOR_CHANNEL_BUFFER);
        let (endpoint_events_tx, endpoint_events) = mpsc::unbounded_channel();
        let mailbox = sender.downgrade();

        let actor = Self {
            local_user_id: deps.local_user_id,
            local_session_id: None,
            receiver,
            cancel_token: cancel_token.clone(),
            factory: deps.factory,
            endpoint_config: deps.endpoint_config,
            signaling: deps.signaling,
            timings: deps.timings,
            registry: ConnectionRegistry::new(),
            participants: HashMap::new(),
            pending_candidates: PendingCandidates::default(),
            scheduler: TaskScheduler::new(mailbox.clone()),
            mailbox,
            endpoint_events_tx,
            endpoint_events,
            capture: LocalCaptureManager::new(deps.capture_device),
            renegotiation: TrackRenegotiationManager::new(),
            next_epoch: 0,
            next_msg_seq: 0,
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = OrchestratorHandle {
            sender,
            cancel_token,
        };

        (handle, task_handle)
    }

    #[instrument(skip_all, name = "mesh.actor.orchestrator", fields(user_id = %self.local_user_id))]
    async fn run(mut self) {
        info!(target: "mesh.actor.orchestrator", "ConnectionOrchestrator started");

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "mesh.actor.orchestrator",
                        "ConnectionOrchestrator received cancellation signal"
                    );
                    self.close_all().await;
                    self.capture.stop_all();
                    break;
                }

                Some(event) = self.endpoint_events.recv() => {
                    self.handle_endpoint_event(event).await;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => self.handle_message(message).await,
                        None => {
                            info!(
                                target: "mesh.actor.orchestrator",
                                "ConnectionOrchestrator channel closed, exiting"
                            );
                            self.close_all().await;
                            self.capture.stop_all();
                            break;
                        }
                    }
                }
            }
        }

        info!(target: "mesh.actor.orchestrator", "ConnectionOrchestrator stopped");
    }

    async fn handle_message(&mut self, message: OrchestratorMessage) {
        match message {
            OrchestratorMessage::Signaling { envelope } => {
                self.handle_envelope(envelope).await;
            }

            OrchestratorMessage::SetLocalUser { user_id } => {
                debug!(target: "mesh.actor.orchestrator", user_id = %user_id, "Local user set");
                self.local_user_id = user_id;
            }

            OrchestratorMessage::AcquireLocalMedia { respond_to } => {
                let result = self.acquire_local_media().await;
                let _ = respond_to.send(result);
            }

            OrchestratorMessage::StopLocalMedia { respond_to } => {
                self.capture.stop_all();
                self.renegotiation.reset();
                info!(target: "mesh.actor.orchestrator", "Local media stopped");
                let _ = respond_to.send(());
            }

            OrchestratorMessage::SetAudioEnabled {
                enabled,
                respond_to,
            } => {
                let result = self
                    .renegotiation
                    .set_audio_enabled(&self.capture, enabled)
                    .map_err(ClientError::from);
                let _ = respond_to.send(result);
            }

            OrchestratorMessage::SetVideoEnabled {
                enabled,
                respond_to,
            } => {
                let result = match self
                    .renegotiation
                    .set_video_enabled(&self.registry, &mut self.capture, enabled)
                    .await
                {
                    Ok(outcome) => {
                        self.apply_install_outcome(outcome).await;
                        Ok(())
                    }
                    Err(e) => Err(ClientError::from(e)),
                };
                let _ = respond_to.send(result);
            }

            OrchestratorMessage::StartScreenShare { respond_to } => {
                let result = self.start_screen_share().await;
                let _ = respond_to.send(result);
            }

            OrchestratorMessage::StopScreenShare { respond_to } => {
                let result = self.stop_screen_share().await;
                let _ = respond_to.send(result);
            }

            OrchestratorMessage::ScreenTrackEnded { track_id } => {
                if self.renegotiation.screen_track_id() == Some(track_id.as_str()) {
                    info!(
                        target: "mesh.actor.orchestrator",
                        track = %track_id,
                        "Screen track ended externally, restoring camera"
                    );
                    if let Err(e) = self.stop_screen_share().await {
                        warn!(target: "mesh.actor.orchestrator", error = %e, "Camera restore failed");
                    }
                }
            }

            OrchestratorMessage::CloseAll { respond_to } => {
                let closed = self.close_all().await;
                let _ = respond_to.send(closed);
            }

            OrchestratorMessage::GetState { respond_to } => {
                let _ = respond_to.send(self.snapshot());
            }

            OrchestratorMessage::TimerFired {
                remote,
                kind,
                timer_id,
            } => {
                self.handle_timer(&remote, kind, timer_id).await;
            }
        }
    }

    // ------------------------------------------------------------------
    // Signaling envelopes
    // ------------------------------------------------------------------

    async fn handle_envelope(&mut self, envelope: SignalingEnvelope) {
        match envelope {
            SignalingEnvelope::ExistingParticipants(existing) => {
                if existing.socket_id.is_some() {
                    self.local_session_id = existing.socket_id;
                }
                for peer in existing.participants {
                    self.upsert_participant(&peer.socket_id, &peer.user_id);
                    if let Err(e) = self
                        .create_connection(&peer.socket_id, &peer.user_id, false)
                        .await
                    {
                        self.negotiation_failed(&peer.socket_id, &e);
                    }
                }
            }

            SignalingEnvelope::UserJoined(peer) => self.handle_user_joined(peer).await,

            SignalingEnvelope::UserLeft(peer) => self.handle_user_left(&peer).await,

            SignalingEnvelope::Offer(payload) => self.handle_offer(payload).await,

            SignalingEnvelope::Answer(payload) => self.handle_answer(payload).await,

            SignalingEnvelope::IceCandidate(payload) => self.handle_candidate(payload).await,

            SignalingEnvelope::MediaStatusChanged(status) => {
                let participant = self
                    .participants
                    .entry(status.socket_id.clone())
                    .or_insert_with(|| RemoteParticipant::new(status.user_id.clone()));
                participant.flags = status.flags;
                debug!(
                    target: "mesh.actor.orchestrator",
                    remote = %status.socket_id,
                    muted = status.flags.is_muted,
                    video_off = status.flags.is_video_off,
                    screen = status.flags.is_screen_sharing,
                    "Remote media status changed"
                );
            }

            other => {
                debug!(
                    target: "mesh.actor.orchestrator",
                    kind = %other.kind(),
                    "Ignoring envelope"
                );
            }
        }
    }

    async fn handle_user_joined(&mut self, peer: PeerAnnouncement) {
        info!(
            target: "mesh.actor.orchestrator",
            remote = %peer.socket_id,
            remote_user = %peer.user_id,
            "Participant joined"
        );
        self.upsert_participant(&peer.socket_id, &peer.user_id);
        if let Err(e) = self
            .create_connection(&peer.socket_id, &peer.user_id, true)
            .await
        {
            self.negotiation_failed(&peer.socket_id, &e);
            return;
        }
        self.scheduler.schedule(
            &peer.socket_id,
            TaskKind::InitialOffer,
            self.timings.join_offer_delay,
            "",
        );
    }

    async fn handle_user_left(&mut self, peer: &PeerAnnouncement) {
        info!(
            target: "mesh.actor.orchestrator",
            remote = %peer.socket_id,
            remote_user = %peer.user_id,
            "Participant left"
        );
        self.participants.remove(&peer.socket_id);
        self.pending_candidates.clear(&peer.socket_id);
        self.dispose_connection(&peer.socket_id).await;
    }

    async fn handle_offer(&mut self, payload: OfferPayload) {
        let Some(remote) = payload.route.from_socket.clone() else {
            warn!(target: "mesh.actor.orchestrator", "Offer without sender, dropping");
            return;
        };
        self.upsert_participant(&remote, &payload.from_user_id);

        let glare = self
            .registry
            .get(&remote)
            .is_some_and(|c| c.endpoint.signaling_state() == SignalingState::HaveLocalOffer);
        if glare && self.keeps_local_offer(&remote, &payload.from_user_id) {
            debug!(
                target: "mesh.actor.orchestrator",
                remote = %remote,
                "Colliding offer, keeping ours"
            );
            return;
        }

        if payload.is_recreate || glare || !self.registry.contains(&remote) {
            if let Err(e) = self
                .create_connection(&remote, &payload.from_user_id, false)
                .await
            {
                self.negotiation_failed(&remote, &e);
                return;
            }
        }

        let Some(endpoint) = self.registry.get(&remote).map(|c| Arc::clone(&c.endpoint)) else {
            return;
        };

        if let Err(e) = endpoint.set_remote_description(payload.offer).await {
            self.negotiation_failed(&remote, &e);
            return;
        }
        self.remote_description_applied(&remote).await;

        let answer = match endpoint.create_answer().await {
            Ok(answer) => answer,
            Err(e) => {
                self.negotiation_failed(&remote, &e);
                return;
            }
        };
        if let Err(e) = endpoint.set_local_description(answer.clone()).await {
            self.negotiation_failed(&remote, &e);
            return;
        }

        debug!(
            target: "mesh.actor.orchestrator",
            remote = %remote,
            msg_id = %payload.msg_id,
            restart = payload.is_restart,
            recreate = payload.is_recreate,
            "Answering offer"
        );
        self.send_envelope(SignalingEnvelope::Answer(AnswerPayload {
            answer,
            route: Route::to(remote),
            from_user_id: self.local_user_id.clone(),
            msg_id: payload.msg_id,
        }));
    }

    /// Offer collision tie-break: the lower user id keeps its offer. The
    /// same user on two sockets falls back to the lower socket id.
    fn keeps_local_offer(&self, remote: &SessionId, remote_user: &UserId) -> bool {
        match self.local_user_id.cmp(remote_user) {
            Ordering::Less => true,
            Ordering::Greater => false,
            Ordering::Equal => self
                .local_session_id
                .as_ref()
                .is_some_and(|local| local < remote),
        }
    }

    async fn handle_answer(&mut self, payload: AnswerPayload) {
        let Some(remote) = payload.route.from_socket.clone() else {
            warn!(target: "mesh.actor.orchestrator", "Answer without sender, dropping");
            return;
        };
        let Some(endpoint) = self.registry.get(&remote).map(|c| Arc::clone(&c.endpoint)) else {
            debug!(target: "mesh.actor.orchestrator", remote = %remote, "Answer for unknown connection");
            return;
        };

        let state = endpoint.signaling_state();
        if state != SignalingState::HaveLocalOffer {
            debug!(
                target: "mesh.actor.orchestrator",
                remote = %remote,
                msg_id = %payload.msg_id,
                state = ?state,
                "Ignoring answer outside have-local-offer"
            );
            return;
        }

        if let Err(e) = endpoint.set_remote_description(payload.answer).await {
            self.negotiation_failed(&remote, &e);
            return;
        }
        self.remote_description_applied(&remote).await;
    }

    async fn handle_candidate(&mut self, payload: CandidatePayload) {
        let Some(remote) = payload.route.from_socket.clone() else {
            warn!(target: "mesh.actor.orchestrator", "Candidate without sender, dropping");
            return;
        };

        let endpoint = self
            .registry
            .get(&remote)
            .filter(|c| c.remote_description_applied)
            .map(|c| Arc::clone(&c.endpoint));

        match endpoint {
            Some(endpoint) => {
                if let Err(e) = endpoint.add_ice_candidate(payload.candidate).await {
                    self.negotiation_failed(&remote, &e);
                }
            }
            None => {
                if !self.pending_candidates.push(&remote, payload.candidate) {
                    debug!(
                        target: "mesh.actor.orchestrator",
                        remote = %remote,
                        "Candidate buffer full, dropping"
                    );
                }
            }
        }
    }

    /// Mark the remote description applied and flush buffered candidates.
    async fn remote_description_applied(&mut self, remote: &SessionId) {
        let Some(connection) = self.registry.get_mut(remote) else {
            return;
        };
        connection.remote_description_applied = true;
        let endpoint = Arc::clone(&connection.endpoint);

        let buffered = self.pending_candidates.take(remote);
        if !buffered.is_empty() {
            debug!(
                target: "mesh.actor.orchestrator",
                remote = %remote,
                count = buffered.len(),
                "Applying buffered candidates"
            );
        }
        for candidate in buffered {
            if let Err(e) = endpoint.add_ice_candidate(candidate).await {
                self.negotiation_failed(remote, &e);
            }
        }
    }

    // ------------------------------------------------------------------
    // Endpoint events
    // ------------------------------------------------------------------

    async fn handle_endpoint_event(&mut self, event: EndpointEvent) {
        let EndpointEvent {
            remote,
            epoch,
            kind,
        } = event;

        if self.registry.get_current_mut(&remote, epoch).is_none() {
            trace!(
                target: "mesh.actor.orchestrator",
                remote = %remote,
                epoch,
                "Dropping event from replaced endpoint"
            );
            return;
        }

        match kind {
            EndpointEventKind::CandidateDiscovered(Some(candidate)) => {
                self.send_candidate(&remote, candidate);
            }
            EndpointEventKind::CandidateDiscovered(None) => {
                trace!(target: "mesh.actor.orchestrator", remote = %remote, "Candidate gathering complete");
            }
            EndpointEventKind::TrackReceived(stream) => {
                self.handle_remote_stream(&remote, epoch, stream);
            }
            EndpointEventKind::IceStateChanged(state) => {
                self.handle_ice_state(&remote, state);
            }
            EndpointEventKind::OverallStateChanged(state) => {
                self.handle_overall_state(&remote, state);
            }
            EndpointEventKind::SignalingStateChanged(state) => {
                trace!(
                    target: "mesh.actor.orchestrator",
                    remote = %remote,
                    state = ?state,
                    "Signaling state changed"
                );
            }
        }
    }

    fn send_candidate(&mut self, remote: &SessionId, candidate: IceCandidate) {
        self.send_envelope(SignalingEnvelope::IceCandidate(CandidatePayload {
            candidate,
            route: Route::to(remote.clone()),
            from_user_id: self.local_user_id.clone(),
        }));
    }

    fn handle_remote_stream(&mut self, remote: &SessionId, epoch: u64, stream: Arc<RemoteStream>) {
        let Some(connection) = self.registry.get_current_mut(remote, epoch) else {
            return;
        };
        connection.remote_stream = Arc::downgrade(&stream);
        let user_id = connection.remote_user_id.clone();

        self.scheduler.cancel(remote, TaskKind::HealthTimer);

        // The stream can race ahead of the view entry; synthesise one.
        let participant = self
            .participants
            .entry(remote.clone())
            .or_insert_with(|| RemoteParticipant::new(user_id));
        participant.stream = Some(stream);

        info!(
            target: "mesh.actor.orchestrator",
            remote = %remote,
            "Remote stream attached"
        );
    }

    fn handle_ice_state(&mut self, remote: &SessionId, state: IceConnectionState) {
        let Some(connection) = self.registry.get_mut(remote) else {
            return;
        };
        let previous = connection.state;
        let next = ConnectionState::from(state);
        connection.state = next;

        debug!(
            target: "mesh.actor.orchestrator",
            remote = %remote,
            from = previous.as_str(),
            to = next.as_str(),
            "ICE state changed"
        );

        match next {
            ConnectionState::Connected | ConnectionState::Completed => {
                if connection.restart_attempts > 0 {
                    info!(
                        target: "mesh.actor.orchestrator",
                        remote = %remote,
                        attempts = connection.restart_attempts,
                        "Connection recovered"
                    );
                }
                connection.restart_attempts = 0;
                self.scheduler.cancel(remote, TaskKind::HealthTimer);
                self.scheduler.cancel(remote, TaskKind::IceRestart);
                self.scheduler.cancel(remote, TaskKind::Recreate);
            }
            ConnectionState::Checking => {
                connection.connection_started_at = tokio::time::Instant::now();
                self.scheduler.schedule(
                    remote,
                    TaskKind::HealthTimer,
                    self.timings.health_timeout,
                    "",
                );
            }
            ConnectionState::Failed => self.handle_ice_failed(remote),
            ConnectionState::New | ConnectionState::Disconnected | ConnectionState::Closed => {}
        }
    }

    fn handle_ice_failed(&mut self, remote: &SessionId) {
        if self.scheduler.recovery_pending(remote) {
            debug!(
                target: "mesh.actor.orchestrator",
                remote = %remote,
                "ICE failed with recovery already pending"
            );
            return;
        }
        self.scheduler.cancel(remote, TaskKind::HealthTimer);

        let Some(connection) = self.registry.get_mut(remote) else {
            return;
        };

        if connection.restart_attempts < self.timings.max_restart_attempts {
            connection.restart_attempts += 1;
            let attempt = connection.restart_attempts;
            let delay = self.timings.restart_backoff(attempt);
            warn!(
                target: "mesh.actor.orchestrator",
                remote = %remote,
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "ICE failed, scheduling restart"
            );
            self.scheduler
                .schedule(remote, TaskKind::IceRestart, delay, "");
        } else {
            warn!(
                target: "mesh.actor.orchestrator",
                remote = %remote,
                attempts = connection.restart_attempts,
                "ICE restarts exhausted, scheduling recreation"
            );
            self.scheduler.schedule(
                remote,
                TaskKind::Recreate,
                self.timings.exhausted_recreate_delay,
                metrics::REASON_ATTEMPTS_EXHAUSTED,
            );
        }
    }

    fn handle_overall_state(&mut self, remote: &SessionId, state: PeerConnectionState) {
        debug!(
            target: "mesh.actor.orchestrator",
            remote = %remote,
            state = ?state,
            "Peer state changed"
        );
        match state {
            PeerConnectionState::Connected => {
                self.scheduler.cancel(remote, TaskKind::HealthTimer);
            }
            PeerConnectionState::Failed => {
                let Some(connection) = self.registry.get(remote) else {
                    return;
                };
                if self.scheduler.recovery_pending(remote)
                    || connection.restart_attempts >= self.timings.max_restart_attempts
                {
                    return;
                }
                warn!(
                    target: "mesh.actor.orchestrator",
                    remote = %remote,
                    "Peer connection failed, scheduling recreation"
                );
                self.scheduler.schedule(
                    remote,
                    TaskKind::Recreate,
                    self.timings.peer_failed_recreate_delay,
                    metrics::REASON_PEER_FAILED,
                );
            }
            PeerConnectionState::New
            | PeerConnectionState::Connecting
            | PeerConnectionState::Disconnected
            | PeerConnectionState::Closed => {}
        }
    }

    // ------------------------------------------------------------------
    // Timers
    // ------------------------------------------------------------------

    async fn handle_timer(&mut self, remote: &SessionId, kind: TaskKind, timer_id: u64) {
        let Some(reason) = self.scheduler.take_if_current(remote, kind, timer_id) else {
            trace!(
                target: "mesh.actor.orchestrator",
                remote = %remote,
                task = %kind,
                "Stale timer firing"
            );
            return;
        };

        match kind {
            TaskKind::HealthTimer => self.handle_health_timeout(remote).await,
            TaskKind::IceRestart => self.handle_ice_restart(remote).await,
            TaskKind::Recreate => self.recreate_connection(remote, reason).await,
            TaskKind::RecreateSettle => self.handle_recreate_settled(remote, reason).await,
            TaskKind::RecreateOffer => {
                let ready = self.registry.get(remote).is_some_and(|c| {
                    c.is_initiator && c.endpoint.signaling_state() == SignalingState::Stable
                });
                if ready {
                    if let Err(e) = self.send_offer(remote, OfferKind::Recreate).await {
                        self.negotiation_failed(remote, &e);
                    }
                } else {
                    debug!(
                        target: "mesh.actor.orchestrator",
                        remote = %remote,
                        "Recreated connection already negotiating, skipping offer"
                    );
                }
            }
            TaskKind::InitialOffer => {
                if self.registry.get(remote).is_some_and(|c| c.is_initiator) {
                    if let Err(e) = self.send_offer(remote, OfferKind::Initial).await {
                        self.negotiation_failed(remote, &e);
                    }
                }
            }
        }
    }

    async fn handle_health_timeout(&mut self, remote: &SessionId) {
        let Some((state, started_at)) = self
            .registry
            .get(remote)
            .map(|c| (c.state, c.connection_started_at))
        else {
            return;
        };

        // Timer expiry alone is not proof; the attempt must really be old.
        if started_at.elapsed() < self.timings.health_timeout {
            debug!(target: "mesh.actor.orchestrator", remote = %remote, "Health timer fired early");
            return;
        }

        match state {
            ConnectionState::New
            | ConnectionState::Checking
            | ConnectionState::Disconnected
            | ConnectionState::Failed => {
                if self.scheduler.recovery_pending(remote) {
                    return;
                }
                warn!(
                    target: "mesh.actor.orchestrator",
                    remote = %remote,
                    state = state.as_str(),
                    "Connection attempt timed out"
                );
                metrics::record_health_timeout();
                self.recreate_connection(remote, metrics::REASON_HEALTH_TIMEOUT)
                    .await;
            }
            ConnectionState::Connected | ConnectionState::Completed | ConnectionState::Closed => {}
        }
    }

    async fn handle_ice_restart(&mut self, remote: &SessionId) {
        let Some(connection) = self.registry.get(remote) else {
            return;
        };
        if connection.state.is_established() {
            debug!(target: "mesh.actor.orchestrator", remote = %remote, "Recovered before restart");
            return;
        }
        let endpoint = Arc::clone(&connection.endpoint);
        let is_initiator = connection.is_initiator;
        let attempt = connection.restart_attempts;

        info!(
            target: "mesh.actor.orchestrator",
            remote = %remote,
            attempt,
            "Restarting ICE"
        );
        metrics::record_ice_restart();

        let result = match endpoint.restart_ice().await {
            Ok(()) if is_initiator => self.send_offer(remote, OfferKind::Restart).await,
            other => other,
        };

        if let Err(e) = result {
            self.negotiation_failed(remote, &e);
            self.scheduler.schedule(
                remote,
                TaskKind::Recreate,
                self.timings.restart_failure_recreate_delay,
                metrics::REASON_RESTART_FAILED,
            );
        }
    }

    /// First half of recreation: tear down, then wait for the settle delay.
    async fn recreate_connection(&mut self, remote: &SessionId, reason: &'static str) {
        self.scheduler.cancel_all_for(remote);
        self.pending_candidates.clear(remote);
        if let Some(connection) = self.registry.remove(remote) {
            close_endpoint(&connection).await;
            metrics::set_connections_active(self.registry.len());
        }

        let Some(participant) = self.participants.get_mut(remote) else {
            info!(
                target: "mesh.actor.orchestrator",
                remote = %remote,
                "Participant left, not recreating"
            );
            return;
        };
        participant.stream = None;

        warn!(
            target: "mesh.actor.orchestrator",
            remote = %remote,
            reason,
            "Recreating connection"
        );
        metrics::record_recreation(reason);
        self.scheduler.schedule(
            remote,
            TaskKind::RecreateSettle,
            self.timings.recreate_settle_delay,
            reason,
        );
    }

    /// Second half of recreation: build the new initiator endpoint.
    async fn handle_recreate_settled(&mut self, remote: &SessionId, reason: &'static str) {
        let Some(user_id) = self.participants.get(remote).map(|p| p.user_id.clone()) else {
            info!(
                target: "mesh.actor.orchestrator",
                remote = %remote,
                "Participant left during settle"
            );
            return;
        };
        if self.registry.contains(remote) {
            debug!(
                target: "mesh.actor.orchestrator",
                remote = %remote,
                "Remote rebuilt the connection first"
            );
            return;
        }

        if let Err(e) = self.create_connection(remote, &user_id, true).await {
            self.negotiation_failed(remote, &e);
            return;
        }
        debug!(target: "mesh.actor.orchestrator", remote = %remote, reason, "Connection recreated");
        self.scheduler.schedule(
            remote,
            TaskKind::RecreateOffer,
            self.timings.recreate_offer_delay,
            reason,
        );
    }

    // ------------------------------------------------------------------
    // Connection lifecycle
    // ------------------------------------------------------------------

    /// Build an endpoint for `remote`, attach local tracks, register it and
    /// arm its health timer. Any existing record is disposed first.
    async fn create_connection(
        &mut self,
        remote: &SessionId,
        user_id: &UserId,
        is_initiator: bool,
    ) -> Result<(), NegotiationError> {
        self.dispose_connection(remote).await;

        self.next_epoch += 1;
        let epoch = self.next_epoch;
        let endpoint = self
            .factory
            .create(
                remote,
                epoch,
                &self.endpoint_config,
                self.endpoint_events_tx.clone(),
            )
            .await?;

        for track in self.capture.tracks() {
            if let Err(e) = endpoint.add_track(track).await {
                self.negotiation_failed(remote, &e);
            }
        }

        let connection = ParticipantConnection::new(
            user_id.clone(),
            remote.clone(),
            endpoint,
            epoch,
            is_initiator,
        );
        if let Err(duplicate) = self.registry.insert(connection) {
            close_endpoint(&duplicate.0).await;
            return Err(NegotiationError::EndpointCreation(duplicate.to_string()));
        }

        self.scheduler
            .schedule(remote, TaskKind::HealthTimer, self.timings.health_timeout, "");
        metrics::record_connection_created();
        metrics::set_connections_active(self.registry.len());

        info!(
            target: "mesh.actor.orchestrator",
            remote = %remote,
            remote_user = %user_id,
            epoch,
            is_initiator,
            "Connection created"
        );
        Ok(())
    }

    /// Cancel timers, close and unregister the connection to `remote`.
    async fn dispose_connection(&mut self, remote: &SessionId) -> bool {
        self.scheduler.cancel_all_for(remote);
        let Some(connection) = self.registry.remove(remote) else {
            return false;
        };
        close_endpoint(&connection).await;
        metrics::set_connections_active(self.registry.len());
        debug!(
            target: "mesh.actor.orchestrator",
            remote = %remote,
            epoch = connection.epoch,
            "Connection closed"
        );
        true
    }

    async fn close_all(&mut self) -> usize {
        self.scheduler.cancel_all();
        let connections = self.registry.drain();
        let closed = connections.len();
        for connection in &connections {
            close_endpoint(connection).await;
        }
        self.participants.clear();
        self.pending_candidates.clear_all();
        metrics::set_connections_active(0);
        if closed > 0 {
            info!(target: "mesh.actor.orchestrator", closed, "All connections closed");
        }
        closed
    }

    async fn send_offer(
        &mut self,
        remote: &SessionId,
        kind: OfferKind,
    ) -> Result<(), NegotiationError> {
        let endpoint = self
            .registry
            .get(remote)
            .map(|c| Arc::clone(&c.endpoint))
            .ok_or(NegotiationError::Closed)?;

        let offer = endpoint.create_offer(kind == OfferKind::Restart).await?;
        endpoint.set_local_description(offer.clone()).await?;

        self.next_msg_seq += 1;
        let msg_id = MessageId::from_sequence(self.next_msg_seq);
        debug!(
            target: "mesh.actor.orchestrator",
            remote = %remote,
            msg_id = %msg_id,
            kind = ?kind,
            "Sending offer"
        );
        self.send_envelope(SignalingEnvelope::Offer(OfferPayload {
            offer,
            route: Route::to(remote.clone()),
            from_user_id: self.local_user_id.clone(),
            msg_id,
            is_restart: kind == OfferKind::Restart,
            is_recreate: kind == OfferKind::Recreate,
        }));
        Ok(())
    }

    fn send_envelope(&self, envelope: SignalingEnvelope) {
        if let Err(e) = self.signaling.send(envelope) {
            warn!(target: "mesh.actor.orchestrator", error = %e, "Signaling send failed");
        }
    }

    fn negotiation_failed(&self, remote: &SessionId, error: &NegotiationError) {
        warn!(
            target: "mesh.actor.orchestrator",
            remote = %remote,
            stage = error.stage(),
            error = %error,
            "Negotiation step failed"
        );
        metrics::record_negotiation_error(error.stage());
    }

    fn upsert_participant(&mut self, remote: &SessionId, user_id: &UserId) {
        self.participants
            .entry(remote.clone())
            .and_modify(|p| p.user_id = user_id.clone())
            .or_insert_with(|| RemoteParticipant::new(user_id.clone()));
    }

    // ------------------------------------------------------------------
    // Local media
    // ------------------------------------------------------------------

    async fn acquire_local_media(&mut self) -> Result<(), ClientError> {
        self.capture.acquire().await?;
        let outcome = self
            .renegotiation
            .install_all(&self.registry, &self.capture)
            .await;
        self.apply_install_outcome(outcome).await;
        Ok(())
    }

    async fn start_screen_share(&mut self) -> Result<(), ClientError> {
        let (screen, outcome) = self
            .renegotiation
            .start_screen_share(&self.registry, &mut self.capture)
            .await?;
        self.apply_install_outcome(outcome).await;

        let mailbox = self.mailbox.clone();
        tokio::spawn(async move {
            screen.ended().await;
            if let Some(sender) = mailbox.upgrade() {
                let _ = sender
                    .send(OrchestratorMessage::ScreenTrackEnded {
                        track_id: screen.id().to_string(),
                    })
                    .await;
            }
        });
        Ok(())
    }

    async fn stop_screen_share(&mut self) -> Result<(), ClientError> {
        let outcome = self
            .renegotiation
            .stop_screen_share(&self.registry, &mut self.capture)
            .await?;
        self.apply_install_outcome(outcome).await;
        Ok(())
    }

    /// Log failed installs and renegotiate where a track was added.
    async fn apply_install_outcome(&mut self, outcome: InstallOutcome) {
        for (remote, error) in &outcome.failed {
            self.negotiation_failed(remote, error);
        }
        for remote in &outcome.needs_offer {
            if let Err(e) = self.send_offer(remote, OfferKind::Initial).await {
                self.negotiation_failed(remote, &e);
            }
        }
    }

    fn snapshot(&self) -> OrchestratorState {
        let mut connections: Vec<ConnectionSnapshot> = self
            .registry
            .iter()
            .map(|c| ConnectionSnapshot {
                remote_session_id: c.remote_session_id.clone(),
                remote_user_id: c.remote_user_id.clone(),
                state: c.state,
                epoch: c.epoch,
                is_initiator: c.is_initiator,
                restart_attempts: c.restart_attempts,
                has_stream: c.remote_stream.strong_count() > 0,
                health_timer_pending: self
                    .scheduler
                    .is_pending(&c.remote_session_id, TaskKind::HealthTimer),
                recovery_pending: self.scheduler.recovery_pending(&c.remote_session_id),
            })
            .collect();
        connections.sort_by(|a, b| a.remote_session_id.cmp(&b.remote_session_id));

        let mut participants: Vec<ParticipantSnapshot> = self
            .participants
            .iter()
            .map(|(session_id, p)| ParticipantSnapshot {
                session_id: session_id.clone(),
                user_id: p.user_id.clone(),
                flags: p.flags,
                has_stream: p.stream.is_some(),
            })
            .collect();
        participants.sort_by(|a, b| a.session_id.cmp(&b.session_id));

        let live = |track: Option<Arc<LocalTrack>>| {
            track.is_some_and(|t| t.is_enabled() && !t.is_ended())
        };

        OrchestratorState {
            connections,
            participants,
            pending_tasks: self.scheduler.len(),
            local_media: LocalMediaStatus {
                active: self.capture.is_active(),
                audio_enabled: live(self.capture.audio()),
                video_enabled: live(self.capture.camera()),
                screen_sharing: self.renegotiation.is_screen_sharing(),
            },
        }
    }
}

async fn close_endpoint(connection: &ParticipantConnection) {
    if let Err(e) = connection.endpoint.close().await {
        debug!(
            target: "mesh.actor.orchestrator",
            remote = %connection.remote_session_id,
            error = %e,
            "Endpoint close failed"
        );
    }
}
