//! `SessionController` - the user's session from sign-up to leaving a room.
//!
//! Phases: `Unauthenticated -> Lobby -> InRoom -> (Leaving | Ending) -> Lobby`.
//!
//! The controller owns the inbound signaling stream. Connection-related
//! envelopes are forwarded to the orchestrator while the session is in a
//! room; chat and meeting-ended are handled here. Administrative calls go
//! to the membership service; their failures become notices and never
//! block local cleanup.

use crate::actors::messages::{
    ReconnectStep, SessionMessage, SessionNotice, SessionPhase, SessionSnapshot,
};
use crate::actors::orchestrator::OrchestratorHandle;
use crate::chat::{build_chat_message, ChatLog};
use crate::config::ConnectionTimings;
use crate::errors::ClientError;
use crate::membership::{MeetingParticipant, MembershipService};
use crate::presence::PresenceTracker;
use crate::signaling::{SignalingEvent, SignalingSender};
use common::types::{MeetingId, UserId};
use mesh_protocol::{MediaFlags, MeetingEnded, RoomMembership, SignalingEnvelope};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Mailbox size of the session controller.
const SESSION_CHANNEL_BUFFER: usize = 100;

/// Notice fan-out capacity.
const NOTICE_CHANNEL_CAPACITY: usize = 64;

/// Handle to the `SessionController`.
#[derive(Clone)]
pub struct SessionHandle {
    sender: mpsc::Sender<SessionMessage>,
    notices: broadcast::Sender<SessionNotice>,
    cancel_token: CancellationToken,
}

impl SessionHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> SessionMessage,
    ) -> Result<T, ClientError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|e| ClientError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| ClientError::Internal(format!("response receive failed: {e}")))
    }

    /// Register `username` with the membership service.
    pub async fn authenticate(&self, username: impl Into<String>) -> Result<UserId, ClientError> {
        let username = username.into();
        self.request(|respond_to| SessionMessage::Authenticate {
            username,
            respond_to,
        })
        .await?
    }

    /// Create a meeting as host and enter it.
    pub async fn create_meeting(&self, name: impl Into<String>) -> Result<MeetingId, ClientError> {
        let name = name.into();
        self.request(|respond_to| SessionMessage::CreateMeeting { name, respond_to })
            .await?
    }

    pub async fn join_meeting(&self, meeting_id: MeetingId) -> Result<(), ClientError> {
        self.request(|respond_to| SessionMessage::JoinMeeting {
            meeting_id,
            respond_to,
        })
        .await?
    }

    /// Leave the room. A host gets `HostConfirmationRequired` unless
    /// `end_for_everyone` is set.
    pub async fn leave(&self, end_for_everyone: bool) -> Result<(), ClientError> {
        self.request(|respond_to| SessionMessage::Leave {
            end_for_everyone,
            respond_to,
        })
        .await?
    }

    pub async fn set_audio_enabled(&self, enabled: bool) -> Result<(), ClientError> {
        self.request(|respond_to| SessionMessage::SetAudioEnabled {
            enabled,
            respond_to,
        })
        .await?
    }

    pub async fn set_video_enabled(&self, enabled: bool) -> Result<(), ClientError> {
        self.request(|respond_to| SessionMessage::SetVideoEnabled {
            enabled,
            respond_to,
        })
        .await?
    }

    pub async fn start_screen_share(&self) -> Result<(), ClientError> {
        self.request(|respond_to| SessionMessage::StartScreenShare { respond_to })
            .await?
    }

    pub async fn stop_screen_share(&self) -> Result<(), ClientError> {
        self.request(|respond_to| SessionMessage::StopScreenShare { respond_to })
            .await?
    }

    pub async fn send_chat(&self, text: impl Into<String>) -> Result<(), ClientError> {
        let text = text.into();
        self.request(|respond_to| SessionMessage::SendChat { text, respond_to })
            .await?
    }

    /// Open or close the chat view. Returns the unread count afterwards.
    pub async fn set_chat_open(&self, open: bool) -> Result<usize, ClientError> {
        self.request(|respond_to| SessionMessage::SetChatOpen { open, respond_to })
            .await
    }

    pub async fn force_reconnect(&self) -> Result<(), ClientError> {
        self.request(|respond_to| SessionMessage::ForceReconnect { respond_to })
            .await?
    }

    pub async fn get_state(&self) -> Result<SessionSnapshot, ClientError> {
        self.request(|respond_to| SessionMessage::GetState { respond_to })
            .await
    }

    /// Subscribe to user-visible notices.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionNotice> {
        self.notices.subscribe()
    }

    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// Everything the session controller needs from the outside.
pub struct SessionDeps {
    pub orchestrator: OrchestratorHandle,
    pub signaling: SignalingSender,
    pub signaling_events: mpsc::Receiver<SignalingEvent>,
    pub membership: Arc<dyn MembershipService>,
    pub timings: ConnectionTimings,
    pub username: String,
    /// Pre-registered user; the session starts in the lobby when set.
    pub user_id: Option<UserId>,
}

/// A pending forced-reconnect step.
struct PendingReconnect {
    timer_id: u64,
    handle: JoinHandle<()>,
}

/// The `SessionController` actor.
pub struct SessionController {
    receiver: mpsc::Receiver<SessionMessage>,
    mailbox: mpsc::WeakSender<SessionMessage>,
    cancel_token: CancellationToken,
    orchestrator: OrchestratorHandle,
    signaling: SignalingSender,
    signaling_events: mpsc::Receiver<SignalingEvent>,
    signaling_open: bool,
    membership: Arc<dyn MembershipService>,
    notices: broadcast::Sender<SessionNotice>,
    timings: ConnectionTimings,
    phase: SessionPhase,
    user_id: Option<UserId>,
    username: String,
    meeting_id: Option<MeetingId>,
    is_host: bool,
    flags: MediaFlags,
    presence: PresenceTracker,
    chat: ChatLog,
    roster: Vec<MeetingParticipant>,
    reconnect: Option<PendingReconnect>,
    next_timer_id: u64,
}

impl SessionController {
    /// Spawn the session controller.
    ///
    /// Returns a handle and the task join handle.
    pub fn spawn(
        deps: SessionDeps,
        cancel_token: CancellationToken,
    ) -> (SessionHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(SESSION_CHANNEL_BUFFER);
        let (notices, _) = broadcast::channel(NOTICE_CHANNEL_CAPACITY);

        let phase = if deps.user_id.is_some() {
            SessionPhase::Lobby
        } else {
            SessionPhase::Unauthenticated
        };
        let chat = ChatLog::new(deps.user_id.clone().unwrap_or_default());

        let actor = Self {
            receiver,
            mailbox: sender.downgrade(),
            cancel_token: cancel_token.clone(),
            orchestrator: deps.orchestrator,
            signaling: deps.signaling,
            signaling_events: deps.signaling_events,
            signaling_open: true,
            membership: deps.membership,
            notices: notices.clone(),
            timings: deps.timings,
            phase,
            user_id: deps.user_id,
            username: deps.username,
            meeting_id: None,
            is_host: false,
            flags: MediaFlags::default(),
            presence: PresenceTracker::new(),
            chat,
            roster: Vec::new(),
            reconnect: None,
            next_timer_id: 0,
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = SessionHandle {
            sender,
            notices,
            cancel_token,
        };

        (handle, task_handle)
    }

    #[instrument(skip_all, name = "mesh.actor.session", fields(username = %self.username))]
    async fn run(mut self) {
        info!(target: "mesh.actor.session", "SessionController started");

        let mut roster_poll = tokio::time::interval(self.timings.roster_poll_interval);
        roster_poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "mesh.actor.session",
                        "SessionController received cancellation signal"
                    );
                    if self.phase == SessionPhase::InRoom {
                        self.shutdown_room().await;
                    }
                    break;
                }

                _ = roster_poll.tick() => {
                    if self.phase == SessionPhase::InRoom {
                        self.refresh_roster().await;
                        self.sync_screen_share_flag().await;
                    }
                }

                event = self.signaling_events.recv(), if self.signaling_open => {
                    match event {
                        Some(event) => self.handle_signaling_event(event).await,
                        None => {
                            debug!(target: "mesh.actor.session", "Signaling event stream ended");
                            self.signaling_open = false;
                        }
                    }
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => self.handle_message(message).await,
                        None => {
                            info!(
                                target: "mesh.actor.session",
                                "SessionController channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        self.cancel_reconnect();
        info!(target: "mesh.actor.session", "SessionController stopped");
    }

    async fn handle_message(&mut self, message: SessionMessage) {
        match message {
            SessionMessage::Authenticate {
                username,
                respond_to,
            } => {
                let result = self.authenticate(username).await;
                let _ = respond_to.send(result);
            }

            SessionMessage::CreateMeeting { name, respond_to } => {
                let result = self.create_meeting(&name).await;
                let _ = respond_to.send(result);
            }

            SessionMessage::JoinMeeting {
                meeting_id,
                respond_to,
            } => {
                let result = self.join_meeting(meeting_id).await;
                let _ = respond_to.send(result);
            }

            SessionMessage::Leave {
                end_for_everyone,
                respond_to,
            } => {
                let result = self.leave(end_for_everyone).await;
                let _ = respond_to.send(result);
            }

            SessionMessage::SetAudioEnabled {
                enabled,
                respond_to,
            } => {
                let result = self.set_audio_enabled(enabled).await;
                let _ = respond_to.send(result);
            }

            SessionMessage::SetVideoEnabled {
                enabled,
                respond_to,
            } => {
                let result = self.set_video_enabled(enabled).await;
                let _ = respond_to.send(result);
            }

            SessionMessage::StartScreenShare { respond_to } => {
                let result = self.set_screen_share(true).await;
                let _ = respond_to.send(result);
            }

            SessionMessage::StopScreenShare { respond_to } => {
                let result = self.set_screen_share(false).await;
                let _ = respond_to.send(result);
            }

            SessionMessage::SendChat { text, respond_to } => {
                let result = self.send_chat(&text);
                let _ = respond_to.send(result);
            }

            SessionMessage::SetChatOpen { open, respond_to } => {
                self.chat.set_open(open);
                let _ = respond_to.send(self.chat.unread());
            }

            SessionMessage::ForceReconnect { respond_to } => {
                let result = self.force_reconnect().await;
                let _ = respond_to.send(result);
            }

            SessionMessage::GetState { respond_to } => {
                let _ = respond_to.send(self.snapshot());
            }

            SessionMessage::ReconnectStepDue { step, timer_id } => {
                self.handle_reconnect_step(step, timer_id);
            }
        }
    }

    // ------------------------------------------------------------------
    // Lobby
    // ------------------------------------------------------------------

    async fn authenticate(&mut self, username: String) -> Result<UserId, ClientError> {
        if self.phase != SessionPhase::Unauthenticated {
            return Err(ClientError::InvalidState("already signed in".to_string()));
        }
        let user_id = self.membership.create_user(&username).await?;
        info!(target: "mesh.actor.session", user_id = %user_id, "Signed in");

        self.chat = ChatLog::new(user_id.clone());
        self.user_id = Some(user_id.clone());
        self.username = username;
        self.phase = SessionPhase::Lobby;
        Ok(user_id)
    }

    fn require_lobby(&self) -> Result<UserId, ClientError> {
        match (&self.phase, &self.user_id) {
            (SessionPhase::Lobby, Some(user_id)) => Ok(user_id.clone()),
            _ => Err(ClientError::InvalidState(format!(
                "expected lobby, session is {:?}",
                self.phase
            ))),
        }
    }

    fn require_room(&self) -> Result<(MeetingId, UserId), ClientError> {
        match (&self.phase, &self.meeting_id, &self.user_id) {
            (SessionPhase::InRoom, Some(meeting_id), Some(user_id)) => {
                Ok((meeting_id.clone(), user_id.clone()))
            }
            _ => Err(ClientError::InvalidState("not in a meeting".to_string())),
        }
    }

    async fn create_meeting(&mut self, name: &str) -> Result<MeetingId, ClientError> {
        let user_id = self.require_lobby()?;
        let meeting_id = self.membership.create_meeting(&user_id, name).await?;
        info!(target: "mesh.actor.session", meeting_id = %meeting_id, "Meeting created");

        self.is_host = true;
        self.enter_room(meeting_id.clone(), user_id).await;
        Ok(meeting_id)
    }

    async fn join_meeting(&mut self, meeting_id: MeetingId) -> Result<(), ClientError> {
        let user_id = self.require_lobby()?;
        self.membership.join_meeting(&meeting_id, &user_id).await?;

        self.is_host = match self.membership.is_host(&meeting_id, &user_id).await {
            Ok(is_host) => is_host,
            Err(e) => {
                warn!(target: "mesh.actor.session", error = %e, "Host lookup failed");
                false
            }
        };
        self.enter_room(meeting_id, user_id).await;
        Ok(())
    }

    /// Acquire media, announce ourselves to the room, publish our status.
    async fn enter_room(&mut self, meeting_id: MeetingId, user_id: UserId) {
        self.meeting_id = Some(meeting_id.clone());
        self.phase = SessionPhase::InRoom;
        self.flags = MediaFlags::default();
        self.presence.reset();
        self.chat.clear();

        if let Err(e) = self.orchestrator.set_local_user(user_id.clone()).await {
            warn!(target: "mesh.actor.session", error = %e, "Orchestrator unavailable");
        }
        self.acquire_media().await;

        info!(
            target: "mesh.actor.session",
            meeting_id = %meeting_id,
            is_host = self.is_host,
            "Entering meeting"
        );
        self.send_envelope(SignalingEnvelope::Join(RoomMembership {
            room: meeting_id,
            user_id,
        }));
        self.publish_status();
        self.refresh_roster().await;
    }

    /// Capture local media. On failure the session continues receive-only.
    async fn acquire_media(&mut self) {
        match self.orchestrator.acquire_local_media().await {
            Ok(()) => {}
            Err(ClientError::Capture(e)) => {
                warn!(target: "mesh.actor.session", error = %e, "Local media unavailable");
                self.flags.is_muted = true;
                self.flags.is_video_off = true;
                self.notify(SessionNotice::CaptureUnavailable {
                    message: e.notice(),
                });
            }
            Err(e) => {
                warn!(target: "mesh.actor.session", error = %e, "Local media request failed");
            }
        }
    }

    // ------------------------------------------------------------------
    // Leaving
    // ------------------------------------------------------------------

    async fn leave(&mut self, end_for_everyone: bool) -> Result<(), ClientError> {
        let (meeting_id, user_id) = self.require_room()?;
        if self.is_host && !end_for_everyone {
            return Err(ClientError::HostConfirmationRequired);
        }

        let ending = self.is_host;
        self.phase = if ending {
            SessionPhase::Ending
        } else {
            SessionPhase::Leaving
        };
        info!(
            target: "mesh.actor.session",
            meeting_id = %meeting_id,
            ending,
            "Leaving meeting"
        );

        self.teardown_media().await;

        let membership = RoomMembership {
            room: meeting_id.clone(),
            user_id: user_id.clone(),
        };
        let result = if ending {
            self.send_envelope(SignalingEnvelope::EndMeeting(membership));
            self.membership.end_meeting(&meeting_id, &user_id).await
        } else {
            self.send_envelope(SignalingEnvelope::Leave(membership));
            self.membership.leave_meeting(&meeting_id, &user_id).await
        };
        if let Err(e) = result {
            warn!(target: "mesh.actor.session", error = %e, "Membership update failed");
            self.notify(SessionNotice::AdministrativeFailure {
                message: ClientError::from(e).client_message(),
            });
        }

        self.return_to_lobby();
        if ending {
            self.notify(SessionNotice::MeetingEnded);
        }
        Ok(())
    }

    async fn handle_meeting_ended(&mut self, ended: &MeetingEnded) {
        if self.phase != SessionPhase::InRoom
            || self.meeting_id.as_ref() != Some(&ended.meeting_id)
        {
            debug!(
                target: "mesh.actor.session",
                meeting_id = %ended.meeting_id,
                phase = ?self.phase,
                "Ignoring meeting-ended"
            );
            return;
        }

        info!(
            target: "mesh.actor.session",
            meeting_id = %ended.meeting_id,
            "Meeting ended by host"
        );
        self.teardown_media().await;
        self.return_to_lobby();
        self.notify(SessionNotice::MeetingEndedByHost);
    }

    /// Leave on shutdown. The host leaves without ending the meeting.
    async fn shutdown_room(&mut self) {
        let Ok((meeting_id, user_id)) = self.require_room() else {
            return;
        };
        self.teardown_media().await;
        self.send_envelope(SignalingEnvelope::Leave(RoomMembership {
            room: meeting_id.clone(),
            user_id: user_id.clone(),
        }));
        if let Err(e) = self.membership.leave_meeting(&meeting_id, &user_id).await {
            warn!(target: "mesh.actor.session", error = %e, "Membership update failed");
        }
        self.return_to_lobby();
    }

    async fn teardown_media(&mut self) {
        match self.orchestrator.close_all().await {
            Ok(closed) => {
                debug!(target: "mesh.actor.session", closed, "Connections closed");
            }
            Err(e) => {
                warn!(target: "mesh.actor.session", error = %e, "Connection teardown failed");
            }
        }
        if let Err(e) = self.orchestrator.stop_local_media().await {
            warn!(target: "mesh.actor.session", error = %e, "Local media stop failed");
        }
    }

    fn return_to_lobby(&mut self) {
        self.cancel_reconnect();
        self.phase = SessionPhase::Lobby;
        self.meeting_id = None;
        self.is_host = false;
        self.flags = MediaFlags::default();
        self.presence.reset();
        self.roster.clear();
    }

    // ------------------------------------------------------------------
    // Media controls
    // ------------------------------------------------------------------

    async fn set_audio_enabled(&mut self, enabled: bool) -> Result<(), ClientError> {
        self.require_room()?;
        self.orchestrator.set_audio_enabled(enabled).await?;
        self.flags.is_muted = !enabled;
        self.publish_status();
        Ok(())
    }

    async fn set_video_enabled(&mut self, enabled: bool) -> Result<(), ClientError> {
        self.require_room()?;
        self.orchestrator.set_video_enabled(enabled).await?;
        self.flags.is_video_off = !enabled;
        self.publish_status();
        Ok(())
    }

    async fn set_screen_share(&mut self, sharing: bool) -> Result<(), ClientError> {
        self.require_room()?;
        if sharing {
            self.orchestrator.start_screen_share().await?;
        } else {
            self.orchestrator.stop_screen_share().await?;
        }
        self.flags.is_screen_sharing = sharing;
        self.publish_status();
        Ok(())
    }

    /// A screen share can end outside our control; pick that up.
    async fn sync_screen_share_flag(&mut self) {
        let Ok(state) = self.orchestrator.get_state().await else {
            return;
        };
        if state.local_media.screen_sharing != self.flags.is_screen_sharing {
            self.flags.is_screen_sharing = state.local_media.screen_sharing;
            self.publish_status();
        }
    }

    fn publish_status(&mut self) {
        let (Some(meeting_id), Some(user_id)) = (&self.meeting_id, &self.user_id) else {
            return;
        };
        if let Some(envelope) = self.presence.update(meeting_id, user_id, self.flags) {
            self.send_envelope(envelope);
        }
    }

    // ------------------------------------------------------------------
    // Chat
    // ------------------------------------------------------------------

    fn send_chat(&mut self, text: &str) -> Result<(), ClientError> {
        let (meeting_id, user_id) = self.require_room()?;
        let text = text.trim();
        if text.is_empty() {
            return Err(ClientError::InvalidState("empty chat message".to_string()));
        }
        let envelope =
            build_chat_message(&meeting_id, &user_id, &self.username, text, chrono::Utc::now());
        self.signaling.send(envelope)
    }

    // ------------------------------------------------------------------
    // Signaling
    // ------------------------------------------------------------------

    async fn handle_signaling_event(&mut self, event: SignalingEvent) {
        match event {
            SignalingEvent::Envelope(envelope) => self.handle_envelope(envelope).await,

            SignalingEvent::Reconnected => {
                if self.phase != SessionPhase::InRoom {
                    return;
                }
                info!(target: "mesh.actor.session", "Signaling reconnected, re-joining room");
                // Our session id changed; every peer will offer afresh.
                if let Err(e) = self.orchestrator.close_all().await {
                    warn!(target: "mesh.actor.session", error = %e, "Connection teardown failed");
                }
                self.send_join();
                self.presence.reset();
                self.publish_status();
            }

            SignalingEvent::Closed => {
                warn!(target: "mesh.actor.session", "Signaling lost");
                self.signaling_open = false;
                self.notify(SessionNotice::SignalingLost);
            }
        }
    }

    async fn handle_envelope(&mut self, envelope: SignalingEnvelope) {
        match envelope {
            SignalingEnvelope::MeetingEnded(ended) => self.handle_meeting_ended(&ended).await,

            SignalingEnvelope::ChatMessage(chat) => {
                if self.phase == SessionPhase::InRoom {
                    self.chat.push(chat.clone());
                    self.notify(SessionNotice::ChatReceived(chat));
                }
            }

            SignalingEnvelope::Error(error) => {
                warn!(target: "mesh.actor.session", message = %error.message, "Relay error");
            }

            envelope @ (SignalingEnvelope::UserJoined(_)
            | SignalingEnvelope::UserLeft(_)
            | SignalingEnvelope::ExistingParticipants(_)
            | SignalingEnvelope::Offer(_)
            | SignalingEnvelope::Answer(_)
            | SignalingEnvelope::IceCandidate(_)
            | SignalingEnvelope::MediaStatusChanged(_)) => {
                if self.phase != SessionPhase::InRoom {
                    debug!(
                        target: "mesh.actor.session",
                        kind = %envelope.kind(),
                        "Ignoring envelope outside a meeting"
                    );
                    return;
                }
                if let Err(e) = self.orchestrator.signaling(envelope).await {
                    warn!(target: "mesh.actor.session", error = %e, "Orchestrator unavailable");
                }
            }

            other => {
                debug!(
                    target: "mesh.actor.session",
                    kind = %other.kind(),
                    "Ignoring client-bound envelope"
                );
            }
        }
    }

    fn send_join(&self) {
        if let (Some(room), Some(user_id)) = (&self.meeting_id, &self.user_id) {
            self.send_envelope(SignalingEnvelope::Join(RoomMembership {
                room: room.clone(),
                user_id: user_id.clone(),
            }));
        }
    }

    /// Drop every connection and restart local media, then `leave` and
    /// `join` again after the reconnect delays.
    async fn force_reconnect(&mut self) -> Result<(), ClientError> {
        let (meeting_id, _) = self.require_room()?;
        info!(target: "mesh.actor.session", meeting_id = %meeting_id, "Forcing reconnect");

        self.teardown_media().await;
        self.flags.is_muted = false;
        self.flags.is_video_off = false;
        self.flags.is_screen_sharing = false;
        self.acquire_media().await;

        self.schedule_reconnect_step(ReconnectStep::SendLeave, self.timings.reconnect_leave_delay);
        Ok(())
    }

    /// Arm the next reconnect step, replacing any pending one.
    fn schedule_reconnect_step(&mut self, step: ReconnectStep, delay: Duration) {
        self.cancel_reconnect();
        self.next_timer_id += 1;
        let timer_id = self.next_timer_id;

        let mailbox = self.mailbox.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(sender) = mailbox.upgrade() {
                let _ = sender
                    .send(SessionMessage::ReconnectStepDue { step, timer_id })
                    .await;
            }
        });
        self.reconnect = Some(PendingReconnect { timer_id, handle });
    }

    fn cancel_reconnect(&mut self) {
        if let Some(pending) = self.reconnect.take() {
            pending.handle.abort();
        }
    }

    fn handle_reconnect_step(&mut self, step: ReconnectStep, timer_id: u64) {
        if self.reconnect.as_ref().map(|p| p.timer_id) != Some(timer_id) {
            debug!(target: "mesh.actor.session", ?step, timer_id, "Stale reconnect step");
            return;
        }
        self.reconnect = None;

        let Ok((meeting_id, user_id)) = self.require_room() else {
            debug!(
                target: "mesh.actor.session",
                ?step,
                phase = ?self.phase,
                "Reconnect step outside a meeting, dropped"
            );
            return;
        };

        match step {
            ReconnectStep::SendLeave => {
                self.send_envelope(SignalingEnvelope::Leave(RoomMembership {
                    room: meeting_id,
                    user_id,
                }));
                self.schedule_reconnect_step(
                    ReconnectStep::SendJoin,
                    self.timings.reconnect_join_delay,
                );
            }
            ReconnectStep::SendJoin => {
                self.send_join();
                self.presence.reset();
                self.publish_status();
            }
        }
    }

    async fn refresh_roster(&mut self) {
        let Some(meeting_id) = self.meeting_id.clone() else {
            return;
        };
        match self.membership.get_participants(&meeting_id).await {
            Ok(roster) => {
                if roster != self.roster {
                    debug!(
                        target: "mesh.actor.session",
                        participants = roster.len(),
                        "Roster updated"
                    );
                    self.roster.clone_from(&roster);
                    self.notify(SessionNotice::RosterUpdated(roster));
                }
            }
            Err(e) => {
                warn!(target: "mesh.actor.session", error = %e, "Roster refresh failed");
            }
        }
    }

    fn send_envelope(&self, envelope: SignalingEnvelope) {
        if let Err(e) = self.signaling.send(envelope) {
            warn!(target: "mesh.actor.session", error = %e, "Signaling send failed");
        }
    }

    fn notify(&self, notice: SessionNotice) {
        // No subscribers is fine.
        let _ = self.notices.send(notice);
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            phase: self.phase,
            user_id: self.user_id.clone(),
            username: self.username.clone(),
            meeting_id: self.meeting_id.clone(),
            is_host: self.is_host,
            flags: self.flags,
            roster: self.roster.clone(),
            chat_messages: self.chat.messages().len(),
            unread_chat: self.chat.unread(),
        }
    }
}
