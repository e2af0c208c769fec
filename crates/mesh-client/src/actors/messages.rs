//! Message types for actor communication.
//!
//! Inter-actor communication uses `tokio::sync::mpsc`; request/reply uses a
//! `tokio::sync::oneshot` `respond_to` channel.

use crate::actors::registry::ConnectionState;
use crate::actors::scheduler::TaskKind;
use crate::errors::ClientError;
use crate::membership::MeetingParticipant;
use common::types::{MeetingId, SessionId, UserId};
use mesh_protocol::{ChatPayload, MediaFlags, SignalingEnvelope};
use tokio::sync::oneshot;

/// Messages sent to the `ConnectionOrchestrator`.
#[derive(Debug)]
pub enum OrchestratorMessage {
    /// Connection-related envelope from the relay.
    Signaling { envelope: SignalingEnvelope },

    /// Identity used as `fromUserId` on outbound negotiation envelopes.
    SetLocalUser { user_id: UserId },

    /// Acquire microphone and camera and install them on live connections.
    AcquireLocalMedia {
        respond_to: oneshot::Sender<Result<(), ClientError>>,
    },

    /// Stop every local track.
    StopLocalMedia { respond_to: oneshot::Sender<()> },

    SetAudioEnabled {
        enabled: bool,
        respond_to: oneshot::Sender<Result<(), ClientError>>,
    },

    SetVideoEnabled {
        enabled: bool,
        respond_to: oneshot::Sender<Result<(), ClientError>>,
    },

    StartScreenShare {
        respond_to: oneshot::Sender<Result<(), ClientError>>,
    },

    StopScreenShare {
        respond_to: oneshot::Sender<Result<(), ClientError>>,
    },

    /// A screen track ended without `StopScreenShare`.
    ScreenTrackEnded { track_id: String },

    /// Cancel all timers, close all endpoints, clear the registry.
    /// Replies with the number of connections closed.
    CloseAll { respond_to: oneshot::Sender<usize> },

    GetState {
        respond_to: oneshot::Sender<OrchestratorState>,
    },

    /// A scheduled task fired.
    TimerFired {
        remote: SessionId,
        kind: TaskKind,
        timer_id: u64,
    },
}

/// Snapshot of one participant connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSnapshot {
    pub remote_session_id: SessionId,
    pub remote_user_id: UserId,
    pub state: ConnectionState,
    pub epoch: u64,
    pub is_initiator: bool,
    pub restart_attempts: u32,
    pub has_stream: bool,
    pub health_timer_pending: bool,
    pub recovery_pending: bool,
}

/// Snapshot of one remote participant in the membership view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantSnapshot {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub flags: MediaFlags,
    pub has_stream: bool,
}

/// Local capture status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LocalMediaStatus {
    pub active: bool,
    pub audio_enabled: bool,
    pub video_enabled: bool,
    pub screen_sharing: bool,
}

/// Orchestrator state (for inspection and tests).
#[derive(Debug, Clone, Default)]
pub struct OrchestratorState {
    pub connections: Vec<ConnectionSnapshot>,
    pub participants: Vec<ParticipantSnapshot>,
    pub pending_tasks: usize,
    pub local_media: LocalMediaStatus,
}

impl OrchestratorState {
    #[must_use]
    pub fn connection(&self, remote: &SessionId) -> Option<&ConnectionSnapshot> {
        self.connections
            .iter()
            .find(|c| &c.remote_session_id == remote)
    }

    #[must_use]
    pub fn participant(&self, remote: &SessionId) -> Option<&ParticipantSnapshot> {
        self.participants.iter().find(|p| &p.session_id == remote)
    }
}

/// Session Controller lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Unauthenticated,
    Lobby,
    InRoom,
    Leaving,
    Ending,
}

/// User-visible notices published by the Session Controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionNotice {
    /// Local media could not be captured; the session continues without it.
    CaptureUnavailable { message: String },
    /// A membership service call failed; local cleanup still happened.
    AdministrativeFailure { message: String },
    /// The local host ended the meeting.
    MeetingEnded,
    /// Another participant (the host) ended the meeting.
    MeetingEndedByHost,
    /// Signaling could not be re-established.
    SignalingLost,
    RosterUpdated(Vec<MeetingParticipant>),
    ChatReceived(ChatPayload),
}

/// Delayed steps of a forced reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectStep {
    SendLeave,
    SendJoin,
}

/// Messages sent to the `SessionController`.
#[derive(Debug)]
pub enum SessionMessage {
    /// Register a user (UNAUTHENTICATED -> LOBBY).
    Authenticate {
        username: String,
        respond_to: oneshot::Sender<Result<UserId, ClientError>>,
    },

    /// Create a meeting as host and enter it.
    CreateMeeting {
        name: String,
        respond_to: oneshot::Sender<Result<MeetingId, ClientError>>,
    },

    JoinMeeting {
        meeting_id: MeetingId,
        respond_to: oneshot::Sender<Result<(), ClientError>>,
    },

    /// Leave the room. A host must pass `end_for_everyone`.
    Leave {
        end_for_everyone: bool,
        respond_to: oneshot::Sender<Result<(), ClientError>>,
    },

    SetAudioEnabled {
        enabled: bool,
        respond_to: oneshot::Sender<Result<(), ClientError>>,
    },

    SetVideoEnabled {
        enabled: bool,
        respond_to: oneshot::Sender<Result<(), ClientError>>,
    },

    StartScreenShare {
        respond_to: oneshot::Sender<Result<(), ClientError>>,
    },

    StopScreenShare {
        respond_to: oneshot::Sender<Result<(), ClientError>>,
    },

    SendChat {
        text: String,
        respond_to: oneshot::Sender<Result<(), ClientError>>,
    },

    /// Mark the chat view open or closed. Replies with the unread count.
    SetChatOpen {
        open: bool,
        respond_to: oneshot::Sender<usize>,
    },

    /// Tear down every connection and re-join the room.
    ForceReconnect {
        respond_to: oneshot::Sender<Result<(), ClientError>>,
    },

    GetState {
        respond_to: oneshot::Sender<SessionSnapshot>,
    },

    /// A forced-reconnect delay elapsed. Stale `timer_id`s are ignored.
    ReconnectStepDue { step: ReconnectStep, timer_id: u64 },
}

/// Session Controller state (for inspection and tests).
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub phase: SessionPhase,
    pub user_id: Option<UserId>,
    pub username: String,
    pub meeting_id: Option<MeetingId>,
    pub is_host: bool,
    pub flags: MediaFlags,
    pub roster: Vec<MeetingParticipant>,
    pub chat_messages: usize,
    pub unread_chat: usize,
}
