//! Signaling envelopes.
//!
//! `SignalingEnvelope` is the closed set of messages exchanged between a
//! client and the relay. The relay only routes envelopes; it never looks
//! inside SDP or candidate payloads.
//!
//! Targeted envelopes (`offer`, `answer`, `ice-candidate`) are sent by a
//! client with `targetSocket` set. On delivery the relay clears the target
//! and sets `fromSocket` to the sender's session id, see
//! [`SignalingEnvelope::into_delivered`].

use crate::sdp::{IceCandidate, SessionDescription};
use common::types::{MeetingId, SessionId, UserId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Correlates an answer with the offer it responds to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub String);

impl MessageId {
    /// Build an id from a locally assigned sequence number.
    #[must_use]
    pub fn from_sequence(seq: u64) -> Self {
        Self(seq.to_string())
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// `join`, `leave` and `end-meeting` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomMembership {
    pub room: MeetingId,
    pub user_id: UserId,
}

/// `user-joined` / `user-left` payload and one entry of `existing-participants`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerAnnouncement {
    pub user_id: UserId,
    pub socket_id: SessionId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExistingParticipants {
    pub participants: Vec<PeerAnnouncement>,
    /// The joiner's own socket id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub socket_id: Option<SessionId>,
}

/// Routing fields shared by the targeted envelopes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Route {
    /// Set by the sending client.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_socket: Option<SessionId>,
    /// Set by the relay on delivery.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_socket: Option<SessionId>,
}

impl Route {
    #[must_use]
    pub fn to(target: SessionId) -> Self {
        Self {
            target_socket: Some(target),
            from_socket: None,
        }
    }
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_false(v: &bool) -> bool {
    !*v
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferPayload {
    pub offer: SessionDescription,
    #[serde(flatten)]
    pub route: Route,
    pub from_user_id: UserId,
    pub msg_id: MessageId,
    /// Offer produced by an ICE restart.
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_restart: bool,
    /// Offer produced after the sender rebuilt its endpoint.
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_recreate: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerPayload {
    pub answer: SessionDescription,
    #[serde(flatten)]
    pub route: Route,
    pub from_user_id: UserId,
    pub msg_id: MessageId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidatePayload {
    pub candidate: IceCandidate,
    #[serde(flatten)]
    pub route: Route,
    pub from_user_id: UserId,
}

/// Local media flags as a participant publishes them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaFlags {
    #[serde(default)]
    pub is_muted: bool,
    #[serde(default)]
    pub is_video_off: bool,
    #[serde(default)]
    pub is_screen_sharing: bool,
}

/// `media-status-update` (client to relay).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaStatusUpdate {
    pub room: MeetingId,
    pub user_id: UserId,
    #[serde(flatten)]
    pub flags: MediaFlags,
}

/// `media-status-changed` (relay to the other room members).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaStatusChanged {
    pub user_id: UserId,
    pub socket_id: SessionId,
    #[serde(flatten)]
    pub flags: MediaFlags,
}

/// One chat line. `timestamp` is RFC 3339.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatPayload {
    pub id: String,
    pub user_id: UserId,
    pub username: String,
    pub message: String,
    pub timestamp: String,
}

/// `send-chat-message` (client to relay).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundChat {
    pub room: MeetingId,
    #[serde(flatten)]
    pub chat: ChatPayload,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeetingEnded {
    pub meeting_id: MeetingId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
}

/// A single signaling message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum SignalingEnvelope {
    Join(RoomMembership),
    Leave(RoomMembership),
    UserJoined(PeerAnnouncement),
    UserLeft(PeerAnnouncement),
    ExistingParticipants(ExistingParticipants),
    Offer(OfferPayload),
    Answer(AnswerPayload),
    IceCandidate(CandidatePayload),
    MediaStatusUpdate(MediaStatusUpdate),
    MediaStatusChanged(MediaStatusChanged),
    SendChatMessage(OutboundChat),
    ChatMessage(ChatPayload),
    EndMeeting(RoomMembership),
    MeetingEnded(MeetingEnded),
    Error(ErrorPayload),
}

/// Envelope discriminant, used for logging and bounded metric labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnvelopeKind {
    Join,
    Leave,
    UserJoined,
    UserLeft,
    ExistingParticipants,
    Offer,
    Answer,
    IceCandidate,
    MediaStatusUpdate,
    MediaStatusChanged,
    SendChatMessage,
    ChatMessage,
    EndMeeting,
    MeetingEnded,
    Error,
}

impl EnvelopeKind {
    pub const ALL: [EnvelopeKind; 15] = [
        EnvelopeKind::Join,
        EnvelopeKind::Leave,
        EnvelopeKind::UserJoined,
        EnvelopeKind::UserLeft,
        EnvelopeKind::ExistingParticipants,
        EnvelopeKind::Offer,
        EnvelopeKind::Answer,
        EnvelopeKind::IceCandidate,
        EnvelopeKind::MediaStatusUpdate,
        EnvelopeKind::MediaStatusChanged,
        EnvelopeKind::SendChatMessage,
        EnvelopeKind::ChatMessage,
        EnvelopeKind::EndMeeting,
        EnvelopeKind::MeetingEnded,
        EnvelopeKind::Error,
    ];

    /// Wire name of the event.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            EnvelopeKind::Join => "join",
            EnvelopeKind::Leave => "leave",
            EnvelopeKind::UserJoined => "user-joined",
            EnvelopeKind::UserLeft => "user-left",
            EnvelopeKind::ExistingParticipants => "existing-participants",
            EnvelopeKind::Offer => "offer",
            EnvelopeKind::Answer => "answer",
            EnvelopeKind::IceCandidate => "ice-candidate",
            EnvelopeKind::MediaStatusUpdate => "media-status-update",
            EnvelopeKind::MediaStatusChanged => "media-status-changed",
            EnvelopeKind::SendChatMessage => "send-chat-message",
            EnvelopeKind::ChatMessage => "chat-message",
            EnvelopeKind::EndMeeting => "end-meeting",
            EnvelopeKind::MeetingEnded => "meeting-ended",
            EnvelopeKind::Error => "error",
        }
    }

    /// Look up a kind by its wire name.
    #[must_use]
    pub fn from_event(event: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == event)
    }
}

impl fmt::Display for EnvelopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl SignalingEnvelope {
    #[must_use]
    pub fn kind(&self) -> EnvelopeKind {
        match self {
            SignalingEnvelope::Join(_) => EnvelopeKind::Join,
            SignalingEnvelope::Leave(_) => EnvelopeKind::Leave,
            SignalingEnvelope::UserJoined(_) => EnvelopeKind::UserJoined,
            SignalingEnvelope::UserLeft(_) => EnvelopeKind::UserLeft,
            SignalingEnvelope::ExistingParticipants(_) => EnvelopeKind::ExistingParticipants,
            SignalingEnvelope::Offer(_) => EnvelopeKind::Offer,
            SignalingEnvelope::Answer(_) => EnvelopeKind::Answer,
            SignalingEnvelope::IceCandidate(_) => EnvelopeKind::IceCandidate,
            SignalingEnvelope::MediaStatusUpdate(_) => EnvelopeKind::MediaStatusUpdate,
            SignalingEnvelope::MediaStatusChanged(_) => EnvelopeKind::MediaStatusChanged,
            SignalingEnvelope::SendChatMessage(_) => EnvelopeKind::SendChatMessage,
            SignalingEnvelope::ChatMessage(_) => EnvelopeKind::ChatMessage,
            SignalingEnvelope::EndMeeting(_) => EnvelopeKind::EndMeeting,
            SignalingEnvelope::MeetingEnded(_) => EnvelopeKind::MeetingEnded,
            SignalingEnvelope::Error(_) => EnvelopeKind::Error,
        }
    }

    fn route(&self) -> Option<&Route> {
        match self {
            SignalingEnvelope::Offer(p) => Some(&p.route),
            SignalingEnvelope::Answer(p) => Some(&p.route),
            SignalingEnvelope::IceCandidate(p) => Some(&p.route),
            _ => None,
        }
    }

    fn route_mut(&mut self) -> Option<&mut Route> {
        match self {
            SignalingEnvelope::Offer(p) => Some(&mut p.route),
            SignalingEnvelope::Answer(p) => Some(&mut p.route),
            SignalingEnvelope::IceCandidate(p) => Some(&mut p.route),
            _ => None,
        }
    }

    /// Session the sender addressed this envelope to, for targeted kinds.
    #[must_use]
    pub fn target_socket(&self) -> Option<&SessionId> {
        self.route().and_then(|r| r.target_socket.as_ref())
    }

    /// Session the relay stamped as the sender, for targeted kinds.
    #[must_use]
    pub fn from_socket(&self) -> Option<&SessionId> {
        self.route().and_then(|r| r.from_socket.as_ref())
    }

    /// Rewrite client routing into delivery routing: the target is cleared
    /// and `fromSocket` is set to `sender`. Non-targeted envelopes are
    /// returned unchanged.
    #[must_use]
    pub fn into_delivered(mut self, sender: SessionId) -> Self {
        if let Some(route) = self.route_mut() {
            route.target_socket = None;
            route.from_socket = Some(sender);
        }
        self
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_join_wire_shape() {
        let env = SignalingEnvelope::Join(RoomMembership {
            room: MeetingId::from("m-1"),
            user_id: UserId::from("alice"),
        });
        let value = serde_json::to_value(&env).unwrap();
        assert_eq!(
            value,
            json!({"event": "join", "data": {"room": "m-1", "userId": "alice"}})
        );
    }

    #[test]
    fn test_offer_flags_are_omitted_when_false() {
        let env = SignalingEnvelope::Offer(OfferPayload {
            offer: SessionDescription::offer("v=0"),
            route: Route::to(SessionId::from("sock-b")),
            from_user_id: UserId::from("alice"),
            msg_id: MessageId::from_sequence(7),
            is_restart: false,
            is_recreate: false,
        });
        let value = serde_json::to_value(&env).unwrap();
        assert_eq!(value["event"], "offer");
        assert_eq!(value["data"]["targetSocket"], "sock-b");
        assert_eq!(value["data"]["msgId"], "7");
        assert!(value["data"].get("isRestart").is_none());
        assert!(value["data"].get("fromSocket").is_none());
    }

    #[test]
    fn test_restart_offer_from_browser_client() {
        let value = json!({
            "event": "offer",
            "data": {
                "offer": {"type": "offer", "sdp": "v=0"},
                "fromSocket": "sock-a",
                "fromUserId": "alice",
                "msgId": "1700000000000",
                "isRestart": true
            }
        });
        let env: SignalingEnvelope = serde_json::from_value(value).unwrap();
        match &env {
            SignalingEnvelope::Offer(p) => {
                assert!(p.is_restart);
                assert!(!p.is_recreate);
            }
            other => panic!("unexpected envelope {other:?}"),
        }
        assert_eq!(env.from_socket(), Some(&SessionId::from("sock-a")));
    }

    #[test]
    fn test_into_delivered_rewrites_route() {
        let env = SignalingEnvelope::IceCandidate(CandidatePayload {
            candidate: IceCandidate::new("candidate:1"),
            route: Route::to(SessionId::from("sock-b")),
            from_user_id: UserId::from("alice"),
        });
        assert_eq!(env.target_socket(), Some(&SessionId::from("sock-b")));

        let delivered = env.into_delivered(SessionId::from("sock-a"));
        assert!(delivered.target_socket().is_none());
        assert_eq!(delivered.from_socket(), Some(&SessionId::from("sock-a")));
    }

    #[test]
    fn test_into_delivered_ignores_untargeted() {
        let env = SignalingEnvelope::UserLeft(PeerAnnouncement {
            user_id: UserId::from("bob"),
            socket_id: SessionId::from("sock-b"),
        });
        let same = env.clone().into_delivered(SessionId::from("sock-a"));
        assert_eq!(env, same);
    }

    #[test]
    fn test_media_status_defaults_screen_sharing() {
        let value = json!({
            "event": "media-status-update",
            "data": {"room": "m-1", "userId": "bob", "isMuted": true, "isVideoOff": false}
        });
        let env: SignalingEnvelope = serde_json::from_value(value).unwrap();
        let SignalingEnvelope::MediaStatusUpdate(update) = env else {
            panic!("wrong kind");
        };
        assert!(update.flags.is_muted);
        assert!(!update.flags.is_screen_sharing);
    }

    #[test]
    fn test_send_chat_flattens_message() {
        let env = SignalingEnvelope::SendChatMessage(OutboundChat {
            room: MeetingId::from("m-1"),
            chat: ChatPayload {
                id: "1-abc".to_string(),
                user_id: UserId::from("alice"),
                username: "Alice".to_string(),
                message: "hi".to_string(),
                timestamp: "2024-01-01T00:00:00Z".to_string(),
            },
        });
        let value = serde_json::to_value(&env).unwrap();
        assert_eq!(value["event"], "send-chat-message");
        assert_eq!(value["data"]["room"], "m-1");
        assert_eq!(value["data"]["message"], "hi");
    }

    #[test]
    fn test_kind_names_round_trip() {
        for kind in EnvelopeKind::ALL {
            assert_eq!(EnvelopeKind::from_event(kind.as_str()), Some(kind));
        }
        assert_eq!(EnvelopeKind::from_event("connected"), None);
    }
}
