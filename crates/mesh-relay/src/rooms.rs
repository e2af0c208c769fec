//! Room membership and envelope fan-out.
//!
//! `RelayRooms` is a pure state machine: every inbound envelope yields the
//! list of deliveries it causes. The hub owns the sockets and performs the
//! actual sends, which keeps routing testable without I/O.

use common::types::{MeetingId, SessionId, UserId};
use mesh_protocol::{
    ErrorPayload, ExistingParticipants, MediaStatusChanged, MeetingEnded, PeerAnnouncement,
    SignalingEnvelope,
};
use std::collections::HashMap;
use tracing::debug;

/// One envelope addressed to one socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub to: SessionId,
    pub envelope: SignalingEnvelope,
}

impl Delivery {
    fn new(to: SessionId, envelope: SignalingEnvelope) -> Self {
        Self { to, envelope }
    }
}

#[derive(Debug, Clone)]
struct Member {
    session_id: SessionId,
    user_id: UserId,
}

impl Member {
    fn announcement(&self) -> PeerAnnouncement {
        PeerAnnouncement {
            user_id: self.user_id.clone(),
            socket_id: self.session_id.clone(),
        }
    }
}

/// Rooms keyed by meeting id. Members keep join order.
#[derive(Debug, Default)]
pub struct RelayRooms {
    rooms: HashMap<MeetingId, Vec<Member>>,
    memberships: HashMap<SessionId, MeetingId>,
}

impl RelayRooms {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Sessions in `room`, in join order.
    #[must_use]
    pub fn members(&self, room: &MeetingId) -> Vec<SessionId> {
        self.rooms
            .get(room)
            .map(|members| members.iter().map(|m| m.session_id.clone()).collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn room_of(&self, session: &SessionId) -> Option<&MeetingId> {
        self.memberships.get(session)
    }

    /// Route one envelope received from `from`.
    pub fn handle(&mut self, from: &SessionId, envelope: SignalingEnvelope) -> Vec<Delivery> {
        match envelope {
            SignalingEnvelope::Join(membership) => {
                self.join(from, membership.room, membership.user_id)
            }
            SignalingEnvelope::Leave(_) => self.disconnect(from),
            envelope @ (SignalingEnvelope::Offer(_)
            | SignalingEnvelope::Answer(_)
            | SignalingEnvelope::IceCandidate(_)) => self.forward(from, envelope),
            SignalingEnvelope::MediaStatusUpdate(update) => {
                let changed = SignalingEnvelope::MediaStatusChanged(MediaStatusChanged {
                    user_id: update.user_id,
                    socket_id: from.clone(),
                    flags: update.flags,
                });
                self.broadcast(from, &changed, false)
            }
            SignalingEnvelope::SendChatMessage(outbound) => {
                let chat = SignalingEnvelope::ChatMessage(outbound.chat);
                self.broadcast(from, &chat, true)
            }
            SignalingEnvelope::EndMeeting(membership) => {
                if self.room_of(from) == Some(&membership.room) {
                    self.end_meeting(from, &membership.room)
                } else {
                    debug!(
                        target: "mesh.relay",
                        session_id = %from,
                        room = %membership.room,
                        "end-meeting from a non-member, rejected"
                    );
                    vec![Delivery::new(
                        from.clone(),
                        SignalingEnvelope::Error(ErrorPayload {
                            message: "Not a member of this meeting".to_string(),
                        }),
                    )]
                }
            }
            other => {
                debug!(
                    target: "mesh.relay",
                    session_id = %from,
                    event = %other.kind(),
                    "Unexpected envelope from client"
                );
                vec![Delivery::new(
                    from.clone(),
                    SignalingEnvelope::Error(ErrorPayload {
                        message: format!("Unexpected event: {}", other.kind()),
                    }),
                )]
            }
        }
    }

    /// Remove `session` from its room, announcing the departure.
    pub fn disconnect(&mut self, session: &SessionId) -> Vec<Delivery> {
        let Some(room) = self.memberships.remove(session) else {
            return Vec::new();
        };
        let Some(members) = self.rooms.get_mut(&room) else {
            return Vec::new();
        };

        let Some(position) = members.iter().position(|m| &m.session_id == session) else {
            return Vec::new();
        };
        let departed = members.remove(position);
        let announcement = SignalingEnvelope::UserLeft(departed.announcement());
        let deliveries = members
            .iter()
            .map(|m| Delivery::new(m.session_id.clone(), announcement.clone()))
            .collect();

        if members.is_empty() {
            self.rooms.remove(&room);
            debug!(target: "mesh.relay", room = %room, "Room dropped");
        }
        deliveries
    }

    fn join(&mut self, from: &SessionId, room: MeetingId, user_id: UserId) -> Vec<Delivery> {
        let mut deliveries = Vec::new();
        if self.memberships.contains_key(from) {
            deliveries.extend(self.disconnect(from));
        }

        let members = self.rooms.entry(room.clone()).or_default();
        let joiner = Member {
            session_id: from.clone(),
            user_id,
        };

        deliveries.push(Delivery::new(
            from.clone(),
            SignalingEnvelope::ExistingParticipants(ExistingParticipants {
                participants: members.iter().map(Member::announcement).collect(),
                socket_id: Some(from.clone()),
            }),
        ));
        let announcement = SignalingEnvelope::UserJoined(joiner.announcement());
        deliveries.extend(
            members
                .iter()
                .map(|m| Delivery::new(m.session_id.clone(), announcement.clone())),
        );

        members.push(joiner);
        self.memberships.insert(from.clone(), room);
        deliveries
    }

    fn forward(&self, from: &SessionId, envelope: SignalingEnvelope) -> Vec<Delivery> {
        let Some(target) = envelope.target_socket().cloned() else {
            debug!(
                target: "mesh.relay",
                session_id = %from,
                event = %envelope.kind(),
                "Targeted envelope without target, dropped"
            );
            return Vec::new();
        };
        let Some(target_room) = self.room_of(&target) else {
            debug!(
                target: "mesh.relay",
                session_id = %from,
                target_socket = %target,
                event = %envelope.kind(),
                "Unknown target, dropped"
            );
            return Vec::new();
        };
        if self.room_of(from) != Some(target_room) {
            debug!(
                target: "mesh.relay",
                session_id = %from,
                target_socket = %target,
                event = %envelope.kind(),
                "Target in another room, dropped"
            );
            return Vec::new();
        }
        vec![Delivery::new(target, envelope.into_delivered(from.clone()))]
    }

    fn broadcast(
        &self,
        from: &SessionId,
        envelope: &SignalingEnvelope,
        include_sender: bool,
    ) -> Vec<Delivery> {
        let Some(members) = self.room_of(from).and_then(|room| self.rooms.get(room)) else {
            return Vec::new();
        };
        members
            .iter()
            .filter(|m| include_sender || &m.session_id != from)
            .map(|m| Delivery::new(m.session_id.clone(), envelope.clone()))
            .collect()
    }

    fn end_meeting(&mut self, from: &SessionId, room: &MeetingId) -> Vec<Delivery> {
        let Some(members) = self.rooms.remove(room) else {
            return Vec::new();
        };
        let ended = SignalingEnvelope::MeetingEnded(MeetingEnded {
            meeting_id: room.clone(),
        });
        let mut deliveries = Vec::new();
        for member in members {
            self.memberships.remove(&member.session_id);
            if &member.session_id != from {
                deliveries.push(Delivery::new(member.session_id, ended.clone()));
            }
        }
        debug!(target: "mesh.relay", room = %room, "Meeting ended, room dropped");
        deliveries
    }
}
