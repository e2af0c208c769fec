//! In-meeting chat.

use chrono::{DateTime, SecondsFormat, Utc};
use common::types::{MeetingId, UserId};
use mesh_protocol::{ChatPayload, OutboundChat, SignalingEnvelope};
use rand::distributions::Alphanumeric;
use rand::Rng;

/// Build an outbound chat envelope.
///
/// The id is the send time in milliseconds plus a random suffix.
#[must_use]
pub fn build_chat_message(
    room: &MeetingId,
    user_id: &UserId,
    username: &str,
    text: &str,
    now: DateTime<Utc>,
) -> SignalingEnvelope {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(9)
        .map(char::from)
        .collect::<String>()
        .to_lowercase();

    SignalingEnvelope::SendChatMessage(OutboundChat {
        room: room.clone(),
        chat: ChatPayload {
            id: format!("{}-{suffix}", now.timestamp_millis()),
            user_id: user_id.clone(),
            username: username.to_string(),
            message: text.to_string(),
            timestamp: now.to_rfc3339_opts(SecondsFormat::Millis, true),
        },
    })
}

/// Received chat lines plus an unread counter.
///
/// Messages from other users count as unread while the chat view is closed.
#[derive(Debug)]
pub struct ChatLog {
    local_user: UserId,
    messages: Vec<ChatPayload>,
    unread: usize,
    open: bool,
}

impl ChatLog {
    #[must_use]
    pub fn new(local_user: UserId) -> Self {
        Self {
            local_user,
            messages: Vec::new(),
            unread: 0,
            open: false,
        }
    }

    /// Append a message. Duplicate ids are ignored.
    pub fn push(&mut self, message: ChatPayload) {
        if self.messages.iter().any(|m| m.id == message.id) {
            return;
        }
        if !self.open && message.user_id != self.local_user {
            self.unread += 1;
        }
        self.messages.push(message);
    }

    /// Opening the view clears the unread count.
    pub fn set_open(&mut self, open: bool) {
        self.open = open;
        if open {
            self.unread = 0;
        }
    }

    #[must_use]
    pub fn unread(&self) -> usize {
        self.unread
    }

    #[must_use]
    pub fn messages(&self) -> &[ChatPayload] {
        &self.messages
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.unread = 0;
    }
}
