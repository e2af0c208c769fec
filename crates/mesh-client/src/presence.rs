//! Presence/Status Sync.
//!
//! Outbound: publish the local mute/video/screen flags, suppressing an
//! update identical to the last one sent. Inbound flags are applied to the
//! participant view by the orchestrator.

use common::types::{MeetingId, UserId};
use mesh_protocol::{MediaFlags, MediaStatusUpdate, SignalingEnvelope};

/// Tracks the last published local status.
#[derive(Debug, Default)]
pub struct PresenceTracker {
    last_sent: Option<MediaFlags>,
}

impl PresenceTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the `media-status-update` for `flags`, or `None` if it would
    /// repeat the last one.
    pub fn update(
        &mut self,
        room: &MeetingId,
        user_id: &UserId,
        flags: MediaFlags,
    ) -> Option<SignalingEnvelope> {
        if self.last_sent == Some(flags) {
            return None;
        }
        self.last_sent = Some(flags);
        Some(SignalingEnvelope::MediaStatusUpdate(MediaStatusUpdate {
            room: room.clone(),
            user_id: user_id.clone(),
            flags,
        }))
    }

    /// Forget the last status so the next update is always sent.
    pub fn reset(&mut self) {
        self.last_sent = None;
    }
}
