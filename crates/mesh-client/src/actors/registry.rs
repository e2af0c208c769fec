//! Connection Registry.
//!
//! Authoritative map from remote session id to its [`ParticipantConnection`].
//! Owned exclusively by the orchestrator actor.

use crate::media::endpoint::{IceConnectionState, MediaEndpoint};
use crate::media::track::RemoteStream;
use common::types::{SessionId, UserId};
use mesh_protocol::IceCandidate;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::time::Instant;

/// Per-connection liveness state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

impl ConnectionState {
    /// `Connected` or `Completed`.
    #[must_use]
    pub fn is_established(self) -> bool {
        matches!(self, ConnectionState::Connected | ConnectionState::Completed)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::New => "new",
            ConnectionState::Checking => "checking",
            ConnectionState::Connected => "connected",
            ConnectionState::Completed => "completed",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Failed => "failed",
            ConnectionState::Closed => "closed",
        }
    }
}

impl From<IceConnectionState> for ConnectionState {
    fn from(state: IceConnectionState) -> Self {
        match state {
            IceConnectionState::New => ConnectionState::New,
            IceConnectionState::Checking => ConnectionState::Checking,
            IceConnectionState::Connected => ConnectionState::Connected,
            IceConnectionState::Completed => ConnectionState::Completed,
            IceConnectionState::Disconnected => ConnectionState::Disconnected,
            IceConnectionState::Failed => ConnectionState::Failed,
            IceConnectionState::Closed => ConnectionState::Closed,
        }
    }
}

/// One remote participant's media transport and its recovery bookkeeping.
pub struct ParticipantConnection {
    pub remote_user_id: UserId,
    pub remote_session_id: SessionId,
    pub state: ConnectionState,
    /// Owned endpoint; closed before the record is discarded.
    pub endpoint: Arc<dyn MediaEndpoint>,
    /// Distinguishes this endpoint's events from a replaced one's.
    pub epoch: u64,
    pub is_initiator: bool,
    pub remote_stream: Weak<RemoteStream>,
    pub restart_attempts: u32,
    pub connection_started_at: Instant,
    /// Candidates arriving before this is set are buffered.
    pub remote_description_applied: bool,
}

impl std::fmt::Debug for ParticipantConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParticipantConnection")
            .field("remote_user_id", &self.remote_user_id)
            .field("remote_session_id", &self.remote_session_id)
            .field("state", &self.state)
            .field("epoch", &self.epoch)
            .field("is_initiator", &self.is_initiator)
            .field("restart_attempts", &self.restart_attempts)
            .field("has_stream", &(self.remote_stream.strong_count() > 0))
            .finish_non_exhaustive()
    }
}

impl ParticipantConnection {
    #[must_use]
    pub fn new(
        remote_user_id: UserId,
        remote_session_id: SessionId,
        endpoint: Arc<dyn MediaEndpoint>,
        epoch: u64,
        is_initiator: bool,
    ) -> Self {
        Self {
            remote_user_id,
            remote_session_id,
            state: ConnectionState::New,
            endpoint,
            epoch,
            is_initiator,
            remote_stream: Weak::new(),
            restart_attempts: 0,
            connection_started_at: Instant::now(),
            remote_description_applied: false,
        }
    }
}

/// Returned when inserting over a live record. Hands the rejected record
/// back so its endpoint can still be closed.
#[derive(Debug, thiserror::Error)]
#[error("connection for {} already registered", .0.remote_session_id)]
pub struct DuplicateConnection(pub Box<ParticipantConnection>);

/// Map of live connections.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: HashMap<SessionId, ParticipantConnection>,
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new record.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateConnection` if a record for the session exists; the
    /// caller must close and remove the old one first.
    pub fn insert(&mut self, connection: ParticipantConnection) -> Result<(), DuplicateConnection> {
        match self.connections.entry(connection.remote_session_id.clone()) {
            Entry::Occupied(_) => Err(DuplicateConnection(Box::new(connection))),
            Entry::Vacant(e) => {
                e.insert(connection);
                Ok(())
            }
        }
    }

    #[must_use]
    pub fn get(&self, remote: &SessionId) -> Option<&ParticipantConnection> {
        self.connections.get(remote)
    }

    pub fn get_mut(&mut self, remote: &SessionId) -> Option<&mut ParticipantConnection> {
        self.connections.get_mut(remote)
    }

    /// The record for `remote`, only if it belongs to endpoint `epoch`.
    pub fn get_current_mut(
        &mut self,
        remote: &SessionId,
        epoch: u64,
    ) -> Option<&mut ParticipantConnection> {
        self.connections
            .get_mut(remote)
            .filter(|c| c.epoch == epoch)
    }

    pub fn remove(&mut self, remote: &SessionId) -> Option<ParticipantConnection> {
        self.connections.remove(remote)
    }

    #[must_use]
    pub fn contains(&self, remote: &SessionId) -> bool {
        self.connections.contains_key(remote)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ParticipantConnection> {
        self.connections.values()
    }

    /// Remove every record.
    pub fn drain(&mut self) -> Vec<ParticipantConnection> {
        self.connections.drain().map(|(_, c)| c).collect()
    }
}

/// Most candidates kept per remote while its description is pending.
pub const MAX_PENDING_CANDIDATES: usize = 64;

/// ICE candidates that arrived before their connection could accept them.
#[derive(Debug, Default)]
pub struct PendingCandidates {
    by_remote: HashMap<SessionId, Vec<IceCandidate>>,
}

impl PendingCandidates {
    /// Buffer a candidate. Returns false if the per-remote limit was hit.
    pub fn push(&mut self, remote: &SessionId, candidate: IceCandidate) -> bool {
        let queue = self.by_remote.entry(remote.clone()).or_default();
        if queue.len() >= MAX_PENDING_CANDIDATES {
            return false;
        }
        queue.push(candidate);
        true
    }

    pub fn take(&mut self, remote: &SessionId) -> Vec<IceCandidate> {
        self.by_remote.remove(remote).unwrap_or_default()
    }

    pub fn clear(&mut self, remote: &SessionId) {
        self.by_remote.remove(remote);
    }

    pub fn clear_all(&mut self) {
        self.by_remote.clear();
    }

    #[must_use]
    pub fn len(&self, remote: &SessionId) -> usize {
        self.by_remote.get(remote).map_or(0, Vec::len)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::errors::NegotiationError;
    use crate::media::endpoint::{SenderInfo, SignalingState};
    use crate::media::track::{LocalTrack, MediaKind};
    use async_trait::async_trait;
    use mesh_protocol::SessionDescription;

    struct InertEndpoint;

    #[async_trait]
    impl MediaEndpoint for InertEndpoint {
        async fn create_offer(&self, _: bool) -> Result<SessionDescription, NegotiationError> {
            Ok(SessionDescription::offer("v=0"))
        }
        async fn create_answer(&self) -> Result<SessionDescription, NegotiationError> {
            Ok(SessionDescription::answer("v=0"))
        }
        async fn set_local_description(&self, _: SessionDescription) -> Result<(), NegotiationError> {
            Ok(())
        }
        async fn set_remote_description(&self, _: SessionDescription) -> Result<(), NegotiationError> {
            Ok(())
        }
        async fn add_ice_candidate(&self, _: IceCandidate) -> Result<(), NegotiationError> {
            Ok(())
        }
        async fn restart_ice(&self) -> Result<(), NegotiationError> {
            Ok(())
        }
        fn signaling_state(&self) -> SignalingState {
            SignalingState::Stable
        }
        async fn senders(&self) -> Vec<SenderInfo> {
            Vec::new()
        }
        async fn replace_track(&self, kind: MediaKind, _: Arc<LocalTrack>) -> Result<(), NegotiationError> {
            Err(NegotiationError::NoSender(kind))
        }
        async fn add_track(&self, _: Arc<LocalTrack>) -> Result<(), NegotiationError> {
            Ok(())
        }
        async fn close(&self) -> Result<(), NegotiationError> {
            Ok(())
        }
    }

    fn record(session: &str, epoch: u64) -> ParticipantConnection {
        ParticipantConnection::new(
            UserId::from("bob"),
            SessionId::from(session),
            Arc::new(InertEndpoint),
            epoch,
            true,
        )
    }

    #[test]
    fn test_insert_rejects_duplicate_session() {
        let mut registry = ConnectionRegistry::new();
        registry.insert(record("sock-b", 1)).unwrap();
        let err = registry.insert(record("sock-b", 2)).unwrap_err();
        assert_eq!(err.0.epoch, 2);
        assert_eq!(registry.get(&SessionId::from("sock-b")).unwrap().epoch, 1);
    }

    #[test]
    fn test_get_current_filters_stale_epoch() {
        let mut registry = ConnectionRegistry::new();
        registry.insert(record("sock-b", 3)).unwrap();
        let id = SessionId::from("sock-b");
        assert!(registry.get_current_mut(&id, 2).is_none());
        assert!(registry.get_current_mut(&id, 3).is_some());
    }

    #[test]
    fn test_remove_then_insert_replacement() {
        let mut registry = ConnectionRegistry::new();
        registry.insert(record("sock-b", 1)).unwrap();
        let old = registry.remove(&SessionId::from("sock-b")).unwrap();
        assert_eq!(old.epoch, 1);
        registry.insert(record("sock-b", 2)).unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_new_record_defaults() {
        let rec = record("sock-c", 1);
        assert_eq!(rec.state, ConnectionState::New);
        assert_eq!(rec.restart_attempts, 0);
        assert!(rec.remote_stream.upgrade().is_none());
        assert!(!rec.remote_description_applied);
    }

    #[test]
    fn test_pending_candidates_are_bounded() {
        let mut pending = PendingCandidates::default();
        let id = SessionId::from("sock-b");
        for i in 0..MAX_PENDING_CANDIDATES {
            assert!(pending.push(&id, IceCandidate::new(format!("candidate:{i}"))));
        }
        assert!(!pending.push(&id, IceCandidate::new("overflow")));
        assert_eq!(pending.len(&id), MAX_PENDING_CANDIDATES);

        let drained = pending.take(&id);
        assert_eq!(drained.len(), MAX_PENDING_CANDIDATES);
        assert_eq!(pending.len(&id), 0);
    }

    #[test]
    fn test_state_helpers() {
        assert!(ConnectionState::Connected.is_established());
        assert!(ConnectionState::Completed.is_established());
        assert!(!ConnectionState::Checking.is_established());
        assert_eq!(
            ConnectionState::from(IceConnectionState::Failed),
            ConnectionState::Failed
        );
    }
}
