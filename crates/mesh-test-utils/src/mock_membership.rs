//! In-memory membership service.
//!
//! Keeps users, meetings, hosts and rosters in memory and records every
//! call in order, so tests can assert what a leave or end sequence did.

use async_trait::async_trait;
use common::types::{MeetingId, UserId};
use mesh_client::errors::MembershipError;
use mesh_client::membership::{MeetingParticipant, MembershipService};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

/// Membership operations, for failure scripting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MembershipOp {
    CreateUser,
    CreateMeeting,
    Join,
    IsHost,
    Leave,
    End,
    GetParticipants,
}

/// One recorded call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipCall {
    CreateUser(String),
    CreateMeeting { host_id: UserId, name: String },
    Join { meeting_id: MeetingId, user_id: UserId },
    IsHost { meeting_id: MeetingId, user_id: UserId },
    Leave { meeting_id: MeetingId, user_id: UserId },
    End { meeting_id: MeetingId, user_id: UserId },
    GetParticipants(MeetingId),
}

#[derive(Debug, Default)]
struct MembershipState {
    next_id: u64,
    usernames: HashMap<UserId, String>,
    hosts: HashSet<(MeetingId, UserId)>,
    rosters: HashMap<MeetingId, Vec<MeetingParticipant>>,
    failures: HashSet<MembershipOp>,
    calls: Vec<MembershipCall>,
}

/// Mock [`MembershipService`].
#[derive(Debug, Clone, Default)]
pub struct MockMembership {
    state: Arc<Mutex<MembershipState>>,
}

impl MockMembership {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a meeting hosted by `host`.
    pub fn with_meeting(self, meeting_id: &str, host: &str) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            let meeting = MeetingId::from(meeting_id);
            let host = UserId::from(host);
            state.hosts.insert((meeting.clone(), host.clone()));
            state.rosters.entry(meeting).or_default().push(MeetingParticipant {
                user_id: host.clone(),
                username: host.to_string(),
                display_name: None,
                is_host: true,
                joined_at: None,
            });
        }
        self
    }

    /// Make every call of `op` fail with a 500.
    pub fn fail(&self, op: MembershipOp) {
        self.state.lock().unwrap().failures.insert(op);
    }

    pub fn heal(&self, op: MembershipOp) {
        self.state.lock().unwrap().failures.remove(&op);
    }

    pub fn calls(&self) -> Vec<MembershipCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn roster(&self, meeting_id: &MeetingId) -> Vec<MeetingParticipant> {
        self.state
            .lock()
            .unwrap()
            .rosters
            .get(meeting_id)
            .cloned()
            .unwrap_or_default()
    }

    fn record(&self, op: MembershipOp, call: MembershipCall) -> Result<(), MembershipError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call);
        if state.failures.contains(&op) {
            return Err(MembershipError::Status {
                status: 500,
                message: "Internal server error".to_string(),
            });
        }
        Ok(())
    }

    fn add_to_roster(state: &mut MembershipState, meeting_id: &MeetingId, user_id: &UserId) {
        let is_host = state.hosts.contains(&(meeting_id.clone(), user_id.clone()));
        let username = state
            .usernames
            .get(user_id)
            .cloned()
            .unwrap_or_else(|| user_id.to_string());
        let roster = state.rosters.entry(meeting_id.clone()).or_default();
        if roster.iter().any(|p| &p.user_id == user_id) {
            return;
        }
        roster.push(MeetingParticipant {
            user_id: user_id.clone(),
            username,
            display_name: None,
            is_host,
            joined_at: None,
        });
    }
}

#[async_trait]
impl MembershipService for MockMembership {
    async fn create_user(&self, username: &str) -> Result<UserId, MembershipError> {
        self.record(
            MembershipOp::CreateUser,
            MembershipCall::CreateUser(username.to_string()),
        )?;
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let user_id = UserId::from(format!("user-{}", state.next_id));
        state.usernames.insert(user_id.clone(), username.to_string());
        Ok(user_id)
    }

    async fn create_meeting(
        &self,
        host_id: &UserId,
        name: &str,
    ) -> Result<MeetingId, MembershipError> {
        self.record(
            MembershipOp::CreateMeeting,
            MembershipCall::CreateMeeting {
                host_id: host_id.clone(),
                name: name.to_string(),
            },
        )?;
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let meeting_id = MeetingId::from(format!("meeting-{}", state.next_id));
        state.hosts.insert((meeting_id.clone(), host_id.clone()));
        Self::add_to_roster(&mut state, &meeting_id, host_id);
        Ok(meeting_id)
    }

    async fn join_meeting(
        &self,
        meeting_id: &MeetingId,
        user_id: &UserId,
    ) -> Result<(), MembershipError> {
        self.record(
            MembershipOp::Join,
            MembershipCall::Join {
                meeting_id: meeting_id.clone(),
                user_id: user_id.clone(),
            },
        )?;
        let mut state = self.state.lock().unwrap();
        Self::add_to_roster(&mut state, meeting_id, user_id);
        Ok(())
    }

    async fn is_host(
        &self,
        meeting_id: &MeetingId,
        user_id: &UserId,
    ) -> Result<bool, MembershipError> {
        self.record(
            MembershipOp::IsHost,
            MembershipCall::IsHost {
                meeting_id: meeting_id.clone(),
                user_id: user_id.clone(),
            },
        )?;
        let state = self.state.lock().unwrap();
        Ok(state.hosts.contains(&(meeting_id.clone(), user_id.clone())))
    }

    async fn leave_meeting(
        &self,
        meeting_id: &MeetingId,
        user_id: &UserId,
    ) -> Result<(), MembershipError> {
        self.record(
            MembershipOp::Leave,
            MembershipCall::Leave {
                meeting_id: meeting_id.clone(),
                user_id: user_id.clone(),
            },
        )?;
        let mut state = self.state.lock().unwrap();
        if let Some(roster) = state.rosters.get_mut(meeting_id) {
            roster.retain(|p| &p.user_id != user_id);
        }
        Ok(())
    }

    async fn end_meeting(
        &self,
        meeting_id: &MeetingId,
        user_id: &UserId,
    ) -> Result<(), MembershipError> {
        self.record(
            MembershipOp::End,
            MembershipCall::End {
                meeting_id: meeting_id.clone(),
                user_id: user_id.clone(),
            },
        )?;
        self.state.lock().unwrap().rosters.remove(meeting_id);
        Ok(())
    }

    async fn get_participants(
        &self,
        meeting_id: &MeetingId,
    ) -> Result<Vec<MeetingParticipant>, MembershipError> {
        self.record(
            MembershipOp::GetParticipants,
            MembershipCall::GetParticipants(meeting_id.clone()),
        )?;
        Ok(self.roster(meeting_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_meeting_makes_creator_host() {
        let membership = MockMembership::new();
        let user = membership.create_user("alice").await.unwrap();
        let meeting = membership.create_meeting(&user, "standup").await.unwrap();
        assert!(membership.is_host(&meeting, &user).await.unwrap());

        let roster = membership.get_participants(&meeting).await.unwrap();
        assert_eq!(roster.len(), 1);
        assert_eq!(roster[0].username, "alice");
        assert!(roster[0].is_host);
    }

    #[tokio::test]
    async fn test_failures_are_recorded() {
        let membership = MockMembership::new().with_meeting("m-1", "alice");
        membership.fail(MembershipOp::Leave);
        let result = membership
            .leave_meeting(&MeetingId::from("m-1"), &UserId::from("bob"))
            .await;
        assert!(matches!(result, Err(MembershipError::Status { status: 500, .. })));
        assert_eq!(membership.calls().len(), 1);
    }
}
