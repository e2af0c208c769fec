//! Membership service client.
//!
//! Room and participant CRUD lives in an external REST service. The session
//! controller talks to it through [`MembershipService`].

use crate::errors::MembershipError;
use async_trait::async_trait;
use common::types::{MeetingId, UserId};
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument};

/// Request timeout for membership calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// One entry of the meeting roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeetingParticipant {
    pub user_id: UserId,
    pub username: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub is_host: bool,
    #[serde(default)]
    pub joined_at: Option<String>,
}

/// Boundary operations of the membership service.
#[async_trait]
pub trait MembershipService: Send + Sync {
    async fn create_user(&self, username: &str) -> Result<UserId, MembershipError>;

    async fn create_meeting(
        &self,
        host_id: &UserId,
        name: &str,
    ) -> Result<MeetingId, MembershipError>;

    async fn join_meeting(
        &self,
        meeting_id: &MeetingId,
        user_id: &UserId,
    ) -> Result<(), MembershipError>;

    async fn is_host(
        &self,
        meeting_id: &MeetingId,
        user_id: &UserId,
    ) -> Result<bool, MembershipError>;

    async fn leave_meeting(
        &self,
        meeting_id: &MeetingId,
        user_id: &UserId,
    ) -> Result<(), MembershipError>;

    async fn end_meeting(
        &self,
        meeting_id: &MeetingId,
        user_id: &UserId,
    ) -> Result<(), MembershipError>;

    async fn get_participants(
        &self,
        meeting_id: &MeetingId,
    ) -> Result<Vec<MeetingParticipant>, MembershipError>;
}

#[derive(Serialize)]
struct CreateUserRequest<'a> {
    username: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateUserResponse {
    user_id: UserId,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateMeetingRequest<'a> {
    host_id: &'a UserId,
    name: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateMeetingResponse {
    meeting_id: MeetingId,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UserRequest<'a> {
    user_id: &'a UserId,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IsHostResponse {
    is_host: bool,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: Option<String>,
}

/// `reqwest` implementation of [`MembershipService`].
#[derive(Debug, Clone)]
pub struct HttpMembershipClient {
    base_url: String,
    client: Client,
}

impl HttpMembershipClient {
    /// # Errors
    ///
    /// Returns `Http` if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>) -> Result<Self, MembershipError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| MembershipError::Http(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

/// Pass 2xx responses through; map anything else to `Status`.
async fn check(response: Response) -> Result<Response, MembershipError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response
        .json::<ErrorBody>()
        .await
        .ok()
        .and_then(|b| b.error)
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("Unknown error")
                .to_string()
        });
    Err(MembershipError::Status {
        status: status.as_u16(),
        message,
    })
}

async fn parse<T: for<'de> Deserialize<'de>>(response: Response) -> Result<T, MembershipError> {
    check(response)
        .await?
        .json::<T>()
        .await
        .map_err(|e| MembershipError::InvalidResponse(e.to_string()))
}

fn http(e: &reqwest::Error) -> MembershipError {
    MembershipError::Http(e.to_string())
}

#[async_trait]
impl MembershipService for HttpMembershipClient {
    #[instrument(skip_all, name = "mesh.membership.create_user")]
    async fn create_user(&self, username: &str) -> Result<UserId, MembershipError> {
        let response = self
            .client
            .post(self.url("/api/users"))
            .json(&CreateUserRequest { username })
            .send()
            .await
            .map_err(|e| http(&e))?;
        let body: CreateUserResponse = parse(response).await?;
        debug!(target: "mesh.membership", user_id = %body.user_id, "User created");
        Ok(body.user_id)
    }

    #[instrument(skip_all, name = "mesh.membership.create_meeting")]
    async fn create_meeting(
        &self,
        host_id: &UserId,
        name: &str,
    ) -> Result<MeetingId, MembershipError> {
        let response = self
            .client
            .post(self.url("/api/meetings"))
            .json(&CreateMeetingRequest { host_id, name })
            .send()
            .await
            .map_err(|e| http(&e))?;
        let body: CreateMeetingResponse = parse(response).await?;
        debug!(target: "mesh.membership", meeting_id = %body.meeting_id, "Meeting created");
        Ok(body.meeting_id)
    }

    #[instrument(skip_all, name = "mesh.membership.join", fields(meeting_id = %meeting_id))]
    async fn join_meeting(
        &self,
        meeting_id: &MeetingId,
        user_id: &UserId,
    ) -> Result<(), MembershipError> {
        let response = self
            .client
            .post(self.url(&format!("/api/meetings/{meeting_id}/join")))
            .json(&UserRequest { user_id })
            .send()
            .await
            .map_err(|e| http(&e))?;
        check(response).await.map(|_| ())
    }

    async fn is_host(
        &self,
        meeting_id: &MeetingId,
        user_id: &UserId,
    ) -> Result<bool, MembershipError> {
        let response = self
            .client
            .get(self.url(&format!("/api/meetings/{meeting_id}/is-host/{user_id}")))
            .send()
            .await
            .map_err(|e| http(&e))?;
        let body: IsHostResponse = parse(response).await?;
        Ok(body.is_host)
    }

    #[instrument(skip_all, name = "mesh.membership.leave", fields(meeting_id = %meeting_id))]
    async fn leave_meeting(
        &self,
        meeting_id: &MeetingId,
        user_id: &UserId,
    ) -> Result<(), MembershipError> {
        let response = self
            .client
            .post(self.url(&format!("/api/meetings/{meeting_id}/leave")))
            .json(&UserRequest { user_id })
            .send()
            .await
            .map_err(|e| http(&e))?;
        check(response).await.map(|_| ())
    }

    #[instrument(skip_all, name = "mesh.membership.end", fields(meeting_id = %meeting_id))]
    async fn end_meeting(
        &self,
        meeting_id: &MeetingId,
        user_id: &UserId,
    ) -> Result<(), MembershipError> {
        let response = self
            .client
            .post(self.url(&format!("/api/meetings/{meeting_id}/end")))
            .json(&UserRequest { user_id })
            .send()
            .await
            .map_err(|e| http(&e))?;
        check(response).await.map(|_| ())
    }

    async fn get_participants(
        &self,
        meeting_id: &MeetingId,
    ) -> Result<Vec<MeetingParticipant>, MembershipError> {
        let response = self
            .client
            .get(self.url(&format!("/api/meetings/{meeting_id}/participants")))
            .send()
            .await
            .map_err(|e| http(&e))?;
        parse(response).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_participant_accepts_backend_shape() {
        let json = r#"{
            "userId": "u1",
            "username": "alice",
            "displayName": "Alice",
            "isHost": true,
            "joinedAt": "2024-01-01T10:00:00"
        }"#;
        let p: MeetingParticipant = serde_json::from_str(json).unwrap();
        assert_eq!(p.user_id, UserId::from("u1"));
        assert!(p.is_host);
        assert_eq!(p.display_name.as_deref(), Some("Alice"));
    }

    #[test]
    fn test_participant_minimal_shape() {
        let p: MeetingParticipant =
            serde_json::from_str(r#"{"userId":"u2","username":"bob"}"#).unwrap();
        assert!(!p.is_host);
        assert!(p.joined_at.is_none());
    }

    #[test]
    fn test_base_url_trailing_slash_is_trimmed() {
        let client = HttpMembershipClient::new("http://localhost:5000/").unwrap();
        assert_eq!(client.url("/api/users"), "http://localhost:5000/api/users");
    }
}
