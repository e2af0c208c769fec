//! HTTP membership client tests against a mock REST service.

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]

use common::types::{MeetingId, UserId};
use mesh_client::errors::MembershipError;
use mesh_client::membership::{HttpMembershipClient, MembershipService};
use serde_json::json;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn setup() -> (MockServer, HttpMembershipClient) {
    let server = MockServer::start().await;
    let client = HttpMembershipClient::new(server.uri()).unwrap();
    (server, client)
}

#[tokio::test]
async fn test_create_user() {
    let (server, client) = setup().await;
    Mock::given(method("POST"))
        .and(path("/api/users"))
        .and(body_json(json!({ "username": "alice" })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "userId": "u-1",
            "username": "alice"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let user_id = client.create_user("alice").await.unwrap();
    assert_eq!(user_id, UserId::from("u-1"));
}

#[tokio::test]
async fn test_create_meeting() {
    let (server, client) = setup().await;
    Mock::given(method("POST"))
        .and(path("/api/meetings"))
        .and(body_json(json!({ "hostId": "u-1", "name": "standup" })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "meetingId": "m-9",
            "name": "standup",
            "hostId": "u-1"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let meeting_id = client
        .create_meeting(&UserId::from("u-1"), "standup")
        .await
        .unwrap();
    assert_eq!(meeting_id, MeetingId::from("m-9"));
}

#[tokio::test]
async fn test_join_leave_end_post_user_id() {
    let (server, client) = setup().await;
    for action in ["join", "leave", "end"] {
        Mock::given(method("POST"))
            .and(path(format!("/api/meetings/m-1/{action}")))
            .and(body_json(json!({ "userId": "u-2" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
            .expect(1)
            .mount(&server)
            .await;
    }

    let meeting = MeetingId::from("m-1");
    let user = UserId::from("u-2");
    client.join_meeting(&meeting, &user).await.unwrap();
    client.leave_meeting(&meeting, &user).await.unwrap();
    client.end_meeting(&meeting, &user).await.unwrap();
}

#[tokio::test]
async fn test_is_host() {
    let (server, client) = setup().await;
    Mock::given(method("GET"))
        .and(path("/api/meetings/m-1/is-host/u-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "isHost": true })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/meetings/m-1/is-host/u-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "isHost": false })))
        .mount(&server)
        .await;

    let meeting = MeetingId::from("m-1");
    assert!(client.is_host(&meeting, &UserId::from("u-1")).await.unwrap());
    assert!(!client.is_host(&meeting, &UserId::from("u-2")).await.unwrap());
}

#[tokio::test]
async fn test_get_participants() {
    let (server, client) = setup().await;
    Mock::given(method("GET"))
        .and(path("/api/meetings/m-1/participants"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {
                "userId": "u-1",
                "username": "alice",
                "isHost": true,
                "joinedAt": "2024-03-01T09:00:00"
            },
            { "userId": "u-2", "username": "bob" }
        ])))
        .mount(&server)
        .await;

    let roster = client
        .get_participants(&MeetingId::from("m-1"))
        .await
        .unwrap();
    assert_eq!(roster.len(), 2);
    assert!(roster[0].is_host);
    assert_eq!(roster[1].user_id, UserId::from("u-2"));
    assert!(!roster[1].is_host);
}

#[tokio::test]
async fn test_error_body_becomes_status_message() {
    let (server, client) = setup().await;
    Mock::given(method("POST"))
        .and(path("/api/meetings/missing/join"))
        .respond_with(
            ResponseTemplate::new(404).set_body_json(json!({ "error": "Meeting not found" })),
        )
        .mount(&server)
        .await;

    let err = client
        .join_meeting(&MeetingId::from("missing"), &UserId::from("u-1"))
        .await
        .unwrap_err();
    match err {
        MembershipError::Status { status, message } => {
            assert_eq!(status, 404);
            assert_eq!(message, "Meeting not found");
        }
        other => panic!("expected status error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_error_without_body_uses_reason() {
    let (server, client) = setup().await;
    Mock::given(method("POST"))
        .and(path("/api/users"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = client.create_user("alice").await.unwrap_err();
    assert!(matches!(
        err,
        MembershipError::Status { status: 503, ref message } if message == "Service Unavailable"
    ));
}

#[tokio::test]
async fn test_malformed_success_body_is_invalid_response() {
    let (server, client) = setup().await;
    Mock::given(method("POST"))
        .and(path("/api/users"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let err = client.create_user("alice").await.unwrap_err();
    assert!(matches!(err, MembershipError::InvalidResponse(_)));
}

#[tokio::test]
async fn test_unreachable_service_is_http_error() {
    // Nothing listens on the discard port
    let client = HttpMembershipClient::new("http://127.0.0.1:9").unwrap();
    let err = client.create_user("alice").await.unwrap_err();
    assert!(matches!(err, MembershipError::Http(_)));
}
