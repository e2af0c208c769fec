//! Session lifecycle tests.
//!
//! Runs complete client stacks (session controller, orchestrator, mock
//! endpoints) against the in-process relay and the in-memory membership
//! service to verify:
//! - Sign-in, create and join
//! - Leave and end ordering, host confirmation
//! - Meeting-ended handling on the other side
//! - Chat and unread counting
//! - Signaling reconnect, loss and forced reconnect
//! - Status publishing and roster refresh

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]

use std::time::Duration;

use common::types::{MeetingId, UserId};
use mesh_client::actors::{SessionNotice, SessionPhase};
use mesh_client::errors::{ClientError, MembershipError};
use mesh_client::media::{IceConnectionState, TrackSource};
use mesh_client::signaling::SignalingEvent;
use mesh_protocol::{EnvelopeKind, MediaFlags, MeetingEnded, SignalingEnvelope};
use mesh_test_utils::{
    settle, LocalRelay, MembershipCall, MembershipOp, MockMembership, SessionHarness,
};

async fn advance(duration: Duration) {
    tokio::time::sleep(duration).await;
    settle().await;
}

/// Alice hosts, bob joins, and their connection is negotiated and up.
async fn meeting_of_two(
    relay: &LocalRelay,
    membership: &MockMembership,
) -> (SessionHarness, SessionHarness, MeetingId) {
    let alice = SessionHarness::signed_in(relay, membership, "alice");
    let bob = SessionHarness::signed_in(relay, membership, "bob");

    let meeting_id = alice.session.create_meeting("standup").await.unwrap();
    bob.session.join_meeting(meeting_id.clone()).await.unwrap();
    advance(Duration::from_millis(200)).await;

    for harness in [&alice, &bob] {
        for endpoint in harness.factory.created() {
            endpoint.emit_ice_state(IceConnectionState::Connected);
        }
    }
    settle().await;

    (alice, bob, meeting_id)
}

fn status_updates(relay: &LocalRelay, harness: &SessionHarness) -> Vec<MediaFlags> {
    relay
        .sent_by(&harness.client.session_id())
        .into_iter()
        .filter_map(|e| match e {
            SignalingEnvelope::MediaStatusUpdate(update) => Some(update.flags),
            _ => None,
        })
        .collect()
}

// ============================================================================
// Lobby
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_sign_in_then_create_meeting() {
    let relay = LocalRelay::new();
    let membership = MockMembership::new();
    let mut alice = SessionHarness::connect(&relay, &membership, "Alice");

    assert_eq!(alice.state().await.phase, SessionPhase::Unauthenticated);

    let user_id = alice.session.authenticate("Alice").await.unwrap();
    assert_eq!(user_id, UserId::from("user-1"));
    let state = alice.state().await;
    assert_eq!(state.phase, SessionPhase::Lobby);
    assert_eq!(state.user_id, Some(user_id.clone()));

    let err = alice.session.authenticate("Alice").await.unwrap_err();
    assert!(matches!(err, ClientError::InvalidState(_)));

    let meeting_id = alice.session.create_meeting("retro").await.unwrap();
    let state = alice.state().await;
    assert_eq!(state.phase, SessionPhase::InRoom);
    assert_eq!(state.meeting_id, Some(meeting_id.clone()));
    assert!(state.is_host);
    assert_eq!(state.roster.len(), 1);
    assert!(state.roster[0].is_host);

    assert_eq!(
        relay.sent_kinds(&alice.client.session_id()),
        vec![EnvelopeKind::Join, EnvelopeKind::MediaStatusUpdate]
    );
    assert_eq!(
        membership.calls()[1],
        MembershipCall::CreateMeeting {
            host_id: user_id,
            name: "retro".to_string(),
        }
    );
    assert!(alice
        .drain_notices()
        .iter()
        .any(|n| matches!(n, SessionNotice::RosterUpdated(r) if r.len() == 1)));

    alice.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_operations_checked_against_phase() {
    let relay = LocalRelay::new();
    let membership = MockMembership::new().with_meeting("m-1", "carol");
    let guest = SessionHarness::connect(&relay, &membership, "Guest");

    let err = guest
        .session
        .join_meeting(MeetingId::from("m-1"))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::InvalidState(_)));

    guest.session.authenticate("Guest").await.unwrap();
    assert!(matches!(
        guest.session.send_chat("hi").await.unwrap_err(),
        ClientError::InvalidState(_)
    ));
    assert!(matches!(
        guest.session.leave(false).await.unwrap_err(),
        ClientError::InvalidState(_)
    ));
    assert!(matches!(
        guest.session.force_reconnect().await.unwrap_err(),
        ClientError::InvalidState(_)
    ));
    assert!(relay.sent_by(&guest.client.session_id()).is_empty());

    guest.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_join_failure_stays_in_lobby() {
    let relay = LocalRelay::new();
    let membership = MockMembership::new().with_meeting("m-1", "carol");
    membership.fail(MembershipOp::Join);
    let bob = SessionHarness::signed_in(&relay, &membership, "bob");

    let err = bob
        .session
        .join_meeting(MeetingId::from("m-1"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ClientError::Membership(MembershipError::Status { status: 500, .. })
    ));
    assert_eq!(bob.state().await.phase, SessionPhase::Lobby);
    assert!(relay.sent_by(&bob.client.session_id()).is_empty());
    assert_eq!(bob.capture.opened().len(), 0);

    bob.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_joiner_learns_host_flag() {
    let relay = LocalRelay::new();
    let membership = MockMembership::new().with_meeting("m-1", "carol");
    let carol = SessionHarness::signed_in(&relay, &membership, "carol");

    carol.session.join_meeting(MeetingId::from("m-1")).await.unwrap();
    assert!(carol.state().await.is_host);

    carol.shutdown().await;
}

// ============================================================================
// Leaving
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_participant_leave_tears_down_then_notifies() {
    let relay = LocalRelay::new();
    let membership = MockMembership::new();
    let (alice, bob, meeting_id) = meeting_of_two(&relay, &membership).await;
    let bob_socket = bob.client.session_id();

    bob.session.leave(false).await.unwrap();
    settle().await;

    // Connections closed and capture released before leaving
    assert!(bob.factory.created().iter().all(|e| e.is_closed()));
    assert!(bob.capture.opened().iter().all(|t| t.is_ended()));
    assert_eq!(relay.sent_kinds(&bob_socket).last(), Some(&EnvelopeKind::Leave));
    assert_eq!(
        membership.calls().last(),
        Some(&MembershipCall::Leave {
            meeting_id,
            user_id: UserId::from("bob"),
        })
    );

    let state = bob.state().await;
    assert_eq!(state.phase, SessionPhase::Lobby);
    assert!(state.meeting_id.is_none());
    assert!(state.roster.is_empty());

    assert!(alice.media_state().await.connections.is_empty());
    assert_eq!(alice.state().await.phase, SessionPhase::InRoom);

    alice.shutdown().await;
    bob.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_host_must_confirm_ending() {
    let relay = LocalRelay::new();
    let membership = MockMembership::new();
    let (mut alice, mut bob, meeting_id) = meeting_of_two(&relay, &membership).await;
    alice.drain_notices();
    bob.drain_notices();

    let err = alice.session.leave(false).await.unwrap_err();
    assert!(matches!(err, ClientError::HostConfirmationRequired));
    assert_eq!(alice.state().await.phase, SessionPhase::InRoom);
    assert_eq!(alice.media_state().await.connections.len(), 1);

    alice.session.leave(true).await.unwrap();
    settle().await;

    assert_eq!(
        relay.sent_kinds(&alice.client.session_id()).last(),
        Some(&EnvelopeKind::EndMeeting)
    );
    assert_eq!(
        membership.calls().last(),
        Some(&MembershipCall::End {
            meeting_id,
            user_id: UserId::from("alice"),
        })
    );
    assert_eq!(alice.state().await.phase, SessionPhase::Lobby);
    assert!(alice.drain_notices().contains(&SessionNotice::MeetingEnded));

    // The other participant is sent back to the lobby
    let state = bob.state().await;
    assert_eq!(state.phase, SessionPhase::Lobby);
    assert!(state.meeting_id.is_none());
    assert!(bob.media_state().await.connections.is_empty());
    assert!(bob.drain_notices().contains(&SessionNotice::MeetingEndedByHost));

    alice.shutdown().await;
    bob.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_meeting_ended_for_other_meeting_is_ignored() {
    let relay = LocalRelay::new();
    let membership = MockMembership::new();
    let (alice, bob, _) = meeting_of_two(&relay, &membership).await;

    bob.client
        .inject(SignalingEvent::Envelope(SignalingEnvelope::MeetingEnded(
            MeetingEnded {
                meeting_id: MeetingId::from("some-other-meeting"),
            },
        )))
        .await;

    assert_eq!(bob.state().await.phase, SessionPhase::InRoom);
    assert_eq!(bob.media_state().await.connections.len(), 1);

    alice.shutdown().await;
    bob.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_membership_failure_on_leave_still_cleans_up() {
    let relay = LocalRelay::new();
    let membership = MockMembership::new();
    let (alice, mut bob, _) = meeting_of_two(&relay, &membership).await;
    membership.fail(MembershipOp::Leave);
    bob.drain_notices();

    bob.session.leave(false).await.unwrap();

    assert_eq!(bob.state().await.phase, SessionPhase::Lobby);
    assert!(bob.media_state().await.connections.is_empty());
    assert!(bob
        .drain_notices()
        .contains(&SessionNotice::AdministrativeFailure {
            message: "Internal server error".to_string(),
        }));

    alice.shutdown().await;
    bob.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_in_room_leaves_without_ending() {
    let relay = LocalRelay::new();
    let membership = MockMembership::new();
    let (alice, bob, meeting_id) = meeting_of_two(&relay, &membership).await;

    alice.shutdown().await;

    let calls = membership.calls();
    assert!(calls.contains(&MembershipCall::Leave {
        meeting_id: meeting_id.clone(),
        user_id: UserId::from("alice"),
    }));
    assert!(!calls
        .iter()
        .any(|c| matches!(c, MembershipCall::End { .. })));

    bob.shutdown().await;
}

// ============================================================================
// Local media and status
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_capture_failure_joins_receive_only() {
    let relay = LocalRelay::new();
    let membership = MockMembership::new().with_meeting("m-1", "carol");
    let mut bob = SessionHarness::signed_in(&relay, &membership, "bob");
    bob.capture.deny_microphone(true);
    bob.capture.deny_camera(true);

    bob.session.join_meeting(MeetingId::from("m-1")).await.unwrap();

    let state = bob.state().await;
    assert_eq!(state.phase, SessionPhase::InRoom);
    assert!(state.flags.is_muted);
    assert!(state.flags.is_video_off);
    assert!(bob
        .drain_notices()
        .iter()
        .any(|n| matches!(n, SessionNotice::CaptureUnavailable { .. })));

    let updates = status_updates(&relay, &bob);
    assert_eq!(updates.len(), 1);
    assert!(updates[0].is_muted && updates[0].is_video_off);

    bob.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_toggles_publish_status_once() {
    let relay = LocalRelay::new();
    let membership = MockMembership::new();
    let (alice, bob, _) = meeting_of_two(&relay, &membership).await;

    alice.session.set_audio_enabled(false).await.unwrap();
    alice.session.set_audio_enabled(false).await.unwrap();
    alice.session.set_video_enabled(false).await.unwrap();
    settle().await;

    let updates = status_updates(&relay, &alice);
    assert_eq!(updates.len(), 3);
    assert!(updates[1].is_muted && !updates[1].is_video_off);
    assert!(updates[2].is_muted && updates[2].is_video_off);

    // Bob sees the flags on alice's participant entry
    let alice_socket = alice.client.session_id();
    let view = bob.media_state().await;
    let flags = view.participant(&alice_socket).unwrap().flags;
    assert!(flags.is_muted);
    assert!(flags.is_video_off);

    alice.shutdown().await;
    bob.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_screen_share_ended_externally_is_published() {
    let relay = LocalRelay::new();
    let membership = MockMembership::new();
    let (alice, bob, _) = meeting_of_two(&relay, &membership).await;

    alice.session.start_screen_share().await.unwrap();
    assert!(alice.state().await.flags.is_screen_sharing);

    alice.capture.last(TrackSource::Screen).unwrap().stop();
    settle().await;
    assert!(!alice.media_state().await.local_media.screen_sharing);

    // The session picks the change up on its next roster poll
    advance(Duration::from_secs(10)).await;
    assert!(!alice.state().await.flags.is_screen_sharing);
    let updates = status_updates(&relay, &alice);
    assert!(updates.last().is_some_and(|f| !f.is_screen_sharing));
    assert!(updates.iter().any(|f| f.is_screen_sharing));

    alice.shutdown().await;
    bob.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_roster_refreshed_periodically() {
    let relay = LocalRelay::new();
    let membership = MockMembership::new();
    let alice = SessionHarness::signed_in(&relay, &membership, "alice");
    let meeting_id = alice.session.create_meeting("standup").await.unwrap();
    assert_eq!(alice.state().await.roster.len(), 1);

    let bob = SessionHarness::signed_in(&relay, &membership, "bob");
    bob.session.join_meeting(meeting_id).await.unwrap();
    assert_eq!(bob.state().await.roster.len(), 2);

    advance(Duration::from_secs(10)).await;
    let roster = alice.state().await.roster;
    assert_eq!(roster.len(), 2);
    assert!(roster.iter().any(|p| p.user_id == UserId::from("bob")));

    alice.shutdown().await;
    bob.shutdown().await;
}

// ============================================================================
// Chat
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_chat_delivered_to_everyone_with_unread_count() {
    let relay = LocalRelay::new();
    let membership = MockMembership::new();
    let (alice, mut bob, _) = meeting_of_two(&relay, &membership).await;
    bob.drain_notices();

    alice.session.send_chat("  hello everyone  ").await.unwrap();
    settle().await;

    let alice_state = alice.state().await;
    assert_eq!(alice_state.chat_messages, 1);
    assert_eq!(alice_state.unread_chat, 0);

    let bob_state = bob.state().await;
    assert_eq!(bob_state.chat_messages, 1);
    assert_eq!(bob_state.unread_chat, 1);

    let received: Vec<_> = bob
        .drain_notices()
        .into_iter()
        .filter_map(|n| match n {
            SessionNotice::ChatReceived(chat) => Some(chat),
            _ => None,
        })
        .collect();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].message, "hello everyone");
    assert_eq!(received[0].user_id, UserId::from("alice"));
    assert_eq!(received[0].username, "alice");

    assert_eq!(bob.session.set_chat_open(true).await.unwrap(), 0);

    assert!(matches!(
        alice.session.send_chat("   ").await.unwrap_err(),
        ClientError::InvalidState(_)
    ));

    alice.shutdown().await;
    bob.shutdown().await;
}

// ============================================================================
// Signaling recovery
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_reconnected_signaling_rejoins_room() {
    let relay = LocalRelay::new();
    let membership = MockMembership::new();
    let (alice, bob, _) = meeting_of_two(&relay, &membership).await;
    let old_socket = alice.client.session_id();
    let bob_socket = bob.client.session_id();

    relay.reconnect(&alice.client).await;
    advance(Duration::from_millis(200)).await;

    let new_socket = alice.client.session_id();
    assert_ne!(old_socket, new_socket);
    assert_eq!(
        relay.sent_kinds(&new_socket),
        vec![EnvelopeKind::Join, EnvelopeKind::MediaStatusUpdate, EnvelopeKind::Answer]
    );

    // Bob dropped the old session and offered to the new one
    let bob_view = bob.media_state().await;
    assert!(bob_view.connection(&old_socket).is_none());
    assert!(bob_view.connection(&new_socket).unwrap().is_initiator);

    let alice_view = alice.media_state().await;
    assert_eq!(alice_view.connections.len(), 1);
    assert!(!alice_view.connection(&bob_socket).unwrap().is_initiator);
    assert_eq!(alice.state().await.phase, SessionPhase::InRoom);

    alice.shutdown().await;
    bob.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_signaling_loss_is_reported() {
    let relay = LocalRelay::new();
    let membership = MockMembership::new();
    let (mut alice, bob, _) = meeting_of_two(&relay, &membership).await;

    relay.close(&alice.client).await;
    settle().await;

    assert!(alice.drain_notices().contains(&SessionNotice::SignalingLost));
    assert!(bob.media_state().await.connections.is_empty());

    alice.shutdown().await;
    bob.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_force_reconnect_leaves_and_rejoins() {
    let relay = LocalRelay::new();
    let membership = MockMembership::new();
    let (alice, bob, _) = meeting_of_two(&relay, &membership).await;
    let alice_socket = alice.client.session_id();
    let first_bob_side = bob.factory.latest(&alice_socket).unwrap();

    alice.session.set_audio_enabled(false).await.unwrap();
    alice.session.force_reconnect().await.unwrap();
    let joins = |relay: &LocalRelay| {
        relay
            .sent_kinds(&alice_socket)
            .iter()
            .filter(|k| **k == EnvelopeKind::Join)
            .count()
    };

    // The session keeps serving requests while the leave delay runs
    advance(Duration::from_millis(200)).await;
    assert_eq!(alice.state().await.phase, SessionPhase::InRoom);
    assert!(!relay.sent_kinds(&alice_socket).contains(&EnvelopeKind::Leave));

    advance(Duration::from_millis(900)).await;
    assert!(relay.sent_kinds(&alice_socket).contains(&EnvelopeKind::Leave));
    assert_eq!(joins(&relay), 1);

    advance(Duration::from_millis(500)).await;
    assert_eq!(joins(&relay), 2);
    advance(Duration::from_millis(200)).await;

    let kinds = relay.sent_kinds(&alice_socket);
    let leave = kinds.iter().rposition(|k| *k == EnvelopeKind::Leave).unwrap();
    let join = kinds.iter().rposition(|k| *k == EnvelopeKind::Join).unwrap();
    assert!(leave < join);

    // Local media was restarted and the mute reset
    assert_eq!(alice.capture.opened_count(TrackSource::Microphone), 2);
    assert!(!alice.state().await.flags.is_muted);

    // Bob rebuilt the connection as offerer
    assert!(first_bob_side.is_closed());
    let bob_view = bob.media_state().await;
    let conn = bob_view.connection(&alice_socket).unwrap();
    assert!(conn.is_initiator);
    assert_eq!(alice.media_state().await.connections.len(), 1);

    alice.shutdown().await;
    bob.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_meeting_ended_during_reconnect_cancels_rejoin() {
    let relay = LocalRelay::new();
    let membership = MockMembership::new();
    let (alice, mut bob, _) = meeting_of_two(&relay, &membership).await;
    let bob_socket = bob.client.session_id();

    bob.session.force_reconnect().await.unwrap();
    let sent_before = relay.sent_kinds(&bob_socket).len();
    bob.drain_notices();

    advance(Duration::from_millis(300)).await;
    alice.session.leave(true).await.unwrap();
    settle().await;
    assert_eq!(bob.state().await.phase, SessionPhase::Lobby);
    assert!(bob.drain_notices().contains(&SessionNotice::MeetingEndedByHost));

    advance(Duration::from_secs(3)).await;
    let kinds = relay.sent_kinds(&bob_socket);
    let after = &kinds[sent_before..];
    assert!(!after.contains(&EnvelopeKind::Leave));
    assert!(!after.contains(&EnvelopeKind::Join));
    assert_eq!(bob.state().await.phase, SessionPhase::Lobby);

    alice.shutdown().await;
    bob.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_during_reconnect_is_prompt() {
    let relay = LocalRelay::new();
    let membership = MockMembership::new();
    let (alice, bob, meeting_id) = meeting_of_two(&relay, &membership).await;

    bob.session.force_reconnect().await.unwrap();
    advance(Duration::from_millis(100)).await;

    let started = tokio::time::Instant::now();
    bob.shutdown().await;
    assert!(started.elapsed() < Duration::from_millis(100));
    assert!(membership.calls().contains(&MembershipCall::Leave {
        meeting_id,
        user_id: UserId::from("bob"),
    }));

    alice.shutdown().await;
}
