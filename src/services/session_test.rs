use super::*;
use crate::state::test_helpers::{self, join_member, room_count};
use tokio::sync::mpsc::Receiver;
use tokio::time::{Duration, timeout};

async fn recv_event(rx: &mut Receiver<Frame>) -> Frame {
    timeout(Duration::from_millis(500), rx.recv())
        .await
        .expect("broadcast receive timed out")
        .expect("broadcast channel closed unexpectedly")
}

async fn assert_no_event(rx: &mut Receiver<Frame>) {
    assert!(
        timeout(Duration::from_millis(80), rx.recv()).await.is_err(),
        "expected no broadcast frame"
    );
}

#[tokio::test]
async fn join_announces_to_peers_but_not_joiner() {
    let state = test_helpers::test_app_state();
    let (_a, mut rx_a) = join_member(&state, "s1", "alice").await;

    let (_b, mut rx_b) = join_member(&state, "s1", "bob").await;

    let joined = recv_event(&mut rx_a).await;
    assert_eq!(joined.event, "participant-joined");
    assert_eq!(joined.data.get("participantId").and_then(|v| v.as_str()), Some("bob"));
    assert!(joined.data.get("timestamp").is_some());

    assert_no_event(&mut rx_b).await;
}

#[tokio::test]
async fn join_snapshot_contains_existing_members_only() {
    let state = test_helpers::test_app_state();

    let conn_a = Uuid::new_v4();
    let (tx_a, _rx_a) = tokio::sync::mpsc::channel(8);
    state.registry.register(conn_a);
    let first_snapshot = join_session(&state, "s1", "alice", conn_a, tx_a).await;
    assert!(first_snapshot.is_empty());

    let conn_b = Uuid::new_v4();
    let (tx_b, _rx_b) = tokio::sync::mpsc::channel(8);
    state.registry.register(conn_b);
    let second_snapshot = join_session(&state, "s1", "bob", conn_b, tx_b).await;

    assert_eq!(second_snapshot.len(), 1);
    let record = &second_snapshot[0];
    assert_eq!(record.participant_id, "alice");
    assert!(record.is_online);
    assert_eq!(record.status, ParticipantStatus::Idle);
}

#[tokio::test]
async fn typing_excludes_sender_and_flips_flag() {
    let state = test_helpers::test_app_state();
    let (conn_a, mut rx_a) = join_member(&state, "s1", "alice").await;
    let (_b, mut rx_b) = join_member(&state, "s1", "bob").await;
    recv_event(&mut rx_a).await; // bob's participant-joined

    set_typing(&state, "s1", conn_a, true).await;

    let typing = recv_event(&mut rx_b).await;
    assert_eq!(typing.event, "participant-typing");
    assert_eq!(typing.data.get("participantId").and_then(|v| v.as_str()), Some("alice"));
    assert_eq!(typing.data.get("isTyping").and_then(serde_json::Value::as_bool), Some(true));
    assert_no_event(&mut rx_a).await;

    set_typing(&state, "s1", conn_a, false).await;
    let stopped = recv_event(&mut rx_b).await;
    assert_eq!(stopped.data.get("isTyping").and_then(serde_json::Value::as_bool), Some(false));
}

#[tokio::test]
async fn typing_stop_without_start_clamps_to_idle() {
    let state = test_helpers::test_app_state();
    let (conn_a, _rx_a) = join_member(&state, "s1", "alice").await;
    let (_b, mut rx_b) = join_member(&state, "s1", "bob").await;

    // Out-of-order typing-stop: recovered by clamping, relayed normally.
    set_typing(&state, "s1", conn_a, false).await;

    let frame = recv_event(&mut rx_b).await;
    assert_eq!(frame.event, "participant-typing");
    assert_eq!(frame.data.get("isTyping").and_then(serde_json::Value::as_bool), Some(false));

    let handle = room::resolve(&state, "s1").await.expect("room exists");
    let room = handle.lock().await;
    let record = room.presence.get("alice").expect("record exists");
    assert_eq!(record.status, ParticipantStatus::Idle);
    assert!(!record.is_typing);
}

#[tokio::test]
async fn status_update_broadcasts_and_clears_typing() {
    let state = test_helpers::test_app_state();
    let (conn_a, _rx_a) = join_member(&state, "s1", "alice").await;
    let (_b, mut rx_b) = join_member(&state, "s1", "bob").await;

    set_typing(&state, "s1", conn_a, true).await;
    recv_event(&mut rx_b).await;

    set_status(&state, "s1", conn_a, ParticipantStatus::Away).await;

    let status = recv_event(&mut rx_b).await;
    assert_eq!(status.event, "participant-status");
    assert_eq!(status.data.get("status").and_then(|v| v.as_str()), Some("away"));

    let handle = room::resolve(&state, "s1").await.expect("room exists");
    let room = handle.lock().await;
    let record = room.presence.get("alice").expect("record exists");
    assert!(!record.is_typing, "moving off typing must clear the flag");
}

#[tokio::test]
async fn ai_status_reaches_all_members() {
    let state = test_helpers::test_app_state();
    let (_a, mut rx_a) = join_member(&state, "s1", "alice").await;
    let (_b, mut rx_b) = join_member(&state, "s1", "bob").await;
    recv_event(&mut rx_a).await; // bob's participant-joined

    set_ai_status(&state, "s1", AiStatus::Thinking).await;

    for rx in [&mut rx_a, &mut rx_b] {
        let frame = recv_event(rx).await;
        assert_eq!(frame.event, "ai-status");
        assert_eq!(frame.data.get("status").and_then(|v| v.as_str()), Some("thinking"));
        assert!(frame.from.is_none(), "ai status is not attributed to a participant");
    }
}

#[tokio::test]
async fn ai_status_for_unknown_session_is_noop() {
    let state = test_helpers::test_app_state();
    set_ai_status(&state, "ghost", AiStatus::Responding).await;
    assert_eq!(room_count(&state).await, 0);
}

#[tokio::test]
async fn leave_announces_to_remaining_members() {
    let state = test_helpers::test_app_state();
    let (conn_a, mut rx_a) = join_member(&state, "s1", "alice").await;
    let (_b, mut rx_b) = join_member(&state, "s1", "bob").await;
    recv_event(&mut rx_a).await;

    assert!(leave_session(&state, "s1", conn_a).await);

    let left = recv_event(&mut rx_b).await;
    assert_eq!(left.event, "participant-left");
    assert_eq!(left.data.get("participantId").and_then(|v| v.as_str()), Some("alice"));
}

#[tokio::test]
async fn leave_twice_has_effects_of_exactly_one() {
    let state = test_helpers::test_app_state();
    let (conn_a, _rx_a) = join_member(&state, "s1", "alice").await;
    let (_b, mut rx_b) = join_member(&state, "s1", "bob").await;

    assert!(leave_session(&state, "s1", conn_a).await);
    assert!(!leave_session(&state, "s1", conn_a).await);

    let left = recv_event(&mut rx_b).await;
    assert_eq!(left.event, "participant-left");
    assert_no_event(&mut rx_b).await;
}

#[tokio::test]
async fn last_leave_collects_the_room() {
    let state = test_helpers::test_app_state();
    let (conn_a, _rx_a) = join_member(&state, "s1", "alice").await;
    let (conn_b, _rx_b) = join_member(&state, "s1", "bob").await;

    leave_session(&state, "s1", conn_a).await;
    assert_eq!(room_count(&state).await, 1);

    leave_session(&state, "s1", conn_b).await;
    assert_eq!(room_count(&state).await, 0);
}

#[tokio::test]
async fn leave_for_unknown_session_is_noop() {
    let state = test_helpers::test_app_state();
    assert!(!leave_session(&state, "ghost", Uuid::new_v4()).await);
}

#[tokio::test]
async fn second_connection_of_same_participant_joins_and_leaves_quietly() {
    let state = test_helpers::test_app_state();
    let (_a1, _rx_a1) = join_member(&state, "s1", "alice").await;
    let (_b, mut rx_b) = join_member(&state, "s1", "bob").await;

    // Second tab for alice: no duplicate participant-joined.
    let (conn_a2, _rx_a2) = join_member(&state, "s1", "alice").await;
    assert_no_event(&mut rx_b).await;

    // Closing the second tab: alice still has a live connection, no
    // participant-left and her presence record survives.
    leave_session(&state, "s1", conn_a2).await;
    assert_no_event(&mut rx_b).await;

    let handle = room::resolve(&state, "s1").await.expect("room exists");
    let room = handle.lock().await;
    assert!(room.presence.get("alice").is_some());
}

#[tokio::test]
async fn join_after_room_collection_lands_in_the_live_room() {
    let state = test_helpers::test_app_state();

    // A handle resolved before the empty-room GC runs is an orphan
    // afterwards; a join must never leave its membership there.
    let stale = room::resolve_or_create(&state, "s1").await;
    room::remove_if_empty(&state, "s1").await;

    let (conn_b, _rx_b) = join_member(&state, "s1", "bob").await;

    let live = room::resolve(&state, "s1").await.expect("room exists in arena");
    assert!(room::is_current(&state, "s1", &live).await);
    assert!(live.lock().await.participants.contains_key(&conn_b));
    assert!(stale.lock().await.participants.is_empty(), "orphan must hold no members");
}

#[tokio::test]
async fn join_racing_last_leave_never_strands_the_joiner() {
    let state = test_helpers::test_app_state();

    for _ in 0..200 {
        let (conn_a, _rx_a) = join_member(&state, "s1", "alice").await;

        let leaver = {
            let state = state.clone();
            tokio::spawn(async move { leave_session(&state, "s1", conn_a).await })
        };
        let (conn_b, _rx_b) = join_member(&state, "s1", "bob").await;
        leaver.await.expect("leave task");

        // However the last-leave and the join interleave, the joiner ends up
        // a member of the room the arena maps, never an orphaned handle.
        let handle = room::resolve(&state, "s1").await.expect("room exists in arena");
        {
            let room = handle.lock().await;
            assert_eq!(room.participants.get(&conn_b).map(String::as_str), Some("bob"));
            assert!(room.presence.get("bob").is_some());
        }

        disconnect(&state, conn_a).await;
        disconnect(&state, conn_b).await;
        assert_eq!(room_count(&state).await, 0);
    }
}

#[tokio::test]
async fn disconnect_unregisters_and_leaves() {
    let state = test_helpers::test_app_state();
    let (conn_a, _rx_a) = join_member(&state, "s1", "alice").await;
    let (_b, mut rx_b) = join_member(&state, "s1", "bob").await;

    disconnect(&state, conn_a).await;

    assert!(state.registry.get(conn_a).is_none());
    let left = recv_event(&mut rx_b).await;
    assert_eq!(left.event, "participant-left");

    // Racing teardown: second disconnect is a no-op.
    disconnect(&state, conn_a).await;
    assert_no_event(&mut rx_b).await;
}

#[tokio::test]
async fn typing_from_non_member_connection_is_noop() {
    let state = test_helpers::test_app_state();
    let (_a, mut rx_a) = join_member(&state, "s1", "alice").await;

    set_typing(&state, "s1", Uuid::new_v4(), true).await;

    assert_no_event(&mut rx_a).await;
}

#[tokio::test]
async fn unrelated_rooms_do_not_interfere() {
    let state = test_helpers::test_app_state();
    let (conn_a, _rx_a) = join_member(&state, "s1", "alice").await;
    let (_b, mut rx_b) = join_member(&state, "s2", "bob").await;

    set_typing(&state, "s1", conn_a, true).await;

    assert_no_event(&mut rx_b).await;
    assert_eq!(room_count(&state).await, 2);
}
