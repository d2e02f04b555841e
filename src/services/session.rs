//! Session presence coordinator — join/leave/typing/status/AI protocol.
//!
//! ARCHITECTURE
//! ============
//! The coordinator is the only component that touches more than one shared
//! structure per operation, always in the fixed order registry -> room
//! directory -> presence store. State mutation and fan-out for one event
//! happen under the same room mutex, so each room sees a strict total order
//! of membership changes and the broadcasts they cause.
//!
//! ERROR HANDLING
//! ==============
//! Events referencing a session or membership that no longer exists are
//! benign no-ops: transport-level races (a late typing event after a leave,
//! a sweep racing an explicit close) must never crash the coordinator.

use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::frame::{Data, Frame, now_ms};
use crate::services::dispatch::fan_out;
use crate::services::presence::{AiStatus, ParticipantStatus, PresenceRecord};
use crate::services::room;
use crate::state::AppState;

// =============================================================================
// ERRORS
// =============================================================================

/// Protocol errors, reported to the originating connection only and never
/// broadcast.
#[derive(Debug, thiserror::Error)]
pub enum PresenceError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("unknown status: {0}")]
    UnknownStatus(String),
}

impl crate::frame::ErrorCode for PresenceError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::MissingField(_) => "E_MISSING_FIELD",
            Self::UnknownStatus(_) => "E_BAD_STATUS",
        }
    }
}

// =============================================================================
// JOIN / LEAVE
// =============================================================================

/// Join a session, creating the room if absent. Announces the arrival to
/// existing members and returns the presence snapshot the joiner should see.
///
/// The snapshot is taken under the same room lock as the membership insert,
/// so no broadcast issued after this join can precede it at the joiner.
pub async fn join_session(
    state: &AppState,
    session_id: &str,
    participant_id: &str,
    connection_id: Uuid,
    tx: mpsc::Sender<Frame>,
) -> Vec<PresenceRecord> {
    state.registry.set_session(connection_id, session_id, participant_id);

    // The empty-room GC can collect a room between resolving its handle and
    // locking it, which would leave this insert in an orphaned `RoomState`
    // no peer can see. Validate the handle is still the arena's after the
    // insert and retry against the live room if it was collected underneath.
    loop {
        let handle = room::resolve_or_create(state, session_id).await;

        let (snapshot, members) = {
            let mut room = handle.lock().await;

            let ts = now_ms();
            let newly_online = room.presence.get(participant_id).is_none();

            room::insert_member(&mut room, connection_id, participant_id, tx.clone());
            room.presence.upsert(participant_id, ts, |_| {});

            // A second connection for an already-present participant joins quietly.
            if newly_online {
                let joined = participant_event("participant-joined", session_id, participant_id, ts);
                fan_out(&room, &joined, Some(connection_id));
            }

            let snapshot: Vec<PresenceRecord> = room
                .presence
                .snapshot()
                .into_iter()
                .filter(|r| r.participant_id != participant_id)
                .collect();
            (snapshot, room.clients.len())
        };

        if room::is_current(state, session_id, &handle).await {
            info!(session_id, participant_id, %connection_id, members, "participant joined session");
            return snapshot;
        }
    }
}

/// Remove a connection from a session. Idempotent: a second leave for the
/// same connection has no membership or broadcast effect. Returns whether a
/// departure actually happened.
pub async fn leave_session(state: &AppState, session_id: &str, connection_id: Uuid) -> bool {
    let Some(handle) = room::resolve(state, session_id).await else {
        return false;
    };

    let now_empty = {
        let mut room = handle.lock().await;
        let Some(departure) = room::remove_member(&mut room, connection_id) else {
            return false;
        };

        // Recipients are the members remaining at the moment of removal,
        // which is exactly the pre-removal set minus the leaver.
        if departure.last_for_participant {
            room.presence.remove(&departure.participant_id);
            let ts = now_ms();
            let left = participant_event("participant-left", session_id, &departure.participant_id, ts);
            fan_out(&room, &left, Some(connection_id));
        }

        info!(
            session_id,
            participant_id = %departure.participant_id,
            %connection_id,
            remaining = room.clients.len(),
            "participant left session"
        );
        departure.now_empty
    };

    if now_empty {
        room::remove_if_empty(state, session_id).await;
    }
    true
}

/// Tear down a connection entirely: registry entry plus any room membership.
/// Shared by the explicit close path and the heartbeat sweeper; both can run
/// concurrently and the loser of the registry race does nothing.
pub async fn disconnect(state: &AppState, connection_id: Uuid) {
    let Some(conn) = state.registry.unregister(connection_id) else {
        return;
    };
    if let Some(session_id) = conn.session_id {
        leave_session(state, &session_id, connection_id).await;
    }
}

// =============================================================================
// TYPING / STATUS
// =============================================================================

/// Flip the typing flag for the participant behind a connection and relay
/// the change to the rest of the room.
pub async fn set_typing(state: &AppState, session_id: &str, connection_id: Uuid, is_typing: bool) {
    let Some(handle) = room::resolve(state, session_id).await else {
        return;
    };
    let mut room = handle.lock().await;
    let Some(participant_id) = room.participants.get(&connection_id).cloned() else {
        return;
    };

    // A stop with no prior start is recovered by the clamp below; note it.
    if !is_typing && room.presence.get(&participant_id).is_none_or(|r| !r.is_typing) {
        warn!(session_id, participant_id, "typing-stop without typing-start; clamping to idle");
    }

    let ts = now_ms();
    let record = room.presence.upsert(&participant_id, ts, |r| {
        r.is_typing = is_typing;
        r.status = if is_typing { ParticipantStatus::Typing } else { ParticipantStatus::Idle };
    });

    let frame = participant_event("participant-typing", session_id, &participant_id, ts)
        .with_data("isTyping", record.is_typing);
    fan_out(&room, &frame, Some(connection_id));
}

/// Apply a validated status update and relay it to the rest of the room.
pub async fn set_status(state: &AppState, session_id: &str, connection_id: Uuid, status: ParticipantStatus) {
    let Some(handle) = room::resolve(state, session_id).await else {
        return;
    };
    let mut room = handle.lock().await;
    let Some(participant_id) = room.participants.get(&connection_id).cloned() else {
        return;
    };

    let ts = now_ms();
    room.presence.upsert(&participant_id, ts, |r| {
        r.status = status;
        if status == ParticipantStatus::Typing {
            r.is_typing = true;
        }
    });

    let frame = participant_event("participant-status", session_id, &participant_id, ts)
        .with_data("status", status.as_str());
    fan_out(&room, &frame, Some(connection_id));
}

// =============================================================================
// AI STATUS
// =============================================================================

/// Update the session-level AI status and relay it to every member. The AI
/// has no originating connection, so nobody is excluded from the fan-out.
pub async fn set_ai_status(state: &AppState, session_id: &str, status: AiStatus) {
    set_ai_status_at(state, session_id, status, Instant::now()).await;
}

pub(crate) async fn set_ai_status_at(state: &AppState, session_id: &str, status: AiStatus, now: Instant) {
    let Some(handle) = room::resolve(state, session_id).await else {
        return;
    };
    let mut room = handle.lock().await;
    room.ai.set(status, now);

    let frame = Frame::request("ai-status", Data::new())
        .with_session_id(session_id)
        .with_data("status", status.as_str())
        .with_data("timestamp", now_ms());
    fan_out(&room, &frame, None);

    info!(session_id, status = status.as_str(), "ai status changed");
}

// =============================================================================
// HEARTBEAT
// =============================================================================

/// Record liveness. Purely a registry touch: no broadcast, so a heartbeat
/// storm can never become a fan-out storm.
pub fn heartbeat(state: &AppState, connection_id: Uuid) {
    state.registry.touch(connection_id);
}

// =============================================================================
// HELPERS
// =============================================================================

fn participant_event(event: &str, session_id: &str, participant_id: &str, ts: i64) -> Frame {
    Frame::request(event, Data::new())
        .with_session_id(session_id)
        .with_from(participant_id)
        .with_data("participantId", participant_id)
        .with_data("timestamp", ts)
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
