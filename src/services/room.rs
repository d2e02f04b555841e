//! Room directory — session-id-keyed membership over the arena of rooms.
//!
//! DESIGN
//! ======
//! Rooms are created implicitly on first join and garbage-collected when
//! their member set empties. The outer map lock is only ever held to resolve
//! or insert a room handle; all member mutation happens under the room's own
//! mutex, acquired after the map lock is released. Lock order is therefore
//! always map-then-room, and empty-room removal re-checks emptiness after
//! re-acquiring both.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::info;
use uuid::Uuid;

use crate::frame::Frame;
use crate::state::{AppState, RoomHandle, RoomState};

/// Result of removing a member connection from a room.
#[derive(Debug)]
pub struct Departure {
    pub participant_id: String,
    /// True when no other connection for the same participant remains, i.e.
    /// the participant has actually left the session.
    pub last_for_participant: bool,
    /// True when the room has no members left and should be collected.
    pub now_empty: bool,
}

/// Resolve an existing room handle, if any.
pub async fn resolve(state: &AppState, session_id: &str) -> Option<RoomHandle> {
    state.rooms.read().await.get(session_id).cloned()
}

/// Resolve a room handle, creating the room if absent.
pub async fn resolve_or_create(state: &AppState, session_id: &str) -> RoomHandle {
    if let Some(room) = resolve(state, session_id).await {
        return room;
    }
    let mut rooms = state.rooms.write().await;
    rooms
        .entry(session_id.to_string())
        .or_insert_with(RoomHandle::default)
        .clone()
}

/// Whether the arena still maps `session_id` to this exact room. A handle
/// from `resolve_or_create` goes stale if the empty-room GC collects the
/// room before the caller locks it; callers that establish membership must
/// validate after their insert and retry on a stale handle.
#[must_use]
pub async fn is_current(state: &AppState, session_id: &str, handle: &RoomHandle) -> bool {
    state
        .rooms
        .read()
        .await
        .get(session_id)
        .is_some_and(|current| Arc::ptr_eq(current, handle))
}

/// Add a member connection to a room's member set.
pub fn insert_member(
    room: &mut RoomState,
    connection_id: Uuid,
    participant_id: &str,
    tx: mpsc::Sender<Frame>,
) {
    room.clients.insert(connection_id, tx);
    room.participants
        .insert(connection_id, participant_id.to_string());
}

/// Remove a member connection. Returns `None` if the connection was not a
/// member — teardown must be idempotent because an explicit close and a
/// sweep can race to remove the same entry.
pub fn remove_member(room: &mut RoomState, connection_id: Uuid) -> Option<Departure> {
    room.clients.remove(&connection_id)?;
    let participant_id = room.participants.remove(&connection_id)?;

    let last_for_participant = !room
        .participants
        .values()
        .any(|p| *p == participant_id);

    Some(Departure { participant_id, last_for_participant, now_empty: room.clients.is_empty() })
}

/// Drop an empty room from the arena. Emptiness is re-checked under both
/// locks since a new member can join between the caller's observation and
/// this removal.
pub async fn remove_if_empty(state: &AppState, session_id: &str) {
    let mut rooms = state.rooms.write().await;
    let Some(handle) = rooms.get(session_id).cloned() else {
        return;
    };
    let room = handle.lock().await;
    if room.clients.is_empty() {
        rooms.remove(session_id);
        info!(session_id, "collected empty room");
    }
}

#[cfg(test)]
#[path = "room_test.rs"]
mod tests;
