//! Broadcast dispatcher — best-effort fan-out within one room.
//!
//! DESIGN
//! ======
//! Delivery is fire-and-forget: `try_send` into each recipient's bounded
//! channel. A recipient whose channel is full or closed is dropped silently
//! and reconciled by the next heartbeat sweep; the dispatcher never retries.
//! Per-room ordering holds because every fan-out call happens under the
//! room's mutex, so frames enter each recipient channel in event order.

use uuid::Uuid;

use crate::frame::Frame;
use crate::state::RoomState;

/// Deliver a frame to every member of the room, optionally excluding the
/// originating connection. Returns the number of successful deliveries.
pub fn fan_out(room: &RoomState, frame: &Frame, exclude: Option<Uuid>) -> usize {
    let mut delivered = 0;
    for (connection_id, tx) in &room.clients {
        if exclude == Some(*connection_id) {
            continue;
        }
        if tx.try_send(frame.clone()).is_ok() {
            delivered += 1;
        }
    }
    delivered
}

#[cfg(test)]
#[path = "dispatch_test.rs"]
mod tests;
