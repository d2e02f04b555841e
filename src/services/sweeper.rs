//! Heartbeat sweeper — evicts silently disconnected clients.
//!
//! DESIGN
//! ======
//! A background task scans the connection registry on a fixed interval and
//! tears down any connection whose heartbeat has gone stale, reusing the
//! same idempotent disconnect path as an explicit close so a swept peer is
//! announced with exactly one `participant-left`. The same pass resets a
//! stale AI status back to idle.
//!
//! A missed heartbeat is a liveness fault, not an error: it is logged and
//! announced as a normal departure. Worst-case staleness is bounded by
//! `heartbeat_timeout + sweep_interval`.

use std::time::Instant;

use tokio::task::JoinHandle;
use tracing::info;

use crate::services::session;
use crate::services::presence::AiStatus;
use crate::state::AppState;

/// Spawn the background sweeper task. Returns a handle for shutdown.
pub fn spawn_sweeper_task(state: AppState) -> JoinHandle<()> {
    let interval = state.config.sweep_interval;
    info!(
        sweep_interval_secs = interval.as_secs(),
        heartbeat_timeout_secs = state.config.heartbeat_timeout.as_secs(),
        "heartbeat sweeper configured"
    );
    tokio::spawn(async move {
        loop {
            sweep_at(&state, Instant::now()).await;
            tokio::time::sleep(interval).await;
        }
    })
}

/// One sweep pass at an explicit instant, so tests can simulate time
/// advancement instead of sleeping.
pub(crate) async fn sweep_at(state: &AppState, now: Instant) {
    for conn in state
        .registry
        .list_expired(now, state.config.heartbeat_timeout)
    {
        info!(
            connection_id = %conn.connection_id,
            participant_id = conn.participant_id.as_deref().unwrap_or("-"),
            "heartbeat expired; evicting connection"
        );
        session::disconnect(state, conn.connection_id).await;
    }

    reset_stale_ai(state, now).await;
}

/// Reset any room's AI status to idle once it has been inactive past the
/// configured window, announcing the reset like any other AI transition.
async fn reset_stale_ai(state: &AppState, now: Instant) {
    let stale: Vec<String> = {
        let rooms = state.rooms.read().await;
        let mut out = Vec::new();
        for (session_id, handle) in rooms.iter() {
            let room = handle.lock().await;
            if room.ai.idle_expired(now, state.config.ai_idle_timeout) {
                out.push(session_id.clone());
            }
        }
        out
    };

    for session_id in stale {
        session::set_ai_status_at(state, &session_id, AiStatus::Idle, now).await;
    }
}

#[cfg(test)]
#[path = "sweeper_test.rs"]
mod tests;
