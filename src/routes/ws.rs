//! WebSocket handler — bidirectional frame relay.
//!
//! DESIGN
//! ======
//! On upgrade, generates a connection ID and enters a `select!` loop:
//! - Incoming client frames → parse + dispatch by event name
//! - Broadcast frames from room peers → forward to client
//!
//! Handler functions validate and call into the coordinator, which owns all
//! room-side fan-out; the dispatch layer here only decides what flows back
//! to the sender (`Outcome`).
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → register connection, send `connected` with `connectionId`
//! 2. Client sends frames → dispatch → coordinator mutates + fans out
//! 3. Close → idempotent disconnect (same path the sweeper uses)

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::frame::{Data, Frame};
use crate::services::presence::{AiStatus, ParticipantStatus};
use crate::services::session::{self, PresenceError};
use crate::state::AppState;

// =============================================================================
// OUTCOME
// =============================================================================

/// What flows back to the sender. Room fan-out is the coordinator's job and
/// has already happened by the time a handler returns.
enum Outcome {
    /// Unicast a correlated reply under a new event name (session-state).
    Reply { event: &'static str, data: Data },
    /// Send an empty done acknowledgement.
    Done,
    /// Nothing outbound for the sender (typing, status, heartbeat).
    Silent,
}

// =============================================================================
// UPGRADE
// =============================================================================

/// Auth is the caller's concern: by the time a socket reaches this service
/// the participant is assumed verified.
pub async fn handle_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| run_ws(socket, state))
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(mut socket: WebSocket, state: AppState) {
    let connection_id = Uuid::new_v4();
    state.registry.register(connection_id);

    // Per-connection channel for receiving broadcast frames from peers.
    let (client_tx, mut client_rx) = mpsc::channel::<Frame>(state.config.client_channel_capacity);

    let welcome =
        Frame::request("connected", Data::new()).with_data("connectionId", connection_id.to_string());
    if send_frame(&mut socket, &welcome).await.is_err() {
        state.registry.unregister(connection_id);
        return;
    }

    info!(%connection_id, "ws: client connected");

    // Track which session this connection has joined.
    let mut current_session: Option<String> = None;

    loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(msg) = msg else { break };
                let Ok(msg) = msg else { break };
                match msg {
                    Message::Text(text) => {
                        dispatch_frame(&state, &mut socket, &mut current_session, connection_id, &client_tx, &text).await;
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            Some(frame) = client_rx.recv() => {
                if send_frame(&mut socket, &frame).await.is_err() {
                    break;
                }
            }
        }
    }

    // Same idempotent teardown the sweeper uses; whoever wins the registry
    // race announces the departure.
    session::disconnect(&state, connection_id).await;
    info!(%connection_id, "ws: client disconnected");
}

// =============================================================================
// FRAME DISPATCH
// =============================================================================

/// Parse an incoming JSON frame, dispatch to handler, send sender replies.
async fn dispatch_frame(
    state: &AppState,
    socket: &mut WebSocket,
    current_session: &mut Option<String>,
    connection_id: Uuid,
    client_tx: &mpsc::Sender<Frame>,
    text: &str,
) {
    let sender_frames = process_inbound_text(state, current_session, connection_id, client_tx, text).await;
    for frame in sender_frames {
        let _ = send_frame(socket, &frame).await;
    }
}

/// Parse and process one inbound text frame and return frames for the sender.
///
/// This keeps websocket transport concerns separate from frame handling, so
/// tests can exercise the full protocol without a socket.
async fn process_inbound_text(
    state: &AppState,
    current_session: &mut Option<String>,
    connection_id: Uuid,
    client_tx: &mpsc::Sender<Frame>,
    text: &str,
) -> Vec<Frame> {
    let req: Frame = match serde_json::from_str(text) {
        Ok(r) => r,
        Err(e) => {
            warn!(%connection_id, error = %e, "ws: invalid inbound frame");
            let err = Frame::request("protocol-error", Data::new())
                .with_data("message", format!("invalid json: {e}"));
            return vec![err];
        }
    };

    let is_heartbeat = req.event == "heartbeat";
    if !is_heartbeat {
        info!(%connection_id, id = %req.id, event = %req.event, "ws: recv frame");
    }

    let result = match req.event.as_str() {
        "join-session" => handle_join(state, current_session, connection_id, client_tx, &req).await,
        "typing-start" => handle_typing(state, current_session.as_deref(), connection_id, true).await,
        "typing-stop" => handle_typing(state, current_session.as_deref(), connection_id, false).await,
        "status-update" => handle_status(state, current_session.as_deref(), connection_id, &req).await,
        "ai-thinking" => handle_ai(state, &req, AiStatus::Thinking).await,
        "ai-responding" => handle_ai(state, &req, AiStatus::Responding).await,
        "heartbeat" => {
            session::heartbeat(state, connection_id);
            Ok(Outcome::Silent)
        }
        "leave-session" => handle_leave(state, current_session, connection_id).await,
        other => Err(req.error(format!("unknown event: {other}"))),
    };

    match result {
        Ok(Outcome::Reply { event, data }) => vec![req.done_as(event, data)],
        Ok(Outcome::Done) => vec![req.done()],
        Ok(Outcome::Silent) => vec![],
        Err(err_frame) => vec![err_frame],
    }
}

// =============================================================================
// HANDLERS
// =============================================================================

async fn handle_join(
    state: &AppState,
    current_session: &mut Option<String>,
    connection_id: Uuid,
    client_tx: &mpsc::Sender<Frame>,
    req: &Frame,
) -> Result<Outcome, Frame> {
    let Some(session_id) = session_id_of(req) else {
        return Err(req.error_from(&PresenceError::MissingField("sessionId")));
    };
    let Some(participant_id) = participant_id_of(req) else {
        return Err(req.error_from(&PresenceError::MissingField("participantId")));
    };

    // Leave the current session first if already joined (re-join race).
    if let Some(old_session) = current_session.take() {
        session::leave_session(state, &old_session, connection_id).await;
    }

    let snapshot =
        session::join_session(state, &session_id, &participant_id, connection_id, client_tx.clone()).await;
    *current_session = Some(session_id);

    let mut data = Data::new();
    data.insert("participants".into(), serde_json::to_value(&snapshot).unwrap_or_default());
    Ok(Outcome::Reply { event: "session-state", data })
}

async fn handle_typing(
    state: &AppState,
    current_session: Option<&str>,
    connection_id: Uuid,
    is_typing: bool,
) -> Result<Outcome, Frame> {
    // Typing before joining any session: benign no-op, not an error.
    let Some(session_id) = current_session else {
        return Ok(Outcome::Silent);
    };
    session::set_typing(state, session_id, connection_id, is_typing).await;
    Ok(Outcome::Silent)
}

async fn handle_status(
    state: &AppState,
    current_session: Option<&str>,
    connection_id: Uuid,
    req: &Frame,
) -> Result<Outcome, Frame> {
    let Some(raw) = req.data.get("status").and_then(|v| v.as_str()) else {
        return Err(req.error_from(&PresenceError::MissingField("status")));
    };
    let Some(status) = ParticipantStatus::parse(raw) else {
        warn!(%connection_id, status = raw, "ws: rejected unknown status value");
        return Err(req.error_from(&PresenceError::UnknownStatus(raw.to_string())));
    };

    let Some(session_id) = current_session else {
        return Ok(Outcome::Silent);
    };
    session::set_status(state, session_id, connection_id, status).await;
    Ok(Outcome::Silent)
}

async fn handle_ai(state: &AppState, req: &Frame, status: AiStatus) -> Result<Outcome, Frame> {
    let Some(session_id) = session_id_of(req) else {
        return Err(req.error_from(&PresenceError::MissingField("sessionId")));
    };
    session::set_ai_status(state, &session_id, status).await;
    Ok(Outcome::Silent)
}

async fn handle_leave(
    state: &AppState,
    current_session: &mut Option<String>,
    connection_id: Uuid,
) -> Result<Outcome, Frame> {
    // Leaving without having joined is a no-op, not an error.
    if let Some(session_id) = current_session.take() {
        session::leave_session(state, &session_id, connection_id).await;
        state.registry.clear_session(connection_id);
    }
    Ok(Outcome::Done)
}

// =============================================================================
// HELPERS
// =============================================================================

fn session_id_of(req: &Frame) -> Option<String> {
    req.session_id.clone().or_else(|| {
        req.data
            .get("sessionId")
            .and_then(|v| v.as_str())
            .map(String::from)
    })
}

fn participant_id_of(req: &Frame) -> Option<String> {
    req.data
        .get("participantId")
        .and_then(|v| v.as_str())
        .map(String::from)
        .or_else(|| req.from.clone())
}

async fn send_frame(socket: &mut WebSocket, frame: &Frame) -> Result<(), ()> {
    let json = match serde_json::to_string(frame) {
        Ok(j) => j,
        Err(e) => {
            warn!(error = %e, "ws: failed to serialize frame");
            return Err(());
        }
    };
    if frame.status == crate::frame::Status::Error {
        let code = frame.data.get("code").and_then(|v| v.as_str()).unwrap_or("-");
        let message = frame.data.get("message").and_then(|v| v.as_str()).unwrap_or("-");
        warn!(id = %frame.id, event = %frame.event, code, message, "ws: send frame status=Error");
    }
    socket.send(Message::Text(json.into())).await.map_err(|_| ())
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
