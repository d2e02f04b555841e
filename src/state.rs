//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor.
//! Live rooms form an arena keyed by session id: the outer `RwLock` guards
//! only the map of `Arc<Mutex<RoomState>>` handles, so operations on
//! unrelated rooms never contend while two participants mutating the same
//! room serialize on its own mutex.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock, mpsc};
use uuid::Uuid;

use crate::config::PresenceConfig;
use crate::frame::Frame;
use crate::registry::ConnectionRegistry;
use crate::services::presence::{AiState, PresenceMap};

// =============================================================================
// ROOM STATE
// =============================================================================

/// Per-session live state. Entirely ephemeral: a restart loses everything,
/// which is by design for a presence protocol.
pub struct RoomState {
    /// Connected members: `connection_id` -> sender for outgoing frames.
    pub clients: HashMap<Uuid, mpsc::Sender<Frame>>,
    /// Which participant each member connection belongs to.
    pub participants: HashMap<Uuid, String>,
    /// Per-participant presence records.
    pub presence: PresenceMap,
    /// Session-level AI collaborator status.
    pub ai: AiState,
}

impl RoomState {
    #[must_use]
    pub fn new() -> Self {
        Self {
            clients: HashMap::new(),
            participants: HashMap::new(),
            presence: PresenceMap::new(),
            ai: AiState::new(),
        }
    }
}

impl Default for RoomState {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared handle to one room's state.
pub type RoomHandle = Arc<Mutex<RoomState>>;

// =============================================================================
// APP STATE
// =============================================================================

/// Shared application state, injected into Axum handlers via State extractor.
/// Clone is required by Axum — all inner fields are Arc-wrapped or Copy.
#[derive(Clone)]
pub struct AppState {
    /// Arena of live rooms, keyed by session id.
    pub rooms: Arc<RwLock<HashMap<String, RoomHandle>>>,
    /// Live connections and their heartbeat timestamps.
    pub registry: ConnectionRegistry,
    pub config: PresenceConfig,
}

impl AppState {
    #[must_use]
    pub fn new(config: PresenceConfig) -> Self {
        Self {
            rooms: Arc::new(RwLock::new(HashMap::new())),
            registry: ConnectionRegistry::new(),
            config,
        }
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================


#[cfg(test)]
#[path = "state_test.rs"]
mod tests;
