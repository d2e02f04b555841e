//! Connection registry — live connections and their last-seen timestamps.
//!
//! DESIGN
//! ======
//! One record per transport-level link, keyed by connection id. Created on
//! socket accept, destroyed on close or heartbeat expiry. The registry is the
//! only component the sweeper reads to find dead connections.
//!
//! Time-dependent methods have `_at` variants taking an explicit `Instant`
//! so tests can simulate time advancement instead of sleeping.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use uuid::Uuid;

/// One active transport-level link from one participant to the server.
#[derive(Debug, Clone)]
pub struct Connection {
    pub connection_id: Uuid,
    /// Set at join time; a connection may heartbeat before ever joining.
    pub participant_id: Option<String>,
    /// Joined session, `None` until the first `join-session`.
    pub session_id: Option<String>,
    pub last_heartbeat: Instant,
}

/// Registry of live connections. Interior mutex is never held across an
/// await; all critical sections are plain map operations.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<Mutex<HashMap<Uuid, Connection>>>,
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self { inner: Arc::new(Mutex::new(HashMap::new())) }
    }

    /// Register a freshly accepted connection.
    pub fn register(&self, connection_id: Uuid) {
        self.register_at(connection_id, Instant::now());
    }

    pub(crate) fn register_at(&self, connection_id: Uuid, now: Instant) {
        let mut conns = self.lock();
        conns.insert(
            connection_id,
            Connection { connection_id, participant_id: None, session_id: None, last_heartbeat: now },
        );
    }

    /// Refresh the last-heartbeat timestamp. No-op if the connection has
    /// already been removed (late heartbeat after sweep).
    pub fn touch(&self, connection_id: Uuid) {
        self.touch_at(connection_id, Instant::now());
    }

    pub(crate) fn touch_at(&self, connection_id: Uuid, now: Instant) {
        let mut conns = self.lock();
        if let Some(conn) = conns.get_mut(&connection_id) {
            conn.last_heartbeat = now;
        }
    }

    /// Record which session a connection has joined, and as whom.
    pub fn set_session(&self, connection_id: Uuid, session_id: &str, participant_id: &str) {
        let mut conns = self.lock();
        if let Some(conn) = conns.get_mut(&connection_id) {
            conn.session_id = Some(session_id.to_string());
            conn.participant_id = Some(participant_id.to_string());
        }
    }

    /// Clear session membership after an explicit leave. The connection
    /// itself stays registered.
    pub fn clear_session(&self, connection_id: Uuid) {
        let mut conns = self.lock();
        if let Some(conn) = conns.get_mut(&connection_id) {
            conn.session_id = None;
        }
    }

    /// Remove and return the record. Idempotent: returns `None` if already
    /// absent, since an explicit close and a sweep can race to remove the
    /// same entry.
    pub fn unregister(&self, connection_id: Uuid) -> Option<Connection> {
        self.lock().remove(&connection_id)
    }

    /// Look up a connection by id, cloned out of the map.
    #[must_use]
    pub fn get(&self, connection_id: Uuid) -> Option<Connection> {
        self.lock().get(&connection_id).cloned()
    }

    /// All connections whose last heartbeat is older than `now - timeout`.
    /// Used only by the sweeper.
    #[must_use]
    pub fn list_expired(&self, now: Instant, timeout: Duration) -> Vec<Connection> {
        self.lock()
            .values()
            .filter(|conn| now.duration_since(conn.last_heartbeat) > timeout)
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, Connection>> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
#[path = "registry_test.rs"]
mod tests;
