//! Presence state store — per-participant ephemeral records and the
//! session-level AI status.
//!
//! DESIGN
//! ======
//! `PresenceMap::upsert` is the only mutation entry point, so every state
//! transition goes through one code path and the typing/status invariant is
//! re-established in exactly one place. Records exist only while at least
//! one connection for the participant is a room member; the coordinator
//! removes them on last departure.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

// =============================================================================
// PARTICIPANT PRESENCE
// =============================================================================

/// Transient activity state of a human participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantStatus {
    Idle,
    Typing,
    Thinking,
    Away,
}

impl ParticipantStatus {
    /// Parse a wire-level status string. Unknown values are rejected by the
    /// coordinator with a local error, never clamped silently.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "idle" => Some(Self::Idle),
            "typing" => Some(Self::Typing),
            "thinking" => Some(Self::Thinking),
            "away" => Some(Self::Away),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Typing => "typing",
            Self::Thinking => "thinking",
            Self::Away => "away",
        }
    }
}

/// Per (session, participant) ephemeral record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceRecord {
    pub participant_id: String,
    pub is_online: bool,
    pub is_typing: bool,
    pub status: ParticipantStatus,
    /// Milliseconds since Unix epoch of the last observed activity.
    pub last_seen: i64,
}

impl PresenceRecord {
    fn initial(participant_id: &str, now_ms: i64) -> Self {
        Self {
            participant_id: participant_id.to_string(),
            is_online: true,
            is_typing: false,
            status: ParticipantStatus::Idle,
            last_seen: now_ms,
        }
    }
}

/// Per-room presence records, keyed by participant id.
#[derive(Default)]
pub struct PresenceMap {
    records: std::collections::HashMap<String, PresenceRecord>,
}

impl PresenceMap {
    #[must_use]
    pub fn new() -> Self {
        Self { records: std::collections::HashMap::new() }
    }

    /// Apply a mutation to the participant's record, initializing a default
    /// (online, idle) record first if none exists. Updates `last_seen` and
    /// re-establishes the invariant that `is_typing` implies status typing.
    pub fn upsert(
        &mut self,
        participant_id: &str,
        now_ms: i64,
        mutate: impl FnOnce(&mut PresenceRecord),
    ) -> PresenceRecord {
        let record = self
            .records
            .entry(participant_id.to_string())
            .or_insert_with(|| PresenceRecord::initial(participant_id, now_ms));

        mutate(record);
        record.last_seen = now_ms;
        // A participant whose status moved off typing is no longer typing.
        if record.status != ParticipantStatus::Typing {
            record.is_typing = false;
        }
        record.clone()
    }

    #[must_use]
    pub fn get(&self, participant_id: &str) -> Option<&PresenceRecord> {
        self.records.get(participant_id)
    }

    pub fn remove(&mut self, participant_id: &str) {
        self.records.remove(participant_id);
    }

    /// Records for all online participants. Answers a newly joined client's
    /// "who else is here and what are they doing".
    #[must_use]
    pub fn snapshot(&self) -> Vec<PresenceRecord> {
        let mut records: Vec<PresenceRecord> = self
            .records
            .values()
            .filter(|r| r.is_online)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.participant_id.cmp(&b.participant_id));
        records
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

// =============================================================================
// AI STATUS
// =============================================================================

/// Session-scoped activity indicator for the AI collaborator. Relayed but
/// never attributed to any connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AiStatus {
    Thinking,
    Responding,
    Idle,
}

impl AiStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Thinking => "thinking",
            Self::Responding => "responding",
            Self::Idle => "idle",
        }
    }
}

/// Per-session AI status plus the activity clock the sweeper uses to reset
/// it after a bounded inactivity window.
pub struct AiState {
    pub status: AiStatus,
    last_activity: Instant,
}

impl AiState {
    #[must_use]
    pub fn new() -> Self {
        Self { status: AiStatus::Idle, last_activity: Instant::now() }
    }

    pub fn set(&mut self, status: AiStatus, now: Instant) {
        self.status = status;
        self.last_activity = now;
    }

    /// True when a non-idle status has seen no activity for `timeout`.
    #[must_use]
    pub fn idle_expired(&self, now: Instant, timeout: Duration) -> bool {
        self.status != AiStatus::Idle && now.duration_since(self.last_activity) > timeout
    }
}

impl Default for AiState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "presence_test.rs"]
mod tests;
