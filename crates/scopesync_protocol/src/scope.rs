//! Replication cursors.

use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime};
use uuid::Uuid;

/// A persisted replication cursor.
///
/// Three records participate in a session: the client's record of
/// itself, the server's record of itself, and the server's record of
/// what it last acknowledged to this client (the client reference).
/// All three share the scope name; identity is the `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScopeInfo {
    /// Stable unique identifier of this cursor.
    pub id: Uuid,
    /// Logical scope label.
    pub name: String,
    /// Last-sync timestamp in the owning peer's version space.
    ///
    /// Opaque and monotonic; comparable only against timestamps
    /// produced by the same peer.
    pub last_sync_timestamp: i64,
    /// Wall-clock completion time of the previous session.
    pub last_sync: Option<SystemTime>,
    /// Duration of the previous session.
    pub last_sync_duration: Option<Duration>,
    /// True until the first session completes successfully.
    pub is_new_scope: bool,
    /// True when this record describes the storing peer itself.
    pub is_local: bool,
}

impl ScopeInfo {
    /// Creates a pristine scope record that has never synchronized.
    pub fn new(id: Uuid, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            last_sync_timestamp: 0,
            last_sync: None,
            last_sync_duration: None,
            is_new_scope: true,
            is_local: false,
        }
    }

    /// Marks the record as describing the storing peer.
    pub fn as_local(mut self) -> Self {
        self.is_local = true;
        self
    }

    /// Records a completed session on this cursor.
    pub fn complete_session(
        &mut self,
        timestamp: i64,
        completed_at: SystemTime,
        duration: Duration,
    ) {
        self.is_new_scope = false;
        self.last_sync_timestamp = timestamp;
        self.last_sync = Some(completed_at);
        self.last_sync_duration = Some(duration);
    }
}

/// A point-in-time selection or apply snapshot.
///
/// The orchestrator builds one of these per change-selection and per
/// apply call; the fields come from different `ScopeInfo` records
/// depending on the direction of the transfer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScopeCursor {
    /// Scope id the produced or consumed rows are attributed to.
    pub id: Uuid,
    /// Triggers a full-table sweep on selection and suppresses
    /// deletions on apply.
    pub is_new_scope: bool,
    /// Lower bound (exclusive) on row timestamps, in the version
    /// space of the peer executing the call.
    pub timestamp: i64,
}

impl ScopeCursor {
    /// Creates a cursor snapshot.
    pub fn new(id: Uuid, is_new_scope: bool, timestamp: i64) -> Self {
        Self {
            id,
            is_new_scope,
            timestamp,
        }
    }
}
