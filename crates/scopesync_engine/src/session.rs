//! Session lifecycle: state, cancellation, and progress.

use crate::error::{SyncError, SyncResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Observable state of an orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Idle; a session may be started.
    Ready,
    /// A session is in flight.
    Synchronizing,
}

impl SessionState {
    /// Returns true if a new session may be started.
    pub fn is_ready(&self) -> bool {
        matches!(self, SessionState::Ready)
    }
}

/// Receives state transitions, twice per session.
pub trait SessionStateObserver: Send + Sync {
    /// Called on every `Ready`/`Synchronizing` transition.
    fn session_state_changed(&self, state: SessionState);
}

/// Cooperative cancellation flag for one session.
///
/// Cloning shares the flag; any clone can cancel.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Creates a live token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Returns true once cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Fails with [`SyncError::Cancelled`] once cancellation has been
    /// requested.
    pub fn ensure_active(&self) -> SyncResult<()> {
        if self.is_cancelled() {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// A milestone reported by a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    /// A peer opened the session.
    SessionBegin,
    /// Scope records were loaded or created.
    ScopesLoaded {
        /// Number of records returned.
        count: usize,
    },
    /// The replicated schema was adopted.
    SchemaApplied {
        /// Number of tables in the schema.
        tables: usize,
    },
    /// Tracking infrastructure was provisioned.
    DatabaseProvisioned,
    /// Changed rows were selected for one table.
    ChangesSelected {
        /// Table the rows belong to.
        table_name: String,
        /// Rows selected.
        rows: u64,
    },
    /// Staged rows were applied for one table.
    ChangesApplied {
        /// Table the rows belong to.
        table_name: String,
        /// Rows applied.
        rows: u64,
        /// Conflicts resolved while applying.
        conflicts: u64,
    },
    /// A peer closed the session.
    SessionEnd,
}

/// A progress report tied to a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressArgs {
    /// Session the milestone belongs to.
    pub session_id: Uuid,
    /// The milestone.
    pub event: ProgressEvent,
}

impl ProgressArgs {
    /// Creates a progress report.
    pub fn new(session_id: Uuid, event: ProgressEvent) -> Self {
        Self { session_id, event }
    }
}

/// Receives progress reports at provider-defined milestones.
pub trait ProgressSink: Send + Sync {
    /// Called for each milestone.
    fn report(&self, args: &ProgressArgs);
}
