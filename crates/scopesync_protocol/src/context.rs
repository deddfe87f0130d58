//! Session context threaded through every peer call.

use crate::value::CellValue;
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime};
use uuid::Uuid;

/// Kind of session being run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncType {
    /// Incremental sync from the stored cursors.
    Normal,
    /// Discard local knowledge and re-download everything.
    Reinitialize,
    /// Re-download everything, but upload local rows first.
    ReinitializeWithUpload,
}

/// Direction of the currently active transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncWay {
    /// No transfer in flight.
    None,
    /// Client to server.
    Upload,
    /// Server to client.
    Download,
}

/// One row-filter binding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncParameter {
    /// Filter name, matched against declared filter columns.
    pub name: String,
    /// Bound value.
    pub value: CellValue,
}

/// Ordered collection of row-filter bindings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncParameters(Vec<SyncParameter>);

impl SyncParameters {
    /// Creates an empty parameter list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a binding, preserving insertion order.
    pub fn add(&mut self, name: impl Into<String>, value: CellValue) {
        self.0.push(SyncParameter {
            name: name.into(),
            value,
        });
    }

    /// Returns the first binding with the given name.
    pub fn get(&self, name: &str) -> Option<&CellValue> {
        self.0.iter().find(|p| p.name == name).map(|p| &p.value)
    }

    /// Iterates the bindings in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &SyncParameter> {
        self.0.iter()
    }

    /// Returns true if no bindings are present.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Session-scoped state threaded through every provider call.
///
/// Every peer operation consumes a context and returns an updated
/// one; the orchestrator owns the authoritative copy between calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncContext {
    /// Unique session identifier.
    pub session_id: Uuid,
    /// Session start time.
    pub start_time: SystemTime,
    /// Session completion time, set during scope bookkeeping.
    pub complete_time: Option<SystemTime>,
    /// Kind of session.
    pub sync_type: SyncType,
    /// Direction of the active transfer.
    pub sync_way: SyncWay,
    /// Row-filter bindings for this session.
    pub parameters: SyncParameters,
    /// Rows selected on the client and sent to the server.
    pub total_changes_uploaded: u64,
    /// Rows applied on the client from server changes.
    pub total_changes_downloaded: u64,
    /// Rows that failed to apply on the client.
    pub total_sync_errors: u64,
    /// Conflicts resolved while the server applied client changes.
    pub total_sync_conflicts: u64,
}

impl SyncContext {
    /// Creates a fresh context for a new session.
    pub fn new(sync_type: SyncType, parameters: SyncParameters) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            start_time: SystemTime::now(),
            complete_time: None,
            sync_type,
            sync_way: SyncWay::None,
            parameters,
            total_changes_uploaded: 0,
            total_changes_downloaded: 0,
            total_sync_errors: 0,
            total_sync_conflicts: 0,
        }
    }

    /// Elapsed time between start and completion, if completed.
    pub fn duration(&self) -> Option<Duration> {
        self.complete_time
            .and_then(|end| end.duration_since(self.start_time).ok())
    }
}
