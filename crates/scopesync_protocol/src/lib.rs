//! # ScopeSync Protocol
//!
//! Protocol value types and wire codecs for ScopeSync.
//!
//! This crate provides:
//! - `ScopeInfo` and `ScopeCursor` replication cursors
//! - `SyncContext` session state threaded through every peer call
//! - `SyncConfiguration` session settings
//! - Schema and change-batch models
//! - The `Message*` request family and wire envelopes
//! - Json/Binary body encoding
//!
//! This is a pure data crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod batch;
mod changes;
mod config;
mod context;
mod messages;
mod policy;
mod schema;
mod scope;
mod value;
mod wire;

pub use batch::{BatchInfo, RowState, SyncRow, TableChanges};
pub use changes::{
    DatabaseChangesApplied, DatabaseChangesSelected, TableChangesApplied, TableChangesSelected,
};
pub use config::{SyncConfiguration, SyncFilter};
pub use context::{SyncContext, SyncParameter, SyncParameters, SyncType, SyncWay};
pub use messages::{
    endpoint, MessageApplyChanges, MessageBeginSession, MessageEnsureDatabase,
    MessageEnsureSchema, MessageEnsureScopes, MessageGetChangesBatch, MessageTimestamp,
    MessageWriteScopes, RequestEnvelope, ResponseEnvelope,
};
pub use policy::ConflictResolutionPolicy;
pub use schema::{ColumnType, SyncColumn, SyncSchema, SyncTable};
pub use scope::{ScopeCursor, ScopeInfo};
pub use value::CellValue;
pub use wire::{decode_body, encode_body, SerializationFormat, WireError, WireResult};
