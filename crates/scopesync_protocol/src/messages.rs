//! Phase request payloads.
//!
//! One message type per session phase. Each message is a plain value
//! carrying everything the executing peer needs: scope snapshots,
//! schema, policy, and filter bindings. Proxied calls wrap a message
//! together with the session context into a [`RequestEnvelope`].

use crate::batch::BatchInfo;
use crate::config::SyncConfiguration;
use crate::context::{SyncContext, SyncParameters};
use crate::policy::ConflictResolutionPolicy;
use crate::schema::SyncSchema;
use crate::scope::{ScopeCursor, ScopeInfo};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Service endpoints, one per proxied session phase.
pub mod endpoint {
    /// Session handshake.
    pub const BEGIN_SESSION: &str = "/sync/begin";
    /// Scope discovery.
    pub const ENSURE_SCOPES: &str = "/sync/scopes";
    /// Schema negotiation.
    pub const ENSURE_SCHEMA: &str = "/sync/schema";
    /// Database preparation.
    pub const ENSURE_DATABASE: &str = "/sync/provision";
    /// Peer timestamp capture.
    pub const GET_TIMESTAMP: &str = "/sync/timestamp";
    /// Change selection.
    pub const GET_CHANGES: &str = "/sync/changes";
    /// Change application.
    pub const APPLY_CHANGES: &str = "/sync/apply";
    /// Scope persistence.
    pub const WRITE_SCOPES: &str = "/sync/scopes/write";
    /// Session teardown.
    pub const END_SESSION: &str = "/sync/end";
}

/// Opens a session on a peer, carrying the current configuration.
///
/// The remote peer may answer with a replacement configuration
/// (server-authoritative settings); the local peer normalizes and
/// echoes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageBeginSession {
    /// Configuration proposed for the session.
    pub configuration: SyncConfiguration,
}

impl MessageBeginSession {
    /// Creates a handshake message.
    pub fn new(configuration: SyncConfiguration) -> Self {
        Self { configuration }
    }
}

/// Requests a peer's scope records for a scope name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEnsureScopes {
    /// Logical scope label.
    pub scope_name: String,
    /// When querying the server, the client scope id whose reference
    /// record must be included.
    pub client_reference_id: Option<Uuid>,
}

impl MessageEnsureScopes {
    /// Creates a scope query for the local peer.
    pub fn local(scope_name: impl Into<String>) -> Self {
        Self {
            scope_name: scope_name.into(),
            client_reference_id: None,
        }
    }

    /// Creates a scope query for the remote peer.
    pub fn remote(scope_name: impl Into<String>, client_reference_id: Uuid) -> Self {
        Self {
            scope_name: scope_name.into(),
            client_reference_id: Some(client_reference_id),
        }
    }
}

/// Negotiates the replicated schema.
///
/// Sent without a schema to the authoritative peer, which answers
/// with its schema; sent with that schema to the adopting peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEnsureSchema {
    /// Schema to adopt, or `None` to request the authoritative one.
    pub schema: Option<SyncSchema>,
}

/// Provisions a peer's tracking infrastructure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEnsureDatabase {
    /// Schema to provision for.
    pub schema: SyncSchema,
    /// Scope record of the peer being provisioned.
    pub scope: ScopeInfo,
}

/// Requests the peer's current version-store timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageTimestamp {
    /// Logical scope label.
    pub scope_name: String,
}

/// Selects changed rows on a peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageGetChangesBatch {
    /// Selection snapshot: attribution id, full-sweep flag, and the
    /// exclusive lower timestamp bound.
    pub scope: ScopeCursor,
    /// Schema the selection runs against.
    pub schema: SyncSchema,
    /// Policy the eventual apply will run under.
    pub policy: ConflictResolutionPolicy,
    /// Row-filter bindings.
    pub parameters: SyncParameters,
    /// Maximum rows per staged batch part.
    pub batch_size: u32,
    /// Staging directory for providers that spill batches to disk.
    pub batch_directory: Option<PathBuf>,
}

/// Applies a staged batch on a peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageApplyChanges {
    /// Apply snapshot: attribution id, deletion-suppression flag, and
    /// the conflict-detection timestamp bound.
    pub scope: ScopeCursor,
    /// Schema the apply runs against.
    pub schema: SyncSchema,
    /// Winner rule for conflicting rows.
    pub policy: ConflictResolutionPolicy,
    /// The staged rows to apply.
    pub changes: BatchInfo,
}

/// Persists scope records on a peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageWriteScopes {
    /// Records to upsert, applied transactionally within the peer.
    pub scopes: Vec<ScopeInfo>,
}

/// A proxied phase request: the session context plus the phase message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope<M> {
    /// Session context as of this call.
    pub context: SyncContext,
    /// Phase payload.
    pub message: M,
}

impl<M> RequestEnvelope<M> {
    /// Wraps a context and message.
    pub fn new(context: SyncContext, message: M) -> Self {
        Self { context, message }
    }
}

/// A proxied phase response: the updated context plus the result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope<P> {
    /// Updated session context.
    pub context: SyncContext,
    /// Phase result payload.
    pub payload: P,
}

impl<P> ResponseEnvelope<P> {
    /// Wraps a context and payload.
    pub fn new(context: SyncContext, payload: P) -> Self {
        Self { context, payload }
    }
}
