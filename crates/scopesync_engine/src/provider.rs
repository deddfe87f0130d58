//! The peer capability contract.

use crate::error::SyncResult;
use crate::session::{CancellationToken, ProgressSink};
use scopesync_protocol::{
    BatchInfo, DatabaseChangesApplied, DatabaseChangesSelected, MessageApplyChanges,
    MessageBeginSession, MessageEnsureDatabase, MessageEnsureSchema, MessageEnsureScopes,
    MessageGetChangesBatch, MessageTimestamp, MessageWriteScopes, ScopeInfo, SyncConfiguration,
    SyncContext, SyncSchema,
};
use std::sync::Arc;

/// Uniform operations over one database peer.
///
/// The orchestrator never touches a database directly; it only
/// composes these calls on its two peers, threading the session
/// context through every one. Each call consumes the context and
/// returns an updated copy alongside its result.
///
/// Implementations come in two capability classes: direct peers that
/// can serve either side of a session, and thin proxies over a wire
/// protocol that can only play the server role remotely. The
/// [`is_server_capable`](SyncProvider::is_server_capable) predicate
/// distinguishes them.
pub trait SyncProvider: Send + Sync {
    /// Opens the session, possibly replacing the configuration.
    fn begin_session(
        &self,
        context: SyncContext,
        message: MessageBeginSession,
    ) -> SyncResult<(SyncContext, SyncConfiguration)>;

    /// Closes the session and releases per-session resources.
    fn end_session(&self, context: SyncContext) -> SyncResult<SyncContext>;

    /// Loads (or creates) scope records for a scope name.
    fn ensure_scopes(
        &self,
        context: SyncContext,
        message: MessageEnsureScopes,
    ) -> SyncResult<(SyncContext, Vec<ScopeInfo>)>;

    /// Returns the authoritative schema, or adopts a supplied one.
    fn ensure_schema(
        &self,
        context: SyncContext,
        message: MessageEnsureSchema,
    ) -> SyncResult<(SyncContext, SyncSchema)>;

    /// Provisions tracking infrastructure for the schema.
    fn ensure_database(
        &self,
        context: SyncContext,
        message: MessageEnsureDatabase,
    ) -> SyncResult<SyncContext>;

    /// Captures the peer's current version-store timestamp.
    fn get_local_timestamp(
        &self,
        context: SyncContext,
        message: MessageTimestamp,
    ) -> SyncResult<(SyncContext, i64)>;

    /// Selects changed rows against a cursor snapshot.
    fn get_change_batch(
        &self,
        context: SyncContext,
        message: MessageGetChangesBatch,
    ) -> SyncResult<(SyncContext, BatchInfo, DatabaseChangesSelected)>;

    /// Applies a staged batch under a conflict policy.
    fn apply_changes(
        &self,
        context: SyncContext,
        message: MessageApplyChanges,
    ) -> SyncResult<(SyncContext, DatabaseChangesApplied)>;

    /// Persists scope records transactionally within this peer.
    fn write_scopes(
        &self,
        context: SyncContext,
        message: MessageWriteScopes,
    ) -> SyncResult<SyncContext>;

    /// Installs the session cancellation token.
    fn set_cancellation(&self, token: CancellationToken);

    /// Installs the progress sink.
    fn set_progress(&self, sink: Arc<dyn ProgressSink>);

    /// Mutates the peer's configuration before a session.
    ///
    /// Proxied peers reject this: their configuration lives behind
    /// the service.
    fn set_configuration(&self, mutate: &dyn Fn(&mut SyncConfiguration)) -> SyncResult<()>;

    /// Returns true if this peer can serve the server role directly.
    fn is_server_capable(&self) -> bool;
}
