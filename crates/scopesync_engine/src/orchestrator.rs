//! The session orchestrator.

use crate::error::{SyncError, SyncResult, SyncStage};
use crate::provider::SyncProvider;
use crate::session::{CancellationToken, ProgressSink, SessionState, SessionStateObserver};
use parking_lot::{Mutex, RwLock};
use scopesync_protocol::{
    CellValue, MessageApplyChanges, MessageBeginSession, MessageEnsureDatabase,
    MessageEnsureSchema, MessageEnsureScopes, MessageGetChangesBatch, MessageTimestamp,
    MessageWriteScopes, ScopeCursor, ScopeInfo, SyncConfiguration, SyncContext, SyncParameters,
    SyncType, SyncWay,
};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, warn};

/// Drives one sync session at a time between a local and a remote peer.
///
/// The agent owns the session context and composes provider calls in
/// a fixed order: handshake, scope discovery, schema negotiation,
/// database preparation, upload with server-side conflict
/// resolution, download with client-side application, and scope
/// persistence. It never touches a database itself.
///
/// A single agent serializes overlapping `synchronize` calls. Two
/// agents sharing one local peer are not supported; the local store
/// expects a single writer.
pub struct SyncAgent {
    local: Arc<dyn SyncProvider>,
    remote: Arc<dyn SyncProvider>,
    configuration: RwLock<SyncConfiguration>,
    parameters: RwLock<SyncParameters>,
    state: RwLock<SessionState>,
    observer: RwLock<Option<Arc<dyn SessionStateObserver>>>,
    session_lock: Mutex<()>,
}

impl SyncAgent {
    /// Creates an agent whose table configuration lives behind the
    /// remote peer, using the default scope name.
    pub fn new(local: Arc<dyn SyncProvider>, remote: Arc<dyn SyncProvider>) -> Self {
        Self {
            local,
            remote,
            configuration: RwLock::new(SyncConfiguration::default()),
            parameters: RwLock::new(SyncParameters::new()),
            state: RwLock::new(SessionState::Ready),
            observer: RwLock::new(None),
            session_lock: Mutex::new(()),
        }
    }

    /// Creates an agent for two directly reachable peers and
    /// registers the given tables into both peers' configurations.
    ///
    /// The remote peer must be able to serve the server role itself;
    /// a proxied peer carries its table configuration behind the
    /// service and is rejected here.
    pub fn with_tables<S: AsRef<str>>(
        scope_name: &str,
        local: Arc<dyn SyncProvider>,
        remote: Arc<dyn SyncProvider>,
        tables: &[S],
    ) -> SyncResult<Self> {
        if scope_name.trim().is_empty() {
            return Err(SyncError::Configuration("scope name is empty".into()));
        }
        if tables.is_empty() {
            return Err(SyncError::Configuration(
                "at least one table must be registered".into(),
            ));
        }
        if !remote.is_server_capable() {
            return Err(SyncError::Configuration(
                "the remote peer cannot serve as a server; use the proxied construction".into(),
            ));
        }

        let table_names: Vec<String> = tables.iter().map(|t| t.as_ref().to_string()).collect();
        let configuration =
            SyncConfiguration::new(scope_name).with_tables(table_names.iter().cloned());

        let register = |target: &mut SyncConfiguration| {
            target.scope_name = scope_name.to_string();
            target.setup_tables = table_names.clone();
        };
        local.set_configuration(&register)?;
        remote.set_configuration(&register)?;

        Ok(Self {
            local,
            remote,
            configuration: RwLock::new(configuration),
            parameters: RwLock::new(SyncParameters::new()),
            state: RwLock::new(SessionState::Ready),
            observer: RwLock::new(None),
            session_lock: Mutex::new(()),
        })
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    /// The configuration sessions start from.
    pub fn configuration(&self) -> SyncConfiguration {
        self.configuration.read().clone()
    }

    /// Replaces the configuration sessions start from.
    pub fn set_configuration(&self, configuration: SyncConfiguration) {
        *self.configuration.write() = configuration;
    }

    /// Registers the single session-state observer.
    pub fn set_observer(&self, observer: Arc<dyn SessionStateObserver>) {
        *self.observer.write() = Some(observer);
    }

    /// Installs a progress sink on both peers.
    pub fn set_progress(&self, sink: Arc<dyn ProgressSink>) {
        self.local.set_progress(Arc::clone(&sink));
        self.remote.set_progress(sink);
    }

    /// Binds a row-filter parameter for subsequent sessions.
    pub fn add_parameter(&self, name: impl Into<String>, value: CellValue) {
        self.parameters.write().add(name, value);
    }

    /// Runs a normal session with a fresh cancellation token.
    pub fn synchronize(&self) -> SyncResult<SyncContext> {
        self.synchronize_with(SyncType::Normal, CancellationToken::new())
    }

    /// Runs a session of the given kind under a cancellation token.
    ///
    /// Returns the final session context on success. Teardown always
    /// runs: both peers see `end_session` and the observer sees
    /// `Ready`, whether the session succeeded, failed, or was
    /// cancelled.
    pub fn synchronize_with(
        &self,
        sync_type: SyncType,
        cancellation: CancellationToken,
    ) -> SyncResult<SyncContext> {
        let _session = self.session_lock.lock();

        let context = SyncContext::new(sync_type, self.parameters.read().clone());
        let fallback = context.clone();
        debug!(session = %context.session_id, ?sync_type, "starting sync session");

        self.local.set_cancellation(cancellation.clone());
        self.remote.set_cancellation(cancellation.clone());

        self.transition(SessionState::Synchronizing);
        let outcome = self.run_phases(context, &cancellation);

        let (context, result) = match outcome {
            Ok(context) => (context, Ok(())),
            Err(error) => (fallback, Err(error)),
        };
        let context = self.end_sessions(context);
        self.transition(SessionState::Ready);

        match result {
            Ok(()) => {
                debug!(
                    session = %context.session_id,
                    uploaded = context.total_changes_uploaded,
                    downloaded = context.total_changes_downloaded,
                    conflicts = context.total_sync_conflicts,
                    "sync session completed"
                );
                Ok(context)
            }
            Err(error) => {
                warn!(session = %context.session_id, %error, "sync session failed");
                Err(error)
            }
        }
    }

    fn transition(&self, state: SessionState) {
        *self.state.write() = state;
        let observer = self.observer.read().clone();
        if let Some(observer) = observer {
            observer.session_state_changed(state);
        }
    }

    /// Teardown on both peers; failures here must not mask the
    /// session outcome.
    fn end_sessions(&self, context: SyncContext) -> SyncContext {
        let context = match self.remote.end_session(context.clone()) {
            Ok(updated) => updated,
            Err(error) => {
                warn!(%error, "remote end_session failed");
                context
            }
        };
        match self.local.end_session(context.clone()) {
            Ok(updated) => updated,
            Err(error) => {
                warn!(%error, "local end_session failed");
                context
            }
        }
    }

    /// The ordered phase sequence of one session.
    fn run_phases(
        &self,
        mut context: SyncContext,
        cancellation: &CancellationToken,
    ) -> SyncResult<SyncContext> {
        // Handshake. The remote answer is authoritative and feeds the
        // local peer, which normalizes; the session owns the result.
        cancellation.ensure_active()?;
        let proposed = self.configuration.read().clone();
        let (ctx, remote_configuration) = self
            .remote
            .begin_session(context, MessageBeginSession::new(proposed))
            .map_err(|e| e.with_stage(SyncStage::BeginSession))?;
        context = ctx;

        cancellation.ensure_active()?;
        let (ctx, configuration) = self
            .local
            .begin_session(context, MessageBeginSession::new(remote_configuration))
            .map_err(|e| e.with_stage(SyncStage::BeginSession))?;
        context = ctx;

        // Scope discovery, local side first: the client's own record.
        cancellation.ensure_active()?;
        let (ctx, local_scopes) = self
            .local
            .ensure_scopes(context, MessageEnsureScopes::local(&configuration.scope_name))
            .map_err(|e| e.with_stage(SyncStage::EnsureScopes))?;
        context = ctx;
        let mut local_scope = single_scope(local_scopes)?;

        // Remote side: the server's own record plus its reference
        // record for this client.
        cancellation.ensure_active()?;
        let (ctx, remote_scopes) = self
            .remote
            .ensure_scopes(
                context,
                MessageEnsureScopes::remote(&configuration.scope_name, local_scope.id),
            )
            .map_err(|e| e.with_stage(SyncStage::EnsureScopes))?;
        context = ctx;
        let (mut server_scope, mut reference_scope) =
            partition_remote_scopes(remote_scopes, local_scope.id)?;

        // Schema negotiation: the remote peer is authoritative, the
        // local peer adopts.
        cancellation.ensure_active()?;
        let (ctx, schema) = self
            .remote
            .ensure_schema(context, MessageEnsureSchema { schema: None })
            .map_err(|e| e.with_stage(SyncStage::EnsureSchema))?;
        context = ctx;

        cancellation.ensure_active()?;
        let (ctx, schema) = self
            .local
            .ensure_schema(
                context,
                MessageEnsureSchema {
                    schema: Some(schema),
                },
            )
            .map_err(|e| e.with_stage(SyncStage::EnsureSchema))?;
        context = ctx;

        // Database preparation on both sides.
        cancellation.ensure_active()?;
        context = self
            .remote
            .ensure_database(
                context,
                MessageEnsureDatabase {
                    schema: schema.clone(),
                    scope: server_scope.clone(),
                },
            )
            .map_err(|e| e.with_stage(SyncStage::EnsureDatabase))?;

        cancellation.ensure_active()?;
        context = self
            .local
            .ensure_database(
                context,
                MessageEnsureDatabase {
                    schema: schema.clone(),
                    scope: local_scope.clone(),
                },
            )
            .map_err(|e| e.with_stage(SyncStage::EnsureDatabase))?;

        // The server applies client rows under the configured policy;
        // the client must apply server rows under the opposite one so
        // the same winner is retained on both peers.
        let server_policy = configuration.conflict_resolution_policy;
        let client_policy = server_policy.opposite();

        // Capture the client timestamp before selecting, so edits
        // landing during selection are picked up by the next session
        // instead of being lost.
        cancellation.ensure_active()?;
        let (ctx, client_timestamp) = self
            .local
            .get_local_timestamp(
                context,
                MessageTimestamp {
                    scope_name: configuration.scope_name.clone(),
                },
            )
            .map_err(|e| e.with_stage(SyncStage::SelectingChanges))?;
        context = ctx;

        // Upload selection. Outgoing rows are attributed to the server
        // scope; the bound is the client's last acknowledged sync. A
        // reinitializing client selects above the timestamp captured a
        // moment ago, which yields an empty upload.
        let upload_cursor = match context.sync_type {
            SyncType::Normal => ScopeCursor::new(
                server_scope.id,
                local_scope.is_new_scope,
                local_scope.last_sync_timestamp,
            ),
            SyncType::Reinitialize => ScopeCursor::new(server_scope.id, false, client_timestamp),
            SyncType::ReinitializeWithUpload => {
                ScopeCursor::new(server_scope.id, true, local_scope.last_sync_timestamp)
            }
        };
        context.sync_way = SyncWay::Upload;
        let upload_parameters = context.parameters.clone();

        cancellation.ensure_active()?;
        let (ctx, client_batch, client_changes_selected) = self
            .local
            .get_change_batch(
                context,
                MessageGetChangesBatch {
                    scope: upload_cursor,
                    schema: schema.clone(),
                    policy: client_policy,
                    parameters: upload_parameters,
                    batch_size: configuration.batch_size,
                    batch_directory: configuration.batch_directory.clone(),
                },
            )
            .map_err(|e| e.with_stage(SyncStage::SelectingChanges))?;
        context = ctx;

        // Server-side apply. Incoming rows are attributed to the
        // client scope; conflicts are detected against rows the server
        // modified since it last acknowledged this client.
        cancellation.ensure_active()?;
        let (ctx, remote_changes_applied) = self
            .remote
            .apply_changes(
                context,
                MessageApplyChanges {
                    scope: ScopeCursor::new(
                        local_scope.id,
                        false,
                        reference_scope.last_sync_timestamp,
                    ),
                    schema: schema.clone(),
                    policy: server_policy,
                    changes: client_batch.clone(),
                },
            )
            .map_err(|e| e.with_stage(SyncStage::ApplyingChanges))?;
        context = ctx;
        // The session-level conflict total reflects the server-side
        // apply, never the later client-side one.
        let upload_conflicts = remote_changes_applied.total_resolved_conflicts();

        // Capture the server timestamp before selecting its changes.
        cancellation.ensure_active()?;
        let (ctx, server_timestamp) = self
            .remote
            .get_local_timestamp(
                context,
                MessageTimestamp {
                    scope_name: configuration.scope_name.clone(),
                },
            )
            .map_err(|e| e.with_stage(SyncStage::SelectingChanges))?;
        context = ctx;

        // Download selection. Rows are attributed to the client scope
        // so the server's copy of freshly uploaded rows stays home;
        // the bound and sweep flag come from the reference record.
        let download_cursor = match context.sync_type {
            SyncType::Normal => ScopeCursor::new(
                local_scope.id,
                reference_scope.is_new_scope,
                reference_scope.last_sync_timestamp,
            ),
            SyncType::Reinitialize | SyncType::ReinitializeWithUpload => {
                ScopeCursor::new(local_scope.id, true, reference_scope.last_sync_timestamp)
            }
        };
        context.sync_way = SyncWay::Download;
        let download_parameters = context.parameters.clone();

        cancellation.ensure_active()?;
        let (ctx, server_batch, _server_changes_selected) = self
            .remote
            .get_change_batch(
                context,
                MessageGetChangesBatch {
                    scope: download_cursor,
                    schema: schema.clone(),
                    policy: server_policy,
                    parameters: download_parameters,
                    batch_size: configuration.batch_size,
                    batch_directory: configuration.batch_directory.clone(),
                },
            )
            .map_err(|e| e.with_stage(SyncStage::SelectingChanges))?;
        context = ctx;

        // Client-side apply. A still-pristine client suppresses
        // server-originated deletions.
        let download_apply_cursor = match context.sync_type {
            SyncType::Normal => ScopeCursor::new(
                server_scope.id,
                local_scope.is_new_scope,
                local_scope.last_sync_timestamp,
            ),
            SyncType::Reinitialize | SyncType::ReinitializeWithUpload => {
                ScopeCursor::new(server_scope.id, true, local_scope.last_sync_timestamp)
            }
        };
        cancellation.ensure_active()?;
        let (ctx, local_changes_applied) = self
            .local
            .apply_changes(
                context,
                MessageApplyChanges {
                    scope: download_apply_cursor,
                    schema: schema.clone(),
                    policy: client_policy,
                    changes: server_batch.clone(),
                },
            )
            .map_err(|e| e.with_stage(SyncStage::ApplyingChanges))?;
        context = ctx;

        context.total_changes_uploaded = client_changes_selected.total_changes_selected();
        context.total_changes_downloaded = local_changes_applied.total_applied_changes();
        context.total_sync_errors = local_changes_applied.total_applied_changes_failed();
        context.total_sync_conflicts = upload_conflicts;

        // Scope bookkeeping: the server records land on the server
        // timestamp, the client record on the client timestamp; the
        // two version spaces never mix.
        cancellation.ensure_active()?;
        let complete_time = SystemTime::now();
        context.complete_time = Some(complete_time);
        let duration = complete_time
            .duration_since(context.start_time)
            .unwrap_or_default();

        server_scope.complete_session(server_timestamp, complete_time, duration);
        reference_scope.complete_session(server_timestamp, complete_time, duration);
        local_scope.complete_session(client_timestamp, complete_time, duration);

        // The server stores its own record plus the client reference.
        server_scope.is_local = true;
        reference_scope.is_local = false;
        context = self
            .remote
            .write_scopes(
                context,
                MessageWriteScopes {
                    scopes: vec![server_scope.clone(), reference_scope],
                },
            )
            .map_err(|e| e.with_stage(SyncStage::WritingScopes))?;

        // The client stores its own record plus a shadow of the
        // server's.
        cancellation.ensure_active()?;
        server_scope.is_local = false;
        local_scope.is_local = true;
        context = self
            .local
            .write_scopes(
                context,
                MessageWriteScopes {
                    scopes: vec![server_scope, local_scope],
                },
            )
            .map_err(|e| e.with_stage(SyncStage::WritingScopes))?;

        Ok(context)
    }
}

/// Expects exactly one record from the local scope query.
fn single_scope(scopes: Vec<ScopeInfo>) -> SyncResult<ScopeInfo> {
    let count = scopes.len();
    let mut iter = scopes.into_iter();
    match (iter.next(), iter.next()) {
        (Some(scope), None) => Ok(scope),
        _ => Err(SyncError::Protocol {
            stage: SyncStage::EnsureScopes,
            message: format!("expected exactly one local scope record, got {count}"),
        }),
    }
}

/// Splits the remote scope answer into the server's own record and
/// the reference record matching the client id.
fn partition_remote_scopes(
    scopes: Vec<ScopeInfo>,
    client_id: uuid::Uuid,
) -> SyncResult<(ScopeInfo, ScopeInfo)> {
    let count = scopes.len();
    if count != 2 {
        return Err(SyncError::Protocol {
            stage: SyncStage::EnsureScopes,
            message: format!("expected exactly two remote scope records, got {count}"),
        });
    }

    let mut server_scope = None;
    let mut reference_scope = None;
    for scope in scopes {
        if scope.id == client_id {
            reference_scope = Some(scope);
        } else {
            server_scope = Some(scope);
        }
    }
    match (server_scope, reference_scope) {
        (Some(server), Some(reference)) => Ok((server, reference)),
        _ => Err(SyncError::Protocol {
            stage: SyncStage::EnsureScopes,
            message: "remote scope records must hold the server record and the client reference"
                .into(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryProvider;
    use crate::provider::SyncProvider;
    use scopesync_protocol::{
        BatchInfo, ColumnType, DatabaseChangesApplied, DatabaseChangesSelected,
        MessageApplyChanges, MessageGetChangesBatch, SyncColumn, SyncSchema, SyncTable,
    };
    use std::sync::Arc;

    fn schema() -> SyncSchema {
        SyncSchema::new(vec![SyncTable::new(
            "items",
            vec![
                SyncColumn::new("id", ColumnType::Integer),
                SyncColumn::new("label", ColumnType::Text),
            ],
            "id",
        )])
    }

    fn agent_over_memory() -> (Arc<MemoryProvider>, Arc<MemoryProvider>, SyncAgent) {
        let local = Arc::new(MemoryProvider::new(schema()));
        let remote = Arc::new(MemoryProvider::new(schema()));
        let agent = SyncAgent::with_tables(
            "items_scope",
            Arc::clone(&local) as Arc<dyn SyncProvider>,
            Arc::clone(&remote) as Arc<dyn SyncProvider>,
            &["items"],
        )
        .unwrap();
        (local, remote, agent)
    }

    /// Records the provider-call order and can fail one operation.
    struct InstrumentedProvider {
        inner: Arc<MemoryProvider>,
        label: &'static str,
        calls: Arc<parking_lot::Mutex<Vec<String>>>,
        fail_on: Option<&'static str>,
    }

    impl InstrumentedProvider {
        fn new(
            inner: Arc<MemoryProvider>,
            label: &'static str,
            calls: Arc<parking_lot::Mutex<Vec<String>>>,
        ) -> Self {
            Self {
                inner,
                label,
                calls,
                fail_on: None,
            }
        }

        fn failing_on(mut self, operation: &'static str) -> Self {
            self.fail_on = Some(operation);
            self
        }

        fn record(&self, operation: &str) -> SyncResult<()> {
            self.calls.lock().push(format!("{}:{operation}", self.label));
            if self.fail_on == Some(operation) {
                return Err(SyncError::provider("injected failure"));
            }
            Ok(())
        }
    }

    impl SyncProvider for InstrumentedProvider {
        fn begin_session(
            &self,
            context: SyncContext,
            message: MessageBeginSession,
        ) -> SyncResult<(SyncContext, SyncConfiguration)> {
            self.record("begin_session")?;
            self.inner.begin_session(context, message)
        }

        fn end_session(&self, context: SyncContext) -> SyncResult<SyncContext> {
            self.record("end_session")?;
            self.inner.end_session(context)
        }

        fn ensure_scopes(
            &self,
            context: SyncContext,
            message: MessageEnsureScopes,
        ) -> SyncResult<(SyncContext, Vec<ScopeInfo>)> {
            self.record("ensure_scopes")?;
            self.inner.ensure_scopes(context, message)
        }

        fn ensure_schema(
            &self,
            context: SyncContext,
            message: MessageEnsureSchema,
        ) -> SyncResult<(SyncContext, SyncSchema)> {
            self.record("ensure_schema")?;
            self.inner.ensure_schema(context, message)
        }

        fn ensure_database(
            &self,
            context: SyncContext,
            message: MessageEnsureDatabase,
        ) -> SyncResult<SyncContext> {
            self.record("ensure_database")?;
            self.inner.ensure_database(context, message)
        }

        fn get_local_timestamp(
            &self,
            context: SyncContext,
            message: MessageTimestamp,
        ) -> SyncResult<(SyncContext, i64)> {
            self.record("get_local_timestamp")?;
            self.inner.get_local_timestamp(context, message)
        }

        fn get_change_batch(
            &self,
            context: SyncContext,
            message: MessageGetChangesBatch,
        ) -> SyncResult<(SyncContext, BatchInfo, DatabaseChangesSelected)> {
            self.record("get_change_batch")?;
            self.inner.get_change_batch(context, message)
        }

        fn apply_changes(
            &self,
            context: SyncContext,
            message: MessageApplyChanges,
        ) -> SyncResult<(SyncContext, DatabaseChangesApplied)> {
            self.record("apply_changes")?;
            self.inner.apply_changes(context, message)
        }

        fn write_scopes(
            &self,
            context: SyncContext,
            message: MessageWriteScopes,
        ) -> SyncResult<SyncContext> {
            self.record("write_scopes")?;
            self.inner.write_scopes(context, message)
        }

        fn set_cancellation(&self, token: CancellationToken) {
            self.inner.set_cancellation(token);
        }

        fn set_progress(&self, sink: Arc<dyn ProgressSink>) {
            self.inner.set_progress(sink);
        }

        fn set_configuration(
            &self,
            mutate: &dyn Fn(&mut SyncConfiguration),
        ) -> SyncResult<()> {
            self.inner.set_configuration(mutate)
        }

        fn is_server_capable(&self) -> bool {
            self.inner.is_server_capable()
        }
    }

    fn instrumented_agent(
        fail_local_on: Option<&'static str>,
        fail_remote_on: Option<&'static str>,
    ) -> (Arc<parking_lot::Mutex<Vec<String>>>, SyncAgent) {
        let calls = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let mut local = InstrumentedProvider::new(
            Arc::new(MemoryProvider::new(schema())),
            "local",
            Arc::clone(&calls),
        );
        let mut remote = InstrumentedProvider::new(
            Arc::new(MemoryProvider::new(schema())),
            "remote",
            Arc::clone(&calls),
        );
        if let Some(operation) = fail_local_on {
            local = local.failing_on(operation);
        }
        if let Some(operation) = fail_remote_on {
            remote = remote.failing_on(operation);
        }

        let agent = SyncAgent::with_tables(
            "items_scope",
            Arc::new(local) as Arc<dyn SyncProvider>,
            Arc::new(remote) as Arc<dyn SyncProvider>,
            &["items"],
        )
        .unwrap();
        (calls, agent)
    }

    #[test]
    fn empty_scope_name_is_rejected() {
        let local = Arc::new(MemoryProvider::new(schema())) as Arc<dyn SyncProvider>;
        let remote = Arc::new(MemoryProvider::new(schema())) as Arc<dyn SyncProvider>;
        let result = SyncAgent::with_tables("  ", local, remote, &["items"]);
        assert!(matches!(result, Err(SyncError::Configuration(_))));
    }

    #[test]
    fn empty_table_list_is_rejected() {
        let local = Arc::new(MemoryProvider::new(schema())) as Arc<dyn SyncProvider>;
        let remote = Arc::new(MemoryProvider::new(schema())) as Arc<dyn SyncProvider>;
        let result = SyncAgent::with_tables::<&str>("scope", local, remote, &[]);
        assert!(matches!(result, Err(SyncError::Configuration(_))));
    }

    #[test]
    fn phase_order_is_fixed() {
        let (calls, agent) = instrumented_agent(None, None);
        agent.synchronize().unwrap();

        let observed = calls.lock().clone();
        let expected = [
            "remote:begin_session",
            "local:begin_session",
            "local:ensure_scopes",
            "remote:ensure_scopes",
            "remote:ensure_schema",
            "local:ensure_schema",
            "remote:ensure_database",
            "local:ensure_database",
            "local:get_local_timestamp",
            "local:get_change_batch",
            "remote:apply_changes",
            "remote:get_local_timestamp",
            "remote:get_change_batch",
            "local:apply_changes",
            "remote:write_scopes",
            "local:write_scopes",
            "remote:end_session",
            "local:end_session",
        ];
        assert_eq!(observed, expected);
    }

    #[test]
    fn observer_fires_twice_per_session() {
        struct Recorder(parking_lot::Mutex<Vec<SessionState>>);
        impl SessionStateObserver for Recorder {
            fn session_state_changed(&self, state: SessionState) {
                self.0.lock().push(state);
            }
        }

        let (_, _, agent) = agent_over_memory();
        let recorder = Arc::new(Recorder(parking_lot::Mutex::new(Vec::new())));
        agent.set_observer(Arc::clone(&recorder) as Arc<dyn SessionStateObserver>);

        agent.synchronize().unwrap();
        assert_eq!(
            *recorder.0.lock(),
            vec![SessionState::Synchronizing, SessionState::Ready]
        );
        assert!(agent.state().is_ready());
    }

    #[test]
    fn observer_fires_ready_even_on_failure() {
        struct Recorder(parking_lot::Mutex<Vec<SessionState>>);
        impl SessionStateObserver for Recorder {
            fn session_state_changed(&self, state: SessionState) {
                self.0.lock().push(state);
            }
        }

        let (_, agent) = instrumented_agent(None, Some("apply_changes"));
        let recorder = Arc::new(Recorder(parking_lot::Mutex::new(Vec::new())));
        agent.set_observer(Arc::clone(&recorder) as Arc<dyn SessionStateObserver>);

        assert!(agent.synchronize().is_err());
        assert_eq!(
            *recorder.0.lock(),
            vec![SessionState::Synchronizing, SessionState::Ready]
        );
    }

    #[test]
    fn remote_apply_failure_is_stage_tagged_and_sessions_end() {
        let (calls, agent) = instrumented_agent(None, Some("apply_changes"));
        let error = agent.synchronize().unwrap_err();

        assert_eq!(error.stage(), SyncStage::ApplyingChanges);
        let observed = calls.lock().clone();
        assert!(observed.contains(&"remote:end_session".to_string()));
        assert!(observed.contains(&"local:end_session".to_string()));
        // No scope writes after a failed apply.
        assert!(!observed.iter().any(|c| c.ends_with("write_scopes")));
    }

    #[test]
    fn selection_failure_is_stage_tagged() {
        let (_, agent) = instrumented_agent(Some("get_change_batch"), None);
        let error = agent.synchronize().unwrap_err();
        assert_eq!(error.stage(), SyncStage::SelectingChanges);
    }

    #[test]
    fn cancellation_before_first_phase() {
        let (calls, agent) = instrumented_agent(None, None);
        let token = CancellationToken::new();
        token.cancel();

        let error = agent
            .synchronize_with(SyncType::Normal, token)
            .unwrap_err();
        assert!(error.is_cancelled());

        // Teardown still reaches both peers; no phase ran.
        let observed = calls.lock().clone();
        assert_eq!(observed, vec!["remote:end_session", "local:end_session"]);
        assert!(agent.state().is_ready());
    }

    #[test]
    fn wrong_local_scope_count_is_a_protocol_error() {
        assert!(matches!(
            single_scope(Vec::new()),
            Err(SyncError::Protocol {
                stage: SyncStage::EnsureScopes,
                ..
            })
        ));

        let duplicated = vec![
            ScopeInfo::new(uuid::Uuid::new_v4(), "s"),
            ScopeInfo::new(uuid::Uuid::new_v4(), "s"),
        ];
        assert!(single_scope(duplicated).is_err());
    }

    #[test]
    fn wrong_remote_scope_count_is_a_protocol_error() {
        let client_id = uuid::Uuid::new_v4();
        let one = vec![ScopeInfo::new(uuid::Uuid::new_v4(), "s")];
        assert!(partition_remote_scopes(one, client_id).is_err());

        let three = vec![
            ScopeInfo::new(uuid::Uuid::new_v4(), "s"),
            ScopeInfo::new(uuid::Uuid::new_v4(), "s"),
            ScopeInfo::new(uuid::Uuid::new_v4(), "s"),
        ];
        assert!(partition_remote_scopes(three, client_id).is_err());

        // Two records, but neither matches the client reference.
        let unmatched = vec![
            ScopeInfo::new(uuid::Uuid::new_v4(), "s"),
            ScopeInfo::new(uuid::Uuid::new_v4(), "s"),
        ];
        assert!(partition_remote_scopes(unmatched, client_id).is_err());
    }

    #[test]
    fn policies_are_opposed_every_session() {
        use scopesync_protocol::ConflictResolutionPolicy;
        for policy in [
            ConflictResolutionPolicy::ServerWins,
            ConflictResolutionPolicy::ClientWins,
        ] {
            assert_eq!(policy.opposite().opposite(), policy);
            assert_ne!(policy.opposite(), policy);
        }
    }
}
