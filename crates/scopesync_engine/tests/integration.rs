//! End-to-end sessions over paired in-memory peers.

use parking_lot::RwLock;
use scopesync_engine::{
    CancellationToken, HttpClient, MemoryProvider, ProxyProvider, SyncAgent, SyncError,
    SyncProvider, SyncResult, SyncStage,
};
use scopesync_protocol::{
    BatchInfo, CellValue, ColumnType, ConflictResolutionPolicy, DatabaseChangesApplied,
    DatabaseChangesSelected, MessageApplyChanges, MessageBeginSession, MessageEnsureDatabase,
    MessageEnsureSchema, MessageEnsureScopes, MessageGetChangesBatch, MessageTimestamp,
    MessageWriteScopes, ScopeInfo, SyncColumn, SyncConfiguration, SyncContext, SyncSchema,
    SyncTable, SyncType,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use uuid::Uuid;

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

fn row(id: i64, label: &str) -> Vec<CellValue> {
    vec![CellValue::Integer(id), CellValue::from(label)]
}

fn pair() -> (Arc<MemoryProvider>, Arc<MemoryProvider>, SyncAgent) {
    let client = Arc::new(MemoryProvider::new(schema()));
    let server = Arc::new(MemoryProvider::new(schema()));
    let agent = SyncAgent::with_tables(
        "items_scope",
        Arc::clone(&client) as Arc<dyn SyncProvider>,
        Arc::clone(&server) as Arc<dyn SyncProvider>,
        &["items"],
    )
    .unwrap();
    (client, server, agent)
}

fn scopes_by_id(provider: &MemoryProvider) -> HashMap<Uuid, ScopeInfo> {
    provider.scopes().into_iter().map(|s| (s.id, s)).collect()
}

/// A forwarding peer that can cancel a token mid-session or fail one
/// operation, and counts teardown calls.
struct HookedProvider {
    inner: Arc<MemoryProvider>,
    cancel_on_timestamp: RwLock<Option<CancellationToken>>,
    fail_apply: bool,
    end_sessions: AtomicUsize,
}

impl HookedProvider {
    fn new(inner: Arc<MemoryProvider>) -> Self {
        Self {
            inner,
            cancel_on_timestamp: RwLock::new(None),
            fail_apply: false,
            end_sessions: AtomicUsize::new(0),
        }
    }

    fn failing_apply(inner: Arc<MemoryProvider>) -> Self {
        Self {
            fail_apply: true,
            ..Self::new(inner)
        }
    }

    fn cancel_after_timestamp(&self, token: CancellationToken) {
        *self.cancel_on_timestamp.write() = Some(token);
    }

    fn end_session_count(&self) -> usize {
        self.end_sessions.load(Ordering::SeqCst)
    }
}

impl SyncProvider for HookedProvider {
    fn begin_session(
        &self,
        context: SyncContext,
        message: MessageBeginSession,
    ) -> SyncResult<(SyncContext, SyncConfiguration)> {
        self.inner.begin_session(context, message)
    }

    fn end_session(&self, context: SyncContext) -> SyncResult<SyncContext> {
        self.end_sessions.fetch_add(1, Ordering::SeqCst);
        self.inner.end_session(context)
    }

    fn ensure_scopes(
        &self,
        context: SyncContext,
        message: MessageEnsureScopes,
    ) -> SyncResult<(SyncContext, Vec<ScopeInfo>)> {
        self.inner.ensure_scopes(context, message)
    }

    fn ensure_schema(
        &self,
        context: SyncContext,
        message: MessageEnsureSchema,
    ) -> SyncResult<(SyncContext, SyncSchema)> {
        self.inner.ensure_schema(context, message)
    }

    fn ensure_database(
        &self,
        context: SyncContext,
        message: MessageEnsureDatabase,
    ) -> SyncResult<SyncContext> {
        self.inner.ensure_database(context, message)
    }

    fn get_local_timestamp(
        &self,
        context: SyncContext,
        message: MessageTimestamp,
    ) -> SyncResult<(SyncContext, i64)> {
        let result = self.inner.get_local_timestamp(context, message);
        if let Some(token) = self.cancel_on_timestamp.read().as_ref() {
            token.cancel();
        }
        result
    }

    fn get_change_batch(
        &self,
        context: SyncContext,
        message: MessageGetChangesBatch,
    ) -> SyncResult<(SyncContext, BatchInfo, DatabaseChangesSelected)> {
        self.inner.get_change_batch(context, message)
    }

    fn apply_changes(
        &self,
        context: SyncContext,
        message: MessageApplyChanges,
    ) -> SyncResult<(SyncContext, DatabaseChangesApplied)> {
        if self.fail_apply {
            return Err(SyncError::provider("storage rejected the batch"));
        }
        self.inner.apply_changes(context, message)
    }

    fn write_scopes(
        &self,
        context: SyncContext,
        message: MessageWriteScopes,
    ) -> SyncResult<SyncContext> {
        self.inner.write_scopes(context, message)
    }

    fn set_cancellation(&self, token: CancellationToken) {
        self.inner.set_cancellation(token);
    }

    fn set_progress(&self, sink: Arc<dyn scopesync_engine::ProgressSink>) {
        self.inner.set_progress(sink);
    }

    fn set_configuration(&self, mutate: &dyn Fn(&mut SyncConfiguration)) -> SyncResult<()> {
        self.inner.set_configuration(mutate)
    }

    fn is_server_capable(&self) -> bool {
        true
    }
}

#[test]
fn fresh_peers_upload_client_rows() {
    let (client, server, agent) = pair();
    client.insert("items", row(1, "a")).unwrap();
    client.insert("items", row(2, "b")).unwrap();

    let context = agent.synchronize().unwrap();

    assert_eq!(context.total_changes_uploaded, 2);
    assert_eq!(context.total_changes_downloaded, 0);
    assert_eq!(context.total_sync_conflicts, 0);
    assert_eq!(context.total_sync_errors, 0);

    // The server holds both rows, content-equal.
    assert_eq!(server.get("items", &CellValue::Integer(1)), Some(row(1, "a")));
    assert_eq!(server.get("items", &CellValue::Integer(2)), Some(row(2, "b")));

    // Every participating scope record left its pristine state.
    for scope in client.scopes().iter().chain(server.scopes().iter()) {
        assert!(!scope.is_new_scope, "scope {} still pristine", scope.id);
        assert!(scope.last_sync.is_some());
    }
    assert_eq!(client.scopes().len(), 2);
    assert_eq!(server.scopes().len(), 2);
}

#[test]
fn second_session_without_writes_moves_nothing() {
    let (client, server, agent) = pair();
    client.insert("items", row(1, "a")).unwrap();
    agent.synchronize().unwrap();

    let before_client = scopes_by_id(&client);
    let before_server = scopes_by_id(&server);

    let context = agent.synchronize().unwrap();

    assert_eq!(context.total_changes_uploaded, 0);
    assert_eq!(context.total_changes_downloaded, 0);
    assert_eq!(context.total_sync_conflicts, 0);
    assert_eq!(context.total_sync_errors, 0);

    // Cursor identities are stable; completion metadata moved on.
    for (id, after) in scopes_by_id(&client).iter().chain(scopes_by_id(&server).iter()) {
        let before = before_client
            .get(id)
            .or_else(|| before_server.get(id))
            .expect("scope record vanished between sessions");
        assert!(after.last_sync >= before.last_sync);
        assert!(after.last_sync_timestamp >= before.last_sync_timestamp);
        assert!(!after.is_new_scope);
    }
}

#[test]
fn both_directions_in_one_session() {
    let (client, server, agent) = pair();
    agent.synchronize().unwrap();

    client.insert("items", row(1, "from-client")).unwrap();
    server.insert("items", row(2, "from-server")).unwrap();

    let context = agent.synchronize().unwrap();
    assert_eq!(context.total_changes_uploaded, 1);
    assert_eq!(context.total_changes_downloaded, 1);

    for peer in [&client, &server] {
        assert_eq!(
            peer.get("items", &CellValue::Integer(1)),
            Some(row(1, "from-client"))
        );
        assert_eq!(
            peer.get("items", &CellValue::Integer(2)),
            Some(row(2, "from-server"))
        );
    }
}

#[test]
fn divergent_update_server_wins() {
    let (client, server, agent) = pair();
    client.insert("items", row(1, "a")).unwrap();
    agent.synchronize().unwrap();

    client.update("items", row(1, "c")).unwrap();
    server.update("items", row(1, "d")).unwrap();

    let context = agent.synchronize().unwrap();
    assert_eq!(context.total_sync_conflicts, 1);
    assert_eq!(client.get("items", &CellValue::Integer(1)), Some(row(1, "d")));
    assert_eq!(server.get("items", &CellValue::Integer(1)), Some(row(1, "d")));
}

#[test]
fn divergent_update_client_wins() {
    let (client, server, agent) = pair();
    agent.set_configuration(
        agent
            .configuration()
            .with_policy(ConflictResolutionPolicy::ClientWins),
    );
    client.insert("items", row(1, "a")).unwrap();
    agent.synchronize().unwrap();

    client.update("items", row(1, "c")).unwrap();
    server.update("items", row(1, "d")).unwrap();

    let context = agent.synchronize().unwrap();
    assert_eq!(context.total_sync_conflicts, 1);
    // The winning row came from the client-side apply's perspective,
    // so nothing was downloaded on top of it.
    assert_eq!(context.total_changes_downloaded, 0);
    assert_eq!(client.get("items", &CellValue::Integer(1)), Some(row(1, "c")));
    assert_eq!(server.get("items", &CellValue::Integer(1)), Some(row(1, "c")));
}

#[test]
fn deletions_replicate_after_first_session() {
    let (client, server, agent) = pair();
    client.insert("items", row(1, "a")).unwrap();
    client.insert("items", row(2, "b")).unwrap();
    agent.synchronize().unwrap();
    assert_eq!(server.row_count("items"), 2);

    client.delete("items", &CellValue::Integer(2)).unwrap();
    let context = agent.synchronize().unwrap();

    assert_eq!(context.total_changes_uploaded, 1);
    assert_eq!(server.row_count("items"), 1);
    assert_eq!(server.get("items", &CellValue::Integer(2)), None);
}

#[test]
fn server_deletions_do_not_reach_a_pristine_client() {
    let (client, server, agent) = pair();
    server.insert("items", row(1, "keep")).unwrap();
    server.insert("items", row(2, "drop")).unwrap();
    server.delete("items", &CellValue::Integer(2)).unwrap();

    agent.synchronize().unwrap();

    // The live row arrives; the tombstone stays home.
    assert_eq!(client.get("items", &CellValue::Integer(1)), Some(row(1, "keep")));
    assert_eq!(client.get("items", &CellValue::Integer(2)), None);
    assert_eq!(client.row_count("items"), 1);
}

#[test]
fn timestamps_land_in_their_own_version_spaces() {
    let (client, server, agent) = pair();
    client.insert("items", row(1, "a")).unwrap();
    client.insert("items", row(2, "b")).unwrap();
    agent.synchronize().unwrap();

    let client_scopes = scopes_by_id(&client);
    let server_scopes = scopes_by_id(&server);

    let client_own = client_scopes
        .values()
        .find(|s| s.is_local)
        .expect("client own record");
    // The server's reference record shares the client's scope id.
    let reference = server_scopes
        .get(&client_own.id)
        .expect("reference record");
    let server_own = server_scopes
        .values()
        .find(|s| s.id != client_own.id)
        .expect("server own record");

    // Two inserts happened on the client before selection.
    assert_eq!(client_own.last_sync_timestamp, 2);
    // The server's records agree with each other, in server time.
    assert_eq!(reference.last_sync_timestamp, server_own.last_sync_timestamp);
    // Applying two rows advanced the server's version store.
    assert_eq!(server_own.last_sync_timestamp, 2);
}

#[test]
fn parameters_restrict_the_upload() {
    let client = Arc::new(MemoryProvider::new(SyncSchema::new(vec![SyncTable::new(
        "items",
        vec![
            SyncColumn::new("id", ColumnType::Integer),
            SyncColumn::new("region", ColumnType::Text),
        ],
        "id",
    )])));
    let server = Arc::new(MemoryProvider::new(SyncSchema::new(vec![SyncTable::new(
        "items",
        vec![
            SyncColumn::new("id", ColumnType::Integer),
            SyncColumn::new("region", ColumnType::Text),
        ],
        "id",
    )])));
    let agent = SyncAgent::with_tables(
        "items_scope",
        Arc::clone(&client) as Arc<dyn SyncProvider>,
        Arc::clone(&server) as Arc<dyn SyncProvider>,
        &["items"],
    )
    .unwrap();

    let mut configuration = agent.configuration();
    configuration.filters = vec![scopesync_protocol::SyncFilter::new("items", "region")];
    agent.set_configuration(configuration);
    agent.add_parameter("region", CellValue::from("emea"));

    client
        .insert("items", vec![CellValue::Integer(1), CellValue::from("emea")])
        .unwrap();
    client
        .insert("items", vec![CellValue::Integer(2), CellValue::from("apac")])
        .unwrap();

    let context = agent.synchronize().unwrap();
    assert_eq!(context.total_changes_uploaded, 1);
    assert!(server.get("items", &CellValue::Integer(1)).is_some());
    assert!(server.get("items", &CellValue::Integer(2)).is_none());
}

#[test]
fn reinitialize_restores_the_server_state() {
    let (client, server, agent) = pair();
    server.insert("items", row(1, "a")).unwrap();
    agent.synchronize().unwrap();
    assert_eq!(client.get("items", &CellValue::Integer(1)), Some(row(1, "a")));

    // A stray local edit the operator wants gone.
    client.update("items", row(1, "x")).unwrap();

    let context = agent
        .synchronize_with(SyncType::Reinitialize, CancellationToken::new())
        .unwrap();

    assert_eq!(context.total_changes_uploaded, 0);
    assert_eq!(client.get("items", &CellValue::Integer(1)), Some(row(1, "a")));
    assert_eq!(server.get("items", &CellValue::Integer(1)), Some(row(1, "a")));
}

#[test]
fn cancellation_during_selection_leaves_scopes_untouched() {
    let client_store = Arc::new(MemoryProvider::new(schema()));
    let server_store = Arc::new(MemoryProvider::new(schema()));
    let client = Arc::new(HookedProvider::new(Arc::clone(&client_store)));
    let server = Arc::new(HookedProvider::new(Arc::clone(&server_store)));
    let agent = SyncAgent::with_tables(
        "items_scope",
        Arc::clone(&client) as Arc<dyn SyncProvider>,
        Arc::clone(&server) as Arc<dyn SyncProvider>,
        &["items"],
    )
    .unwrap();

    // Establish scope records with one clean session.
    agent.synchronize().unwrap();
    let before_client = scopes_by_id(&client_store);
    let before_server = scopes_by_id(&server_store);
    let ends_before = (client.end_session_count(), server.end_session_count());

    // Cancel right after the client timestamp is captured, before
    // any change selection runs.
    client_store.insert("items", row(1, "a")).unwrap();
    let token = CancellationToken::new();
    client.cancel_after_timestamp(token.clone());

    let error = agent
        .synchronize_with(SyncType::Normal, token)
        .unwrap_err();
    assert!(error.is_cancelled());

    // Teardown reached both peers; persisted cursors are untouched.
    assert_eq!(client.end_session_count(), ends_before.0 + 1);
    assert_eq!(server.end_session_count(), ends_before.1 + 1);
    assert_eq!(scopes_by_id(&client_store), before_client);
    assert_eq!(scopes_by_id(&server_store), before_server);
}

#[test]
fn failed_server_apply_aborts_before_any_scope_write() {
    let client_store = Arc::new(MemoryProvider::new(schema()));
    let server_store = Arc::new(MemoryProvider::new(schema()));
    let client = Arc::new(HookedProvider::new(Arc::clone(&client_store)));
    let server = Arc::new(HookedProvider::failing_apply(Arc::clone(&server_store)));
    let agent = SyncAgent::with_tables(
        "items_scope",
        Arc::clone(&client) as Arc<dyn SyncProvider>,
        Arc::clone(&server) as Arc<dyn SyncProvider>,
        &["items"],
    )
    .unwrap();

    client_store.insert("items", row(1, "a")).unwrap();
    let error = agent.synchronize().unwrap_err();

    assert_eq!(error.stage(), SyncStage::ApplyingChanges);
    assert!(matches!(error, SyncError::Provider { .. }));

    // Teardown still ran on both peers, and no cursor was persisted
    // beyond what scope discovery created.
    assert_eq!(client.end_session_count(), 1);
    assert_eq!(server.end_session_count(), 1);
    for scope in client_store.scopes().iter().chain(server_store.scopes().iter()) {
        assert!(scope.is_new_scope);
        assert!(scope.last_sync.is_none());
    }
}

#[test]
fn proxied_remote_is_rejected_by_the_tables_constructor() {
    struct NoRoute;
    impl HttpClient for NoRoute {
        fn post(&self, _url: &str, _body: Vec<u8>) -> Result<Vec<u8>, String> {
            Err("no route".into())
        }
        fn is_healthy(&self) -> bool {
            false
        }
    }

    let client = Arc::new(MemoryProvider::new(schema())) as Arc<dyn SyncProvider>;
    let proxy = Arc::new(ProxyProvider::new("http://sync.local", NoRoute)) as Arc<dyn SyncProvider>;

    let result = SyncAgent::with_tables("items_scope", client, proxy, &["items"]);
    assert!(matches!(result, Err(SyncError::Configuration(_))));
}
