//! In-memory reference peer.

use crate::error::{SyncError, SyncResult};
use crate::provider::SyncProvider;
use crate::session::{CancellationToken, ProgressArgs, ProgressEvent, ProgressSink};
use parking_lot::RwLock;
use scopesync_protocol::{
    BatchInfo, CellValue, DatabaseChangesApplied, DatabaseChangesSelected, MessageApplyChanges,
    MessageBeginSession, MessageEnsureDatabase, MessageEnsureSchema, MessageEnsureScopes,
    MessageGetChangesBatch, MessageTimestamp, MessageWriteScopes, RowState, ScopeInfo,
    SyncConfiguration, SyncContext, SyncRow, SyncSchema, SyncTable, TableChanges,
    TableChangesApplied, TableChangesSelected,
};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// A tracked row with its change metadata.
#[derive(Debug, Clone)]
struct TrackedRow {
    values: Vec<CellValue>,
    /// Version-store timestamp of the last write.
    timestamp: i64,
    tombstone: bool,
    /// Scope that applied this row during sync; `None` for local writes.
    origin: Option<Uuid>,
}

#[derive(Debug, Default)]
struct TableStore {
    rows: BTreeMap<String, TrackedRow>,
}

#[derive(Debug, Default)]
struct MemoryStore {
    tables: HashMap<String, TableStore>,
    scopes: HashMap<Uuid, ScopeInfo>,
    /// Own scope record per scope name.
    own_scope_ids: HashMap<String, Uuid>,
}

/// A fully in-memory database peer.
///
/// Rows are keyed by primary-key cell and carry a timestamp from a
/// per-peer monotonic version counter, a tombstone flag, and the
/// scope that applied them (for echo suppression). Capable of either
/// side of a session; used by tests and in-process deployments.
pub struct MemoryProvider {
    /// Tables this peer owns, independent of any session.
    definition: SyncSchema,
    configuration: RwLock<SyncConfiguration>,
    store: RwLock<MemoryStore>,
    version: AtomicI64,
    cancellation: RwLock<CancellationToken>,
    progress: RwLock<Option<Arc<dyn ProgressSink>>>,
    /// Batch staging directories to release at session end.
    staged: RwLock<Vec<PathBuf>>,
}

impl MemoryProvider {
    /// Creates a peer owning the given table definitions.
    pub fn new(definition: SyncSchema) -> Self {
        let mut store = MemoryStore::default();
        for table in &definition.tables {
            store.tables.insert(table.name.clone(), TableStore::default());
        }

        Self {
            definition,
            configuration: RwLock::new(SyncConfiguration::default()),
            store: RwLock::new(store),
            version: AtomicI64::new(0),
            cancellation: RwLock::new(CancellationToken::new()),
            progress: RwLock::new(None),
            staged: RwLock::new(Vec::new()),
        }
    }

    /// Creates a peer with no tables of its own.
    ///
    /// Such a peer adopts whatever schema the session negotiates;
    /// typical for a fresh client syncing against a configured server.
    pub fn empty() -> Self {
        Self::new(SyncSchema::default())
    }

    fn next_version(&self) -> i64 {
        self.version.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn report(&self, context: &SyncContext, event: ProgressEvent) {
        if let Some(sink) = self.progress.read().clone() {
            sink.report(&ProgressArgs::new(context.session_id, event));
        }
    }

    fn check_cancelled(&self) -> SyncResult<()> {
        self.cancellation.read().ensure_active()
    }

    /// Looks up a table definition, preferring the peer's own tables
    /// over the session schema.
    fn table_definition(&self, name: &str) -> Option<SyncTable> {
        self.definition
            .table(name)
            .cloned()
            .or_else(|| self.configuration.read().schema.table(name).cloned())
    }

    /// Resolves the schema this peer would serve for a configuration.
    fn authoritative_schema(&self, configuration: &SyncConfiguration) -> SyncResult<SyncSchema> {
        if configuration.schema.has_tables() {
            return Ok(configuration.schema.clone());
        }
        if !configuration.setup_tables.is_empty() {
            let mut tables = Vec::with_capacity(configuration.setup_tables.len());
            for name in &configuration.setup_tables {
                let table = self.definition.table(name).cloned().ok_or_else(|| {
                    SyncError::provider(format!("table '{name}' is not defined on this peer"))
                })?;
                tables.push(table);
            }
            return Ok(SyncSchema::new(tables));
        }
        if self.definition.has_tables() {
            return Ok(self.definition.clone());
        }
        Err(SyncError::provider(
            "no tables defined or registered on this peer",
        ))
    }

    fn primary_key_index(table: &SyncTable) -> SyncResult<usize> {
        table.primary_key_index().ok_or_else(|| {
            SyncError::provider(format!(
                "table '{}' declares unknown primary key '{}'",
                table.name, table.primary_key
            ))
        })
    }

    fn row_key(table: &SyncTable, values: &[CellValue]) -> SyncResult<String> {
        let index = Self::primary_key_index(table)?;
        values
            .get(index)
            .map(CellValue::to_key)
            .ok_or_else(|| SyncError::provider(format!("row for '{}' misses its key cell", table.name)))
    }

    // -- local write surface -------------------------------------------------

    /// Inserts or replaces a row through the local write path.
    pub fn insert(&self, table_name: &str, values: Vec<CellValue>) -> SyncResult<()> {
        let table = self
            .table_definition(table_name)
            .ok_or_else(|| SyncError::provider(format!("unknown table '{table_name}'")))?;
        let key = Self::row_key(&table, &values)?;
        let timestamp = self.next_version();

        let mut store = self.store.write();
        let rows = &mut store.tables.entry(table_name.to_string()).or_default().rows;
        rows.insert(
            key,
            TrackedRow {
                values,
                timestamp,
                tombstone: false,
                origin: None,
            },
        );
        Ok(())
    }

    /// Updates a row; alias of [`insert`](Self::insert) for readability.
    pub fn update(&self, table_name: &str, values: Vec<CellValue>) -> SyncResult<()> {
        self.insert(table_name, values)
    }

    /// Deletes a row through the local write path, leaving a tombstone.
    pub fn delete(&self, table_name: &str, key: &CellValue) -> SyncResult<()> {
        let table = self
            .table_definition(table_name)
            .ok_or_else(|| SyncError::provider(format!("unknown table '{table_name}'")))?;
        let index = Self::primary_key_index(&table)?;
        let timestamp = self.next_version();

        let mut store = self.store.write();
        let rows = &mut store.tables.entry(table_name.to_string()).or_default().rows;
        match rows.get_mut(&key.to_key()) {
            Some(row) => {
                row.tombstone = true;
                row.timestamp = timestamp;
                row.origin = None;
            }
            None => {
                // Tombstone an unseen key so the deletion still replicates.
                let mut values = vec![CellValue::Null; table.columns.len()];
                values[index] = key.clone();
                rows.insert(
                    key.to_key(),
                    TrackedRow {
                        values,
                        timestamp,
                        tombstone: true,
                        origin: None,
                    },
                );
            }
        }
        Ok(())
    }

    /// Reads a live row by primary key.
    pub fn get(&self, table_name: &str, key: &CellValue) -> Option<Vec<CellValue>> {
        let store = self.store.read();
        let row = store.tables.get(table_name)?.rows.get(&key.to_key())?;
        if row.tombstone {
            None
        } else {
            Some(row.values.clone())
        }
    }

    /// Number of live rows in a table.
    pub fn row_count(&self, table_name: &str) -> usize {
        self.store
            .read()
            .tables
            .get(table_name)
            .map(|t| t.rows.values().filter(|r| !r.tombstone).count())
            .unwrap_or(0)
    }

    /// Reads a persisted scope record.
    pub fn scope(&self, id: Uuid) -> Option<ScopeInfo> {
        self.store.read().scopes.get(&id).cloned()
    }

    /// All persisted scope records.
    pub fn scopes(&self) -> Vec<ScopeInfo> {
        self.store.read().scopes.values().cloned().collect()
    }

    // -- staging -------------------------------------------------------------

    fn stage_batch(
        &self,
        context: &SyncContext,
        message: &MessageGetChangesBatch,
        batch: &BatchInfo,
    ) -> SyncResult<()> {
        let Some(root) = &message.batch_directory else {
            return Ok(());
        };
        let directory = root.join(context.session_id.to_string());
        fs::create_dir_all(&directory)
            .map_err(|e| SyncError::provider(format!("cannot create staging directory: {e}")))?;

        let part_size = message.batch_size.max(1) as usize;
        for table in &batch.tables {
            for (part, rows) in table.rows.chunks(part_size).enumerate() {
                let path = directory.join(format!("{}-{}-{part}.json", batch.id, table.table_name));
                let staged = TableChanges::new(&table.table_name, rows.to_vec());
                let bytes = serde_json::to_vec(&staged)
                    .map_err(|e| SyncError::provider(format!("cannot stage batch part: {e}")))?;
                fs::write(&path, bytes)
                    .map_err(|e| SyncError::provider(format!("cannot stage batch part: {e}")))?;
            }
        }

        self.staged.write().push(directory);
        Ok(())
    }

    fn release_staged(&self) {
        for directory in self.staged.write().drain(..) {
            if let Err(error) = fs::remove_dir_all(&directory) {
                if error.kind() != std::io::ErrorKind::NotFound {
                    warn!(directory = %directory.display(), %error, "failed to release staged batch");
                }
            }
        }
    }
}

impl SyncProvider for MemoryProvider {
    fn begin_session(
        &self,
        context: SyncContext,
        message: MessageBeginSession,
    ) -> SyncResult<(SyncContext, SyncConfiguration)> {
        let mut configuration = message.configuration;
        // A peer that owns tables answers with the resolved schema;
        // a bare peer echoes and adopts whatever arrives.
        if !configuration.schema.has_tables() && self.definition.has_tables() {
            configuration.schema = self.authoritative_schema(&configuration)?;
        }
        *self.configuration.write() = configuration.clone();

        self.report(&context, ProgressEvent::SessionBegin);
        Ok((context, configuration))
    }

    fn end_session(&self, context: SyncContext) -> SyncResult<SyncContext> {
        self.release_staged();
        self.report(&context, ProgressEvent::SessionEnd);
        Ok(context)
    }

    fn ensure_scopes(
        &self,
        context: SyncContext,
        message: MessageEnsureScopes,
    ) -> SyncResult<(SyncContext, Vec<ScopeInfo>)> {
        self.check_cancelled()?;
        let mut store = self.store.write();

        let own_id = match store.own_scope_ids.get(&message.scope_name) {
            Some(id) => *id,
            None => {
                let scope = ScopeInfo::new(Uuid::new_v4(), &message.scope_name).as_local();
                let id = scope.id;
                store.scopes.insert(id, scope);
                store.own_scope_ids.insert(message.scope_name.clone(), id);
                id
            }
        };
        let own = store
            .scopes
            .get(&own_id)
            .cloned()
            .ok_or_else(|| SyncError::provider("own scope record vanished"))?;

        let mut scopes = vec![own];
        if let Some(reference_id) = message.client_reference_id {
            let reference = store
                .scopes
                .entry(reference_id)
                .or_insert_with(|| ScopeInfo::new(reference_id, &message.scope_name))
                .clone();
            scopes.push(reference);
        }

        self.report(&context, ProgressEvent::ScopesLoaded { count: scopes.len() });
        Ok((context, scopes))
    }

    fn ensure_schema(
        &self,
        context: SyncContext,
        message: MessageEnsureSchema,
    ) -> SyncResult<(SyncContext, SyncSchema)> {
        let schema = match message.schema {
            Some(schema) => {
                self.configuration.write().schema = schema.clone();
                schema
            }
            None => {
                let configuration = self.configuration.read().clone();
                let schema = self.authoritative_schema(&configuration)?;
                self.configuration.write().schema = schema.clone();
                schema
            }
        };

        self.report(
            &context,
            ProgressEvent::SchemaApplied {
                tables: schema.tables.len(),
            },
        );
        Ok((context, schema))
    }

    fn ensure_database(
        &self,
        context: SyncContext,
        message: MessageEnsureDatabase,
    ) -> SyncResult<SyncContext> {
        let mut store = self.store.write();
        for table in &message.schema.tables {
            store.tables.entry(table.name.clone()).or_default();
        }
        // Re-seat the scope record so a wiped store is recoverable.
        store
            .scopes
            .entry(message.scope.id)
            .or_insert_with(|| message.scope.clone());
        drop(store);

        self.report(&context, ProgressEvent::DatabaseProvisioned);
        Ok(context)
    }

    fn get_local_timestamp(
        &self,
        context: SyncContext,
        _message: MessageTimestamp,
    ) -> SyncResult<(SyncContext, i64)> {
        Ok((context, self.version.load(Ordering::SeqCst)))
    }

    fn get_change_batch(
        &self,
        context: SyncContext,
        message: MessageGetChangesBatch,
    ) -> SyncResult<(SyncContext, BatchInfo, DatabaseChangesSelected)> {
        self.check_cancelled()?;
        let configuration = self.configuration.read().clone();
        let store = self.store.read();

        let mut table_changes = Vec::new();
        let mut selected = Vec::new();
        for table in &message.schema.tables {
            let table_store = store.tables.get(&table.name).ok_or_else(|| {
                SyncError::provider(format!("table '{}' is not provisioned", table.name))
            })?;

            // Equality filters: declared column plus a bound parameter.
            let mut filters = Vec::new();
            for filter in configuration.filters_for(&table.name) {
                if let (Some(index), Some(value)) = (
                    table.column_index(&filter.column_name),
                    message.parameters.get(&filter.column_name),
                ) {
                    filters.push((index, value.clone()));
                }
            }

            let mut rows = Vec::new();
            let mut upserts = 0u64;
            let mut deletes = 0u64;
            for row in table_store.rows.values() {
                self.check_cancelled()?;
                // Never echo rows this peer applied on behalf of the
                // requesting side.
                if row.origin == Some(message.scope.id) {
                    continue;
                }
                if message.scope.is_new_scope {
                    if row.tombstone {
                        continue;
                    }
                } else if row.timestamp <= message.scope.timestamp {
                    continue;
                }
                if !filters
                    .iter()
                    .all(|(index, value)| row.values.get(*index) == Some(value))
                {
                    continue;
                }

                if row.tombstone {
                    deletes += 1;
                    rows.push(SyncRow::deleted(row.values.clone()));
                } else {
                    upserts += 1;
                    rows.push(SyncRow::modified(row.values.clone()));
                }
            }

            self.report(
                &context,
                ProgressEvent::ChangesSelected {
                    table_name: table.name.clone(),
                    rows: upserts + deletes,
                },
            );
            selected.push(TableChangesSelected {
                table_name: table.name.clone(),
                upserts,
                deletes,
            });
            table_changes.push(TableChanges::new(&table.name, rows));
        }
        drop(store);

        let batch = BatchInfo::new(table_changes);
        self.stage_batch(&context, &message, &batch)?;
        debug!(
            session = %context.session_id,
            rows = batch.row_count(),
            "selected change batch"
        );

        Ok((context, batch, DatabaseChangesSelected { tables: selected }))
    }

    fn apply_changes(
        &self,
        context: SyncContext,
        message: MessageApplyChanges,
    ) -> SyncResult<(SyncContext, DatabaseChangesApplied)> {
        self.check_cancelled()?;
        let mut store = self.store.write();

        let mut results = Vec::new();
        for changes in &message.changes.tables {
            let table = self.table_definition(&changes.table_name).ok_or_else(|| {
                SyncError::provider(format!("table '{}' is not provisioned", changes.table_name))
            })?;
            let key_index = Self::primary_key_index(&table)?;
            let rows = &mut store
                .tables
                .entry(changes.table_name.clone())
                .or_default()
                .rows;

            let mut applied = 0u64;
            let mut failed = 0u64;
            let mut conflicts = 0u64;
            for row in &changes.rows {
                self.check_cancelled()?;
                let Some(key_cell) = row.values.get(key_index) else {
                    failed += 1;
                    continue;
                };
                let key = key_cell.to_key();

                // A pristine receiver has nothing the deletion could
                // target; replaying it would shadow future inserts.
                if message.scope.is_new_scope && row.state == RowState::Deleted {
                    continue;
                }

                let existing = rows.get(&key);
                let conflicting = existing.map_or(false, |current| {
                    current.timestamp > message.scope.timestamp
                        && current.origin != Some(message.scope.id)
                });
                if conflicting {
                    conflicts += 1;
                    if !message.policy.incoming_wins() {
                        continue;
                    }
                }

                let timestamp = self.next_version();
                match row.state {
                    RowState::Modified => {
                        rows.insert(
                            key,
                            TrackedRow {
                                values: row.values.clone(),
                                timestamp,
                                tombstone: false,
                                origin: Some(message.scope.id),
                            },
                        );
                    }
                    RowState::Deleted => {
                        if let Some(current) = rows.get_mut(&key) {
                            current.tombstone = true;
                            current.timestamp = timestamp;
                            current.origin = Some(message.scope.id);
                        }
                        // Deleting an unseen row is a no-op, not a failure.
                    }
                }
                applied += 1;
            }

            self.report(
                &context,
                ProgressEvent::ChangesApplied {
                    table_name: changes.table_name.clone(),
                    rows: applied,
                    conflicts,
                },
            );
            results.push(TableChangesApplied {
                table_name: changes.table_name.clone(),
                applied,
                failed,
                resolved_conflicts: conflicts,
            });
        }

        debug!(
            session = %context.session_id,
            applied = results.iter().map(|t| t.applied).sum::<u64>(),
            conflicts = results.iter().map(|t| t.resolved_conflicts).sum::<u64>(),
            "applied change batch"
        );
        Ok((context, DatabaseChangesApplied { tables: results }))
    }

    fn write_scopes(
        &self,
        context: SyncContext,
        message: MessageWriteScopes,
    ) -> SyncResult<SyncContext> {
        // One lock guards the whole upsert, so either all records
        // land or none do.
        let mut store = self.store.write();
        for scope in message.scopes {
            if scope.is_local {
                store.own_scope_ids.insert(scope.name.clone(), scope.id);
            }
            store.scopes.insert(scope.id, scope);
        }
        Ok(context)
    }

    fn set_cancellation(&self, token: CancellationToken) {
        *self.cancellation.write() = token;
    }

    fn set_progress(&self, sink: Arc<dyn ProgressSink>) {
        *self.progress.write() = Some(sink);
    }

    fn set_configuration(&self, mutate: &dyn Fn(&mut SyncConfiguration)) -> SyncResult<()> {
        mutate(&mut self.configuration.write());
        Ok(())
    }

    fn is_server_capable(&self) -> bool {
        true
    }
}
