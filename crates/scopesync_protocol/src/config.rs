//! Session configuration.

use crate::policy::ConflictResolutionPolicy;
use crate::schema::SyncSchema;
use crate::wire::SerializationFormat;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Declares a filterable column on a replicated table.
///
/// A filter only takes effect when a session parameter with the same
/// name as the column is bound.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncFilter {
    /// Table the filter applies to.
    pub table_name: String,
    /// Column matched against the parameter value.
    pub column_name: String,
}

impl SyncFilter {
    /// Creates a filter declaration.
    pub fn new(table_name: impl Into<String>, column_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            column_name: column_name.into(),
        }
    }
}

/// Settings governing one sync session.
///
/// The configuration is data owned by the session: it is seeded from
/// the client at construction time and may be replaced wholesale by
/// the server during the session handshake.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfiguration {
    /// Logical scope label shared by all scope records of a session.
    pub scope_name: String,
    /// Name of the table holding persisted scope records.
    pub scope_info_table_name: String,
    /// Wire format for proxied payloads.
    pub serialization_format: SerializationFormat,
    /// Table names registered for replication.
    ///
    /// The authoritative peer resolves these to full table
    /// definitions during the session handshake. Empty means "every
    /// table the authoritative peer owns".
    pub setup_tables: Vec<String>,
    /// Replicated schema.
    pub schema: SyncSchema,
    /// Declared filterable columns.
    pub filters: Vec<SyncFilter>,
    /// Winner rule for conflicting rows.
    pub conflict_resolution_policy: ConflictResolutionPolicy,
    /// Maximum rows per staged batch part.
    pub batch_size: u32,
    /// Directory for staging batch parts, when providers spill to disk.
    pub batch_directory: Option<PathBuf>,
}

impl SyncConfiguration {
    /// Default scope label used when the caller does not supply one.
    pub const DEFAULT_SCOPE_NAME: &'static str = "DefaultScope";

    /// Creates a configuration for the given scope name.
    pub fn new(scope_name: impl Into<String>) -> Self {
        Self {
            scope_name: scope_name.into(),
            scope_info_table_name: "scope_info".into(),
            serialization_format: SerializationFormat::Json,
            setup_tables: Vec::new(),
            schema: SyncSchema::default(),
            filters: Vec::new(),
            conflict_resolution_policy: ConflictResolutionPolicy::default(),
            batch_size: 500,
            batch_directory: None,
        }
    }

    /// Sets the replicated schema.
    pub fn with_schema(mut self, schema: SyncSchema) -> Self {
        self.schema = schema;
        self
    }

    /// Sets the conflict resolution policy.
    pub fn with_policy(mut self, policy: ConflictResolutionPolicy) -> Self {
        self.conflict_resolution_policy = policy;
        self
    }

    /// Sets the wire format.
    pub fn with_serialization_format(mut self, format: SerializationFormat) -> Self {
        self.serialization_format = format;
        self
    }

    /// Sets the batch size.
    pub fn with_batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Sets the batch staging directory.
    pub fn with_batch_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.batch_directory = Some(directory.into());
        self
    }

    /// Registers table names for replication.
    pub fn with_tables<I, S>(mut self, tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.setup_tables = tables.into_iter().map(Into::into).collect();
        self
    }

    /// Adds a filter declaration.
    pub fn with_filter(mut self, filter: SyncFilter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Filters declared for one table.
    pub fn filters_for<'a>(&'a self, table_name: &'a str) -> impl Iterator<Item = &'a SyncFilter> {
        self.filters.iter().filter(move |f| f.table_name == table_name)
    }
}

impl Default for SyncConfiguration {
    fn default() -> Self {
        Self::new(Self::DEFAULT_SCOPE_NAME)
    }
}
