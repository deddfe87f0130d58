//! Proxied remote peer.
//!
//! When the server side of a session lives behind a service, the
//! orchestrator talks to a [`ProxyProvider`]: a thin client that maps
//! each session operation onto one request against a phase endpoint.
//! The HTTP machinery itself is abstracted behind [`HttpClient`] so
//! any transport library (or an in-process loopback) can carry the
//! bytes.

use crate::error::{SyncError, SyncResult};
use crate::provider::SyncProvider;
use crate::session::{CancellationToken, ProgressArgs, ProgressEvent, ProgressSink};
use parking_lot::RwLock;
use scopesync_protocol::{
    decode_body, encode_body, endpoint, BatchInfo, DatabaseChangesApplied,
    DatabaseChangesSelected, MessageApplyChanges, MessageBeginSession, MessageEnsureDatabase,
    MessageEnsureSchema, MessageEnsureScopes, MessageGetChangesBatch, MessageTimestamp,
    MessageWriteScopes, RequestEnvelope, ResponseEnvelope, ScopeInfo, SerializationFormat,
    SyncConfiguration, SyncContext, SyncSchema,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

/// HTTP client abstraction.
///
/// Implement this to carry proxied requests with the HTTP library of
/// your choice, or route them in-process with [`LoopbackClient`].
pub trait HttpClient: Send + Sync {
    /// Sends a POST request and returns the response body.
    fn post(&self, url: &str, body: Vec<u8>) -> Result<Vec<u8>, String>;

    /// Checks whether the client is connected and healthy.
    fn is_healthy(&self) -> bool;
}

/// A remote peer reached through phased requests against a service.
///
/// The proxy cannot serve the client role, cannot be reconfigured
/// from this side, and treats database preparation as the service's
/// own concern.
pub struct ProxyProvider<C: HttpClient> {
    base_url: String,
    client: C,
    format: RwLock<SerializationFormat>,
    cancellation: RwLock<CancellationToken>,
    progress: RwLock<Option<Arc<dyn ProgressSink>>>,
}

impl<C: HttpClient> ProxyProvider<C> {
    /// Creates a proxy against a service base URL.
    pub fn new(base_url: impl Into<String>, client: C) -> Self {
        Self {
            base_url: base_url.into(),
            client,
            format: RwLock::new(SerializationFormat::default()),
            cancellation: RwLock::new(CancellationToken::new()),
            progress: RwLock::new(None),
        }
    }

    /// The service base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Milestones the service cannot deliver are reported from here.
    fn report(&self, context: &SyncContext, event: ProgressEvent) {
        if let Some(sink) = self.progress.read().clone() {
            sink.report(&ProgressArgs::new(context.session_id, event));
        }
    }

    fn call<M, P>(
        &self,
        path: &str,
        context: SyncContext,
        message: M,
    ) -> SyncResult<(SyncContext, P)>
    where
        M: Serialize,
        P: DeserializeOwned,
    {
        self.cancellation.read().ensure_active()?;
        if !self.client.is_healthy() {
            return Err(SyncError::provider("sync service is unreachable"));
        }

        let format = *self.format.read();
        let body = encode_body(format, &RequestEnvelope::new(context, message))
            .map_err(|e| SyncError::provider(format!("cannot encode request: {e}")))?;

        let url = format!("{}{}", self.base_url, path);
        debug!(%url, bytes = body.len(), "proxying sync request");
        let response = self.client.post(&url, body).map_err(SyncError::provider)?;

        let (_, envelope): (_, ResponseEnvelope<P>) = decode_body(&response)
            .map_err(|e| SyncError::provider(format!("cannot decode response: {e}")))?;
        Ok((envelope.context, envelope.payload))
    }
}

impl<C: HttpClient> SyncProvider for ProxyProvider<C> {
    fn begin_session(
        &self,
        context: SyncContext,
        message: MessageBeginSession,
    ) -> SyncResult<(SyncContext, SyncConfiguration)> {
        let (context, configuration): (_, SyncConfiguration) =
            self.call(endpoint::BEGIN_SESSION, context, message)?;
        // The service's answer settles the wire format for the rest
        // of the session.
        *self.format.write() = configuration.serialization_format;
        self.report(&context, ProgressEvent::SessionBegin);
        Ok((context, configuration))
    }

    fn end_session(&self, context: SyncContext) -> SyncResult<SyncContext> {
        let (context, ()) = self.call(endpoint::END_SESSION, context, ())?;
        self.report(&context, ProgressEvent::SessionEnd);
        Ok(context)
    }

    fn ensure_scopes(
        &self,
        context: SyncContext,
        message: MessageEnsureScopes,
    ) -> SyncResult<(SyncContext, Vec<ScopeInfo>)> {
        self.call(endpoint::ENSURE_SCOPES, context, message)
    }

    fn ensure_schema(
        &self,
        context: SyncContext,
        message: MessageEnsureSchema,
    ) -> SyncResult<(SyncContext, SyncSchema)> {
        self.call(endpoint::ENSURE_SCHEMA, context, message)
    }

    fn ensure_database(
        &self,
        context: SyncContext,
        _message: MessageEnsureDatabase,
    ) -> SyncResult<SyncContext> {
        // The service provisions its own database; nothing crosses
        // the wire for this phase.
        Ok(context)
    }

    fn get_local_timestamp(
        &self,
        context: SyncContext,
        message: MessageTimestamp,
    ) -> SyncResult<(SyncContext, i64)> {
        self.call(endpoint::GET_TIMESTAMP, context, message)
    }

    fn get_change_batch(
        &self,
        context: SyncContext,
        message: MessageGetChangesBatch,
    ) -> SyncResult<(SyncContext, BatchInfo, DatabaseChangesSelected)> {
        let (context, (batch, selected)): (_, (BatchInfo, DatabaseChangesSelected)) =
            self.call(endpoint::GET_CHANGES, context, message)?;
        Ok((context, batch, selected))
    }

    fn apply_changes(
        &self,
        context: SyncContext,
        message: MessageApplyChanges,
    ) -> SyncResult<(SyncContext, DatabaseChangesApplied)> {
        self.call(endpoint::APPLY_CHANGES, context, message)
    }

    fn write_scopes(
        &self,
        context: SyncContext,
        message: MessageWriteScopes,
    ) -> SyncResult<SyncContext> {
        let (context, ()) = self.call(endpoint::WRITE_SCOPES, context, message)?;
        Ok(context)
    }

    fn set_cancellation(&self, token: CancellationToken) {
        *self.cancellation.write() = token;
    }

    fn set_progress(&self, sink: Arc<dyn ProgressSink>) {
        *self.progress.write() = Some(sink);
    }

    fn set_configuration(&self, _mutate: &dyn Fn(&mut SyncConfiguration)) -> SyncResult<()> {
        Err(SyncError::Configuration(
            "a proxied peer cannot be reconfigured from the client".into(),
        ))
    }

    fn is_server_capable(&self) -> bool {
        false
    }
}

/// A service that can answer proxied posts in-process.
pub trait LoopbackService: Send + Sync {
    /// Handles a POST to a phase endpoint and returns the response body.
    fn handle_post(&self, path: &str, body: &[u8]) -> Result<Vec<u8>, String>;
}

/// Routes proxied requests directly to a [`LoopbackService`].
///
/// Useful for tests and single-process deployments where client and
/// service share an address space.
pub struct LoopbackClient<S: LoopbackService> {
    service: S,
}

impl<S: LoopbackService> LoopbackClient<S> {
    /// Creates a loopback client over a service.
    pub fn new(service: S) -> Self {
        Self { service }
    }
}

impl<S: LoopbackService> HttpClient for LoopbackClient<S> {
    fn post(&self, url: &str, body: Vec<u8>) -> Result<Vec<u8>, String> {
        let path = url.find("/sync/").map(|i| &url[i..]).unwrap_or(url);
        self.service.handle_post(path, &body)
    }

    fn is_healthy(&self) -> bool {
        true
    }
}
