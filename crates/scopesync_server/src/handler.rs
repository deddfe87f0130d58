//! Phased request handling.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use scopesync_engine::{LoopbackService, SyncProvider};
use scopesync_protocol::{
    decode_body, encode_body, endpoint, MessageApplyChanges, MessageBeginSession,
    MessageEnsureSchema, MessageEnsureScopes, MessageGetChangesBatch, MessageTimestamp,
    MessageWriteScopes, RequestEnvelope, ResponseEnvelope,
};
use std::sync::Arc;
use tracing::debug;

/// Serves proxied sync sessions over a wrapped provider.
///
/// Each phase endpoint maps onto one provider operation: the handler
/// decodes the request envelope, drives the provider, and encodes
/// the response in the format the request arrived in. Database
/// preparation never crosses the wire; the embedder provisions the
/// provider before exposing the handler.
pub struct SyncRequestHandler {
    provider: Arc<dyn SyncProvider>,
    config: ServerConfig,
}

impl SyncRequestHandler {
    /// Creates a handler over a server-capable provider.
    pub fn new(provider: Arc<dyn SyncProvider>, config: ServerConfig) -> Self {
        Self { provider, config }
    }

    /// Handles a POST against a phase endpoint.
    pub fn handle_post(&self, path: &str, body: &[u8]) -> ServerResult<Vec<u8>> {
        debug!(%path, bytes = body.len(), "handling sync request");
        match path {
            endpoint::BEGIN_SESSION => self.begin_session(body),
            endpoint::ENSURE_SCOPES => self.ensure_scopes(body),
            endpoint::ENSURE_SCHEMA => self.ensure_schema(body),
            endpoint::GET_TIMESTAMP => self.get_timestamp(body),
            endpoint::GET_CHANGES => self.get_changes(body),
            endpoint::APPLY_CHANGES => self.apply_changes(body),
            endpoint::WRITE_SCOPES => self.write_scopes(body),
            endpoint::END_SESSION => self.end_session(body),
            other => Err(ServerError::UnknownEndpoint(other.to_string())),
        }
    }

    fn begin_session(&self, body: &[u8]) -> ServerResult<Vec<u8>> {
        let (format, mut envelope): (_, RequestEnvelope<MessageBeginSession>) =
            decode_body(body)?;

        // Isolate this session's batch staging from concurrent ones.
        if let Some(root) = &self.config.staging_directory {
            envelope.message.configuration.batch_directory =
                Some(root.join(envelope.context.session_id.to_string()));
        }

        let (context, configuration) = self
            .provider
            .begin_session(envelope.context, envelope.message)?;
        Ok(encode_body(
            format,
            &ResponseEnvelope::new(context, configuration),
        )?)
    }

    fn ensure_scopes(&self, body: &[u8]) -> ServerResult<Vec<u8>> {
        let (format, envelope): (_, RequestEnvelope<MessageEnsureScopes>) = decode_body(body)?;
        let (context, scopes) = self
            .provider
            .ensure_scopes(envelope.context, envelope.message)?;
        Ok(encode_body(format, &ResponseEnvelope::new(context, scopes))?)
    }

    fn ensure_schema(&self, body: &[u8]) -> ServerResult<Vec<u8>> {
        let (format, envelope): (_, RequestEnvelope<MessageEnsureSchema>) = decode_body(body)?;
        let (context, schema) = self
            .provider
            .ensure_schema(envelope.context, envelope.message)?;
        Ok(encode_body(format, &ResponseEnvelope::new(context, schema))?)
    }

    fn get_timestamp(&self, body: &[u8]) -> ServerResult<Vec<u8>> {
        let (format, envelope): (_, RequestEnvelope<MessageTimestamp>) = decode_body(body)?;
        let (context, timestamp) = self
            .provider
            .get_local_timestamp(envelope.context, envelope.message)?;
        Ok(encode_body(
            format,
            &ResponseEnvelope::new(context, timestamp),
        )?)
    }

    fn get_changes(&self, body: &[u8]) -> ServerResult<Vec<u8>> {
        let (format, envelope): (_, RequestEnvelope<MessageGetChangesBatch>) = decode_body(body)?;
        let (context, batch, selected) = self
            .provider
            .get_change_batch(envelope.context, envelope.message)?;
        Ok(encode_body(
            format,
            &ResponseEnvelope::new(context, (batch, selected)),
        )?)
    }

    fn apply_changes(&self, body: &[u8]) -> ServerResult<Vec<u8>> {
        let (format, envelope): (_, RequestEnvelope<MessageApplyChanges>) = decode_body(body)?;
        let (context, applied) = self
            .provider
            .apply_changes(envelope.context, envelope.message)?;
        Ok(encode_body(format, &ResponseEnvelope::new(context, applied))?)
    }

    fn write_scopes(&self, body: &[u8]) -> ServerResult<Vec<u8>> {
        let (format, envelope): (_, RequestEnvelope<MessageWriteScopes>) = decode_body(body)?;
        let context = self
            .provider
            .write_scopes(envelope.context, envelope.message)?;
        Ok(encode_body(format, &ResponseEnvelope::new(context, ()))?)
    }

    fn end_session(&self, body: &[u8]) -> ServerResult<Vec<u8>> {
        let (format, envelope): (_, RequestEnvelope<()>) = decode_body(body)?;
        let context = self.provider.end_session(envelope.context)?;
        Ok(encode_body(format, &ResponseEnvelope::new(context, ()))?)
    }
}

impl LoopbackService for SyncRequestHandler {
    fn handle_post(&self, path: &str, body: &[u8]) -> Result<Vec<u8>, String> {
        SyncRequestHandler::handle_post(self, path, body).map_err(|e| e.to_string())
    }
}
