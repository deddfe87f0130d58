//! Error types for the sync service.

use scopesync_engine::SyncError;
use scopesync_protocol::WireError;
use thiserror::Error;

/// Result type for service operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors raised while serving proxied session requests.
#[derive(Error, Debug)]
pub enum ServerError {
    /// The request targeted an endpoint this service does not expose.
    #[error("unknown endpoint: {0}")]
    UnknownEndpoint(String),

    /// The request body could not be decoded, or the response could
    /// not be encoded.
    #[error("codec error: {0}")]
    Codec(#[from] WireError),

    /// The wrapped provider rejected the operation.
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),
}

impl ServerError {
    /// Returns true if the fault lies with the caller.
    pub fn is_client_error(&self) -> bool {
        match self {
            ServerError::UnknownEndpoint(_) => true,
            ServerError::Codec(_) => true,
            ServerError::Sync(error) => matches!(error, SyncError::Configuration(_)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(ServerError::UnknownEndpoint("/x".into()).is_client_error());
        assert!(!ServerError::Sync(SyncError::provider("db down")).is_client_error());
        assert!(ServerError::Sync(SyncError::Configuration("bad".into())).is_client_error());
    }

    #[test]
    fn display() {
        let error = ServerError::UnknownEndpoint("/sync/nope".into());
        assert!(error.to_string().contains("/sync/nope"));
    }
}
