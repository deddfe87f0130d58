//! Error taxonomy for sync sessions.

use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Session phase an error originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStage {
    /// No phase attributed.
    None,
    /// Session handshake.
    BeginSession,
    /// Scope discovery.
    EnsureScopes,
    /// Schema negotiation.
    EnsureSchema,
    /// Database preparation.
    EnsureDatabase,
    /// Change selection and timestamp capture.
    SelectingChanges,
    /// Change application.
    ApplyingChanges,
    /// Scope persistence.
    WritingScopes,
}

/// Errors raised while running a sync session.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The session was cancelled through its token.
    #[error("sync session cancelled")]
    Cancelled,

    /// A peer answered with something the session contract forbids.
    #[error("protocol violation during {stage:?}: {message}")]
    Protocol {
        /// Phase the violation was detected in.
        stage: SyncStage,
        /// What was violated.
        message: String,
    },

    /// A peer operation failed.
    #[error("provider failure during {stage:?}: {message}")]
    Provider {
        /// Phase the operation belonged to.
        stage: SyncStage,
        /// Underlying failure.
        message: String,
    },

    /// Construction-time misuse.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Anything that fits no other classification.
    #[error("sync error: {0}")]
    Unknown(String),
}

impl SyncError {
    /// Creates a provider failure with no phase attributed yet.
    pub fn provider(message: impl Into<String>) -> Self {
        SyncError::Provider {
            stage: SyncStage::None,
            message: message.into(),
        }
    }

    /// Creates a protocol violation with no phase attributed yet.
    pub fn protocol(message: impl Into<String>) -> Self {
        SyncError::Protocol {
            stage: SyncStage::None,
            message: message.into(),
        }
    }

    /// Attributes a phase to the error, unless one is already set.
    pub fn with_stage(self, stage: SyncStage) -> Self {
        match self {
            SyncError::Provider {
                stage: SyncStage::None,
                message,
            } => SyncError::Provider { stage, message },
            SyncError::Protocol {
                stage: SyncStage::None,
                message,
            } => SyncError::Protocol { stage, message },
            other => other,
        }
    }

    /// Returns the phase attributed to the error.
    pub fn stage(&self) -> SyncStage {
        match self {
            SyncError::Provider { stage, .. } | SyncError::Protocol { stage, .. } => *stage,
            _ => SyncStage::None,
        }
    }

    /// Returns true if the error is a cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SyncError::Cancelled)
    }
}
