//! Service configuration.

use std::path::PathBuf;

/// Configuration for a sync service.
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
    /// Root directory for batch staging.
    ///
    /// When set, every session stages its batches under an isolated
    /// `<root>/<session_id>` directory, so concurrent sessions never
    /// share staging files.
    pub staging_directory: Option<PathBuf>,
}

impl ServerConfig {
    /// Creates a configuration with no staging root.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the batch staging root.
    pub fn with_staging_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.staging_directory = Some(directory.into());
        self
    }
}
