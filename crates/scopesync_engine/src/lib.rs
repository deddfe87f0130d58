//! # ScopeSync Engine
//!
//! Sync orchestrator and provider contract for ScopeSync.
//!
//! This crate provides:
//! - `SyncAgent`, the session state machine driving two peers
//! - The `SyncProvider` capability trait
//! - Session lifecycle: state observer, cancellation, progress
//! - `MemoryProvider`, the in-memory reference peer
//! - `ProxyProvider`, a thin client over an HTTP-shaped transport

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod memory;
mod orchestrator;
mod provider;
mod proxy;
mod session;

pub use error::{SyncError, SyncResult, SyncStage};
pub use memory::MemoryProvider;
pub use orchestrator::SyncAgent;
pub use provider::SyncProvider;
pub use proxy::{HttpClient, LoopbackClient, LoopbackService, ProxyProvider};
pub use session::{
    CancellationToken, ProgressArgs, ProgressEvent, ProgressSink, SessionState,
    SessionStateObserver,
};

pub use scopesync_protocol as protocol;
