//! # ScopeSync Server
//!
//! Server-side counterpart of the ScopeSync proxy transport.
//!
//! This crate provides:
//! - `SyncRequestHandler`, mapping phase endpoints onto a provider
//! - Per-session batch staging isolation
//! - Client/server error classification
//!
//! The handler is transport-agnostic: bind `handle_post` to the HTTP
//! stack of your choice, or reach it in-process through the engine's
//! loopback client.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod handler;

pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use handler::SyncRequestHandler;
