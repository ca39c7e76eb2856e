//! Photobooth notifier: live sessions, notification delivery and unread sync.
//!
//! The binary in `main.rs` wires configuration, logging and the server; this
//! crate holds everything else so integration tests in `tests/` can drive it.

use std::sync::Arc;

pub mod api;
pub mod auth;
pub mod cli;
pub mod config;
pub mod errors;
pub mod metrics;
pub mod models;
pub mod notification;
pub mod realtime;
pub mod store;

/// Shared application state passed to handlers, middleware and sockets.
pub struct AppState {
    pub notifier: notification::Notifier,
    pub verifier: Arc<dyn auth::IdentityVerifier>,
    pub config: config::Config,
}
