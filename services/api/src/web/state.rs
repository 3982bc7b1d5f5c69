//! services/api/src/web/state.rs
//!
//! Defines the application's shared state.

use crate::config::Config;
use scribeloop_core::ports::DatabaseService;
use std::sync::Arc;

//=========================================================================================
// AppState (Shared Across All Requests)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<dyn DatabaseService>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(db: Arc<dyn DatabaseService>, config: Arc<Config>) -> Self {
        Self { db, config }
    }

    /// Whether `token` matches the configured admin secret. Always false when
    /// no secret is configured.
    pub fn is_admin_token(&self, token: Option<&str>) -> bool {
        match (self.config.admin_secret.as_deref(), token) {
            (Some(secret), Some(token)) => secret == token,
            _ => false,
        }
    }
}
