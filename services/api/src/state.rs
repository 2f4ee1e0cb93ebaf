//! Shared Application State
//!
//! This module defines the `AppState` struct, which holds all shared,
//! clonable resources handlers need: the agent orchestrator and the loaded
//! configuration.

use crate::config::Config;
use sage_core::Orchestrator;
use std::sync::Arc;

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub config: Arc<Config>,
}
