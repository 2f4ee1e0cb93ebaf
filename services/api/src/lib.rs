//! Sage API Library Crate
//!
//! This library contains all the logic for the Sage web service: the
//! application state, API handlers, WebSocket bridge, and routing. The
//! binary is a thin wrapper around this library.

pub mod config;
pub mod handlers;
pub mod models;
pub mod router;
pub mod state;
pub mod ws;
