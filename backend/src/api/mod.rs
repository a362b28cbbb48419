//! HTTP API module.
//!
//! This module provides the HTTP server and API types for a presentation
//! layer (upload form, mapping screen, report view).

pub mod server;
pub mod types;

pub use server::{router, start_server, AppState};
pub use types::*;
