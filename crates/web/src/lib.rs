//! mvlookup Web API
//!
//! Axum JSON surface over the replay engine.

pub mod server;

pub use server::{router, serve, AppState};
