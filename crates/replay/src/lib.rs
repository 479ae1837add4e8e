//! mvlookup Replay Engine
//!
//! Replays ASP.NET Web Forms partial postbacks against the upstream
//! vehicle-lookup page: fetch-and-scrape initialization, one paced
//! postback per dropdown selection, and a TTL'd session cache for the
//! scraped page state.

pub mod client;
pub mod config;
pub mod engine;
pub mod session;

pub use client::UpstreamClient;
pub use config::{PacingConfig, ProxyConfig, SessionConfig, UpstreamConfig};
pub use engine::ReplayEngine;
pub use session::SessionStore;
