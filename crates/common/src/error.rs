//! Error types for mvlookup

use thiserror::Error;

/// Result type alias using mvlookup Error
pub type Result<T> = std::result::Result<T, Error>;

/// mvlookup error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("Upstream request failed: {0}")]
    Upstream(String),

    #[error("Upstream returned HTTP {status}")]
    UpstreamStatus { status: u16 },

    #[error("Malformed partial-postback delta: {0}")]
    Delta(String),

    #[error("Scrape failed: {0}")]
    Scrape(String),

    #[error("Hidden field missing from page: {0}")]
    MissingField(String),

    #[error("Missing prerequisite selection: {0}")]
    MissingSelection(String),

    #[error("Selection conflict for {dropdown}: state has {expected}, request sent {got}")]
    SelectionConflict {
        dropdown: String,
        expected: String,
        got: String,
    },

    #[error("Page state expired, re-initialize")]
    StateExpired,

    #[error("Upstream redirected postback to {0}")]
    PageRedirect(String),

    #[error("Upstream reported error: {0}")]
    UpstreamError(String),

    #[error("No options returned for {dropdown}")]
    EmptyOptions { dropdown: String },

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Operation timeout after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True when the failure means the replayed page state is no longer
    /// usable and the caller must start over from `init`.
    pub fn requires_reinit(&self) -> bool {
        matches!(self, Error::StateExpired | Error::PageRedirect(_))
    }
}
