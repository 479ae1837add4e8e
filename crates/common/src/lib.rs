//! mvlookup Common Library
//!
//! Shared types and the ASP.NET wire-format plumbing: the partial-postback
//! delta codec and the hidden-field/option scraper.

pub mod delta;
pub mod error;
pub mod scrape;
pub mod types;

// Re-export commonly used types
pub use delta::{Delta, Segment};
pub use error::{Error, Result};
pub use types::{Dropdown, DropdownOption, PageState, StepOutcome};

/// mvlookup version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
