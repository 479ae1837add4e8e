//! Core types shared across mvlookup crates

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Hidden field names the upstream page round-trips on every postback.
pub const VIEWSTATE: &str = "__VIEWSTATE";
pub const VIEWSTATE_GENERATOR: &str = "__VIEWSTATEGENERATOR";
pub const EVENT_VALIDATION: &str = "__EVENTVALIDATION";
pub const ANTI_FORGERY: &str = "__RequestVerificationToken";

/// The six dropdowns of the upstream cascade, in postback order.
///
/// Each selection enables the next dropdown; the upstream page rejects a
/// postback for a stage whose predecessors have not been replayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dropdown {
    Make,
    Model,
    Year,
    Country,
    FuelType,
    EngineCapacity,
}

impl Dropdown {
    /// All stages in cascade order.
    pub const ALL: [Dropdown; 6] = [
        Dropdown::Make,
        Dropdown::Model,
        Dropdown::Year,
        Dropdown::Country,
        Dropdown::FuelType,
        Dropdown::EngineCapacity,
    ];

    /// Form field name (`$`-separated unique id) used in postback bodies.
    pub fn field_name(&self) -> &'static str {
        match self {
            Dropdown::Make => "ctl00$ContentPlaceHolder1$ddlMake",
            Dropdown::Model => "ctl00$ContentPlaceHolder1$ddlModel",
            Dropdown::Year => "ctl00$ContentPlaceHolder1$ddlYear",
            Dropdown::Country => "ctl00$ContentPlaceHolder1$ddlCountry",
            Dropdown::FuelType => "ctl00$ContentPlaceHolder1$ddlFuelType",
            Dropdown::EngineCapacity => "ctl00$ContentPlaceHolder1$ddlEngineCapacity",
        }
    }

    /// Client id (`_`-separated) of the `<select>` element in rendered HTML.
    pub fn client_id(&self) -> String {
        self.field_name().replace('$', "_")
    }

    /// The stage whose selection must already be replayed before this
    /// dropdown can be posted back. `Make` has no predecessor.
    pub fn predecessor(&self) -> Option<Dropdown> {
        match self {
            Dropdown::Make => None,
            Dropdown::Model => Some(Dropdown::Make),
            Dropdown::Year => Some(Dropdown::Model),
            Dropdown::Country => Some(Dropdown::Year),
            Dropdown::FuelType => Some(Dropdown::Country),
            Dropdown::EngineCapacity => Some(Dropdown::FuelType),
        }
    }

    /// The dropdown populated by selecting a value in this one.
    pub fn successor(&self) -> Option<Dropdown> {
        match self {
            Dropdown::Make => Some(Dropdown::Model),
            Dropdown::Model => Some(Dropdown::Year),
            Dropdown::Year => Some(Dropdown::Country),
            Dropdown::Country => Some(Dropdown::FuelType),
            Dropdown::FuelType => Some(Dropdown::EngineCapacity),
            Dropdown::EngineCapacity => None,
        }
    }

    /// Short name used in logs and error messages.
    pub fn label(&self) -> &'static str {
        match self {
            Dropdown::Make => "make",
            Dropdown::Model => "model",
            Dropdown::Year => "year",
            Dropdown::Country => "country",
            Dropdown::FuelType => "fuel_type",
            Dropdown::EngineCapacity => "engine_capacity",
        }
    }
}

/// One entry of a dropdown's option list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropdownOption {
    pub value: String,
    pub text: String,
}

impl DropdownOption {
    /// Placeholder rows ("Select Make", "-- select --", empty value) are
    /// rendered by the page but are not selectable data.
    pub fn is_placeholder(&self) -> bool {
        if self.value.trim().is_empty() || self.value == "0" || self.value == "-1" {
            return true;
        }
        let t = self.text.trim();
        t.is_empty()
            || t.starts_with("--")
            || t.to_ascii_lowercase().starts_with("select")
    }
}

/// Scraped hidden form state plus the selections already replayed into it.
///
/// This is the token bundle a stateless client echoes back between calls.
/// The viewstate blob is opaque to us; we only carry it byte-for-byte.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageState {
    pub view_state: String,
    pub view_state_generator: String,
    pub event_validation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anti_forgery: Option<String>,
    /// Cookies set by the upstream (ASP.NET session id, anti-forgery pair).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub cookies: BTreeMap<String, String>,
    /// Values already selected, keyed by stage. Every postback must echo
    /// all of them or event validation fails upstream.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub selections: BTreeMap<Dropdown, String>,
}

impl PageState {
    /// The replayed selection for a stage, if any.
    pub fn selection(&self, dropdown: Dropdown) -> Option<&str> {
        self.selections.get(&dropdown).map(|s| s.as_str())
    }

    /// Record a selection, clearing every later stage: the upstream page
    /// resets downstream dropdowns when an earlier one changes.
    pub fn select(&mut self, dropdown: Dropdown, value: impl Into<String>) {
        self.selections.insert(dropdown, value.into());
        let mut next = dropdown.successor();
        while let Some(d) = next {
            self.selections.remove(&d);
            next = d.successor();
        }
    }

    /// Verify that every predecessor of `dropdown` has a replayed selection.
    pub fn require_chain(&self, dropdown: Dropdown) -> Result<()> {
        let mut stage = dropdown.predecessor();
        while let Some(d) = stage {
            if self.selection(d).is_none() {
                return Err(Error::MissingSelection(d.label().to_string()));
            }
            stage = d.predecessor();
        }
        Ok(())
    }

    /// `Cookie` header value echoing everything the upstream set.
    pub fn cookie_header(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        Some(
            self.cookies
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    /// Store a cookie from a `Set-Cookie` header value, ignoring attributes.
    pub fn store_cookie(&mut self, set_cookie: &str) {
        let pair = set_cookie.split(';').next().unwrap_or_default();
        if let Some((name, value)) = pair.split_once('=') {
            let name = name.trim();
            if !name.is_empty() {
                self.cookies.insert(name.to_string(), value.trim().to_string());
            }
        }
    }

    /// True once all three core tokens are present.
    pub fn is_complete(&self) -> bool {
        !self.view_state.is_empty()
            && !self.view_state_generator.is_empty()
            && !self.event_validation.is_empty()
    }
}

/// Result of one cascade step: the options of the next dropdown plus the
/// refreshed state to use for the following step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepOutcome {
    pub options: Vec<DropdownOption>,
    pub state: PageState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_clears_downstream_stages() {
        let mut state = PageState::default();
        state.select(Dropdown::Make, "12");
        state.select(Dropdown::Model, "340");
        state.select(Dropdown::Year, "2019");
        assert_eq!(state.selection(Dropdown::Year), Some("2019"));

        // Re-selecting the make invalidates model and year.
        state.select(Dropdown::Make, "7");
        assert_eq!(state.selection(Dropdown::Make), Some("7"));
        assert_eq!(state.selection(Dropdown::Model), None);
        assert_eq!(state.selection(Dropdown::Year), None);
    }

    #[test]
    fn require_chain_reports_first_missing_stage() {
        let mut state = PageState::default();
        state.select(Dropdown::Make, "12");
        assert!(state.require_chain(Dropdown::Model).is_ok());

        let err = state.require_chain(Dropdown::Year).unwrap_err();
        match err {
            Error::MissingSelection(s) => assert_eq!(s, "model"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn cookie_header_round_trip() {
        let mut state = PageState::default();
        assert_eq!(state.cookie_header(), None);

        state.store_cookie("ASP.NET_SessionId=abc123; path=/; HttpOnly");
        state.store_cookie("__RequestVerificationToken=tok; path=/");
        assert_eq!(
            state.cookie_header().unwrap(),
            "ASP.NET_SessionId=abc123; __RequestVerificationToken=tok"
        );
    }

    #[test]
    fn placeholder_options_are_detected() {
        let placeholder = DropdownOption {
            value: "0".to_string(),
            text: "Select Make".to_string(),
        };
        let dashes = DropdownOption {
            value: "".to_string(),
            text: "-- choose --".to_string(),
        };
        let real = DropdownOption {
            value: "42".to_string(),
            text: "TOYOTA".to_string(),
        };
        assert!(placeholder.is_placeholder());
        assert!(dashes.is_placeholder());
        assert!(!real.is_placeholder());
    }

    #[test]
    fn client_id_matches_field_name() {
        assert_eq!(
            Dropdown::FuelType.client_id(),
            "ctl00_ContentPlaceHolder1_ddlFuelType"
        );
        assert_eq!(
            Dropdown::FuelType.field_name(),
            "ctl00$ContentPlaceHolder1$ddlFuelType"
        );
    }
}
