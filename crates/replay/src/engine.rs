//! Postback state-replay engine
//!
//! Drives the upstream cascade one dropdown at a time. Each step builds
//! the exact form body a browser would submit for that dropdown's
//! `onchange` postback, sends it through the paced client, decodes the
//! delta, folds refreshed tokens back into the [`PageState`], and scrapes
//! the next dropdown's options out of the re-rendered panel.

use crate::client::UpstreamClient;
use crate::config::ProxyConfig;
use mvlookup_common::types::{ANTI_FORGERY, EVENT_VALIDATION, VIEWSTATE, VIEWSTATE_GENERATOR};
use mvlookup_common::{scrape, Delta, Dropdown, Error, PageState, Result, StepOutcome};
use tracing::{debug, info, warn};

/// ScriptManager unique id; its value names the panel and event source
/// of an async postback.
const SCRIPT_MANAGER: &str = "ctl00$ContentPlaceHolder1$ScriptManager1";

/// UpdatePanel wrapping the cascade dropdowns.
const UPDATE_PANEL: &str = "ctl00$ContentPlaceHolder1$upVehicle";

/// The replay engine
pub struct ReplayEngine {
    client: UpstreamClient,
}

impl ReplayEngine {
    pub fn new(cfg: &ProxyConfig) -> Result<Self> {
        let client = UpstreamClient::new(cfg.upstream.clone(), cfg.pacing.clone())?;
        Ok(Self { client })
    }

    /// Fetch the page cold: hidden state, cookies, and the make list.
    pub async fn init(&self) -> Result<StepOutcome> {
        let (html, cookies) = self.client.fetch_page().await?;

        let mut state = scrape::page_state(&html)?;
        for set_cookie in &cookies {
            state.store_cookie(set_cookie);
        }

        let options = scrape::dropdown_options(&html, Dropdown::Make)?;
        if options.is_empty() {
            return Err(Error::EmptyOptions {
                dropdown: Dropdown::Make.label().to_string(),
            });
        }

        info!(makes = options.len(), "initialized upstream page state");
        Ok(StepOutcome { options, state })
    }

    /// Populate the model list by replaying a make selection.
    pub async fn models(&self, state: PageState, make: &str) -> Result<StepOutcome> {
        self.step(state, Dropdown::Make, &[], make).await
    }

    /// Populate the year list. `make` must match what the state replayed.
    pub async fn years(&self, state: PageState, make: &str, model: &str) -> Result<StepOutcome> {
        self.step(state, Dropdown::Model, &[(Dropdown::Make, make)], model)
            .await
    }

    pub async fn countries(
        &self,
        state: PageState,
        make: &str,
        model: &str,
        year: &str,
    ) -> Result<StepOutcome> {
        self.step(
            state,
            Dropdown::Year,
            &[(Dropdown::Make, make), (Dropdown::Model, model)],
            year,
        )
        .await
    }

    pub async fn fuel_types(
        &self,
        state: PageState,
        make: &str,
        model: &str,
        year: &str,
        country: &str,
    ) -> Result<StepOutcome> {
        self.step(
            state,
            Dropdown::Country,
            &[
                (Dropdown::Make, make),
                (Dropdown::Model, model),
                (Dropdown::Year, year),
            ],
            country,
        )
        .await
    }

    pub async fn engines(
        &self,
        state: PageState,
        make: &str,
        model: &str,
        year: &str,
        country: &str,
        fuel: &str,
    ) -> Result<StepOutcome> {
        self.step(
            state,
            Dropdown::FuelType,
            &[
                (Dropdown::Make, make),
                (Dropdown::Model, model),
                (Dropdown::Year, year),
                (Dropdown::Country, country),
            ],
            fuel,
        )
        .await
    }

    /// One partial postback: select `value` in `target`, return the
    /// successor dropdown's options plus the refreshed state.
    async fn step(
        &self,
        mut state: PageState,
        target: Dropdown,
        chain: &[(Dropdown, &str)],
        value: &str,
    ) -> Result<StepOutcome> {
        if !state.is_complete() {
            return Err(Error::StateExpired);
        }
        verify_chain(&state, chain)?;
        state.select(target, value);
        state.require_chain(target)?;

        let successor = target
            .successor()
            .ok_or_else(|| Error::Internal("last cascade stage has no successor".to_string()))?;

        let form = build_form(&state, target);
        let body = self.client.post_delta(&state, form).await?;

        let delta = Delta::parse(&body)?;
        delta.ensure_ok()?;
        delta.apply_to(&mut state);

        let options = panel_options(&delta, successor)?;
        if options.is_empty() {
            warn!(
                target = target.label(),
                value, "upstream returned an empty option list"
            );
            return Err(Error::EmptyOptions {
                dropdown: successor.label().to_string(),
            });
        }

        debug!(
            target = target.label(),
            next = successor.label(),
            options = options.len(),
            "cascade step complete"
        );
        Ok(StepOutcome { options, state })
    }
}

/// Check that the ids a request supplied for already-replayed stages match
/// what the state actually replayed. A mismatch would fail upstream event
/// validation in a far less debuggable way.
fn verify_chain(state: &PageState, chain: &[(Dropdown, &str)]) -> Result<()> {
    for (dropdown, want) in chain {
        match state.selection(*dropdown) {
            None => return Err(Error::MissingSelection(dropdown.label().to_string())),
            Some(have) if have != *want => {
                return Err(Error::SelectionConflict {
                    dropdown: dropdown.label().to_string(),
                    expected: have.to_string(),
                    got: (*want).to_string(),
                });
            }
            Some(_) => {}
        }
    }
    Ok(())
}

/// Build the `application/x-www-form-urlencoded` body for one async
/// postback on `target`. Field order mirrors what the browser submits;
/// the upstream has been seen to care about the ScriptManager pair coming
/// first.
pub fn build_form(state: &PageState, target: Dropdown) -> String {
    let mut pairs: Vec<(String, String)> = Vec::new();

    pairs.push((
        SCRIPT_MANAGER.to_string(),
        format!("{}|{}", UPDATE_PANEL, target.field_name()),
    ));
    pairs.push(("__EVENTTARGET".to_string(), target.field_name().to_string()));
    pairs.push(("__EVENTARGUMENT".to_string(), String::new()));
    pairs.push(("__LASTFOCUS".to_string(), String::new()));
    pairs.push((VIEWSTATE.to_string(), state.view_state.clone()));
    pairs.push((
        VIEWSTATE_GENERATOR.to_string(),
        state.view_state_generator.clone(),
    ));
    pairs.push((EVENT_VALIDATION.to_string(), state.event_validation.clone()));
    if let Some(token) = &state.anti_forgery {
        pairs.push((ANTI_FORGERY.to_string(), token.clone()));
    }

    // Every dropdown that has a replayed value must be echoed, in page
    // order, or event validation rejects the postback.
    for dropdown in Dropdown::ALL {
        if let Some(value) = state.selection(dropdown) {
            pairs.push((dropdown.field_name().to_string(), value.to_string()));
        }
    }

    pairs.push(("__ASYNCPOST".to_string(), "true".to_string()));

    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Scan every updatePanel in the delta for the successor's select block.
/// Different page revisions nest the dropdowns in different panels.
fn panel_options(delta: &Delta, successor: Dropdown) -> Result<Vec<mvlookup_common::DropdownOption>> {
    let client_id = successor.client_id();
    let mut saw_panel = false;
    for segment in &delta.segments {
        if segment.kind != "updatePanel" {
            continue;
        }
        saw_panel = true;
        if scrape::select_block(&segment.content, &client_id).is_some() {
            return scrape::dropdown_options(&segment.content, successor);
        }
    }
    if saw_panel {
        Err(Error::Scrape(format!(
            "no panel in delta contained select '{client_id}'"
        )))
    } else {
        Err(Error::Delta("delta carried no updatePanel segment".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn replayed_state() -> PageState {
        let mut state = PageState {
            view_state: "VS+/=".to_string(),
            view_state_generator: "CA0B0334".to_string(),
            event_validation: "EV==".to_string(),
            anti_forgery: Some("AF".to_string()),
            ..Default::default()
        };
        state.select(Dropdown::Make, "12");
        state.select(Dropdown::Model, "340");
        state
    }

    #[test]
    fn form_body_field_order_and_encoding() {
        let state = replayed_state();
        let form = build_form(&state, Dropdown::Model);
        let fields: Vec<&str> = form.split('&').collect();

        // ScriptManager pair first, naming panel and event source.
        assert_eq!(
            fields[0],
            "ctl00%24ContentPlaceHolder1%24ScriptManager1=\
             ctl00%24ContentPlaceHolder1%24upVehicle%7Cctl00%24ContentPlaceHolder1%24ddlModel"
        );
        assert_eq!(
            fields[1],
            "__EVENTTARGET=ctl00%24ContentPlaceHolder1%24ddlModel"
        );
        // Viewstate special characters survive encoding.
        assert!(fields.contains(&"__VIEWSTATE=VS%2B%2F%3D"));
        assert!(fields.contains(&"__RequestVerificationToken=AF"));
        // Both replayed selections are echoed.
        assert!(fields.contains(&"ctl00%24ContentPlaceHolder1%24ddlMake=12"));
        assert!(fields.contains(&"ctl00%24ContentPlaceHolder1%24ddlModel=340"));
        // Async marker last.
        assert_eq!(*fields.last().unwrap(), "__ASYNCPOST=true");
    }

    #[test]
    fn verify_chain_catches_mismatched_parent() {
        let state = replayed_state();
        assert!(verify_chain(&state, &[(Dropdown::Make, "12")]).is_ok());

        let err = verify_chain(&state, &[(Dropdown::Make, "7")]).unwrap_err();
        assert!(matches!(err, Error::SelectionConflict { .. }));

        let err = verify_chain(&state, &[(Dropdown::Year, "2020")]).unwrap_err();
        assert!(matches!(err, Error::MissingSelection(s) if s == "year"));
    }

    #[test]
    fn panel_options_scans_all_panels() {
        let header = "<span>x</span>";
        let first = format!(
            "{}|updatePanel|ctl00_ContentPlaceHolder1_upHeader|{}|",
            header.len(),
            header
        );
        let select = "<select id=\"ctl00_ContentPlaceHolder1_ddlYear\">\
                      <option value=\"\">Select Year</option>\
                      <option value=\"2021\">2021</option></select>";
        let second = format!(
            "{}|updatePanel|ctl00_ContentPlaceHolder1_upVehicle|{}|",
            select.len(),
            select
        );
        let delta = Delta::parse(&format!("{first}{second}")).unwrap();

        let opts = panel_options(&delta, Dropdown::Year).unwrap();
        assert_eq!(opts.len(), 1);
        assert_eq!(opts[0].value, "2021");
    }

    #[test]
    fn panel_without_expected_select_is_a_scrape_error() {
        let delta = Delta::parse("12|updatePanel|up|<div>x</div>|").unwrap();
        let err = panel_options(&delta, Dropdown::Year).unwrap_err();
        assert!(matches!(err, Error::Scrape(_)));
    }
}
