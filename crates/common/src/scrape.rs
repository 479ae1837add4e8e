//! HTML scraping for hidden form state and dropdown option lists
//!
//! The upstream page is classic Web Forms markup. We only ever need three
//! things out of it: hidden `<input>` values, one `<select>` block, and
//! that block's `<option>` rows. Attribute order and quote style vary
//! between full pages and updatePanel fragments, so tags are matched as a
//! whole and their attributes read individually.

use crate::types::{ANTI_FORGERY, EVENT_VALIDATION, VIEWSTATE, VIEWSTATE_GENERATOR};
use crate::{Dropdown, DropdownOption, Error, PageState, Result};
use once_cell::sync::Lazy;
use regex::Regex;

static INPUT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<input\b[^>]*>").expect("input regex"));

static SELECT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<select\b[^>]*>.*?</select>").expect("select regex"));

static OPTION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<option\b([^>]*)>(.*?)</option>").expect("option regex"));

static ATTR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)([a-z][-a-z0-9_:]*)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s>]+))"#)
        .expect("attr regex")
});

static TAG_OPEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)^<[a-z]+\b[^>]*>").expect("tag regex"));

/// Value of an attribute inside a single tag, quote style independent.
fn attr(tag: &str, name: &str) -> Option<String> {
    for caps in ATTR_RE.captures_iter(tag) {
        if caps[1].eq_ignore_ascii_case(name) {
            let raw = caps
                .get(2)
                .or_else(|| caps.get(3))
                .or_else(|| caps.get(4))
                .map(|m| m.as_str())
                .unwrap_or_default();
            return Some(unescape(raw));
        }
    }
    None
}

/// True when a bare attribute (`disabled`, `selected`) is present.
fn has_flag(tag: &str, name: &str) -> bool {
    if attr(tag, name).is_some() {
        return true;
    }
    let lower = tag.to_ascii_lowercase();
    lower
        .split(|c: char| c.is_whitespace() || c == '>' || c == '/')
        .any(|word| word == name)
}

/// Hidden `<input>` value, matched by `name` or `id`.
pub fn hidden_field(html: &str, field: &str) -> Option<String> {
    for m in INPUT_RE.find_iter(html) {
        let tag = m.as_str();
        let named = attr(tag, "name").map(|n| n == field).unwrap_or(false)
            || attr(tag, "id").map(|i| i == field).unwrap_or(false);
        if named {
            return Some(attr(tag, "value").unwrap_or_default());
        }
    }
    None
}

/// Scrape the full hidden-state bundle from a page or fragment.
///
/// The three core Web Forms tokens are required; the MVC-style
/// anti-forgery token only exists on some revisions of the page.
pub fn page_state(html: &str) -> Result<PageState> {
    let mut state = PageState::default();
    for (field, slot) in [
        (VIEWSTATE, &mut state.view_state),
        (VIEWSTATE_GENERATOR, &mut state.view_state_generator),
        (EVENT_VALIDATION, &mut state.event_validation),
    ] {
        *slot = hidden_field(html, field)
            .ok_or_else(|| Error::MissingField(field.to_string()))?;
    }
    state.anti_forgery = hidden_field(html, ANTI_FORGERY).filter(|v| !v.is_empty());
    Ok(state)
}

/// The `<select>...</select>` block whose id matches `client_id`.
pub fn select_block<'a>(html: &'a str, client_id: &str) -> Option<&'a str> {
    for m in SELECT_RE.find_iter(html) {
        let block = m.as_str();
        let open = TAG_OPEN_RE.find(block).map(|t| t.as_str()).unwrap_or(block);
        let matches = attr(open, "id")
            .map(|i| i == client_id)
            .unwrap_or(false)
            || attr(open, "name")
                .map(|n| n.replace('$', "_") == client_id)
                .unwrap_or(false);
        if matches {
            return Some(block);
        }
    }
    None
}

/// Option rows of a select block, placeholders and disabled rows dropped.
pub fn options(select_html: &str) -> Vec<DropdownOption> {
    let mut out = Vec::new();
    for caps in OPTION_RE.captures_iter(select_html) {
        let attrs = &caps[1];
        if has_flag(attrs, "disabled") {
            continue;
        }
        let text = normalize_text(&unescape(&caps[2]));
        // Options without a value attribute submit their text.
        let value = attr(attrs, "value").unwrap_or_else(|| text.clone());
        let option = DropdownOption { value, text };
        if !option.is_placeholder() {
            out.push(option);
        }
    }
    out
}

/// Options of one cascade dropdown out of a page or updatePanel fragment.
pub fn dropdown_options(html: &str, dropdown: Dropdown) -> Result<Vec<DropdownOption>> {
    let block = select_block(html, &dropdown.client_id()).ok_or_else(|| {
        Error::Scrape(format!(
            "select '{}' not present in markup",
            dropdown.client_id()
        ))
    })?;
    Ok(options(block))
}

/// Decode the HTML entities the upstream actually emits, plus numeric
/// character references.
pub fn unescape(s: &str) -> String {
    if !s.contains('&') {
        return s.to_string();
    }
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(pos) = rest.find('&') {
        out.push_str(&rest[..pos]);
        rest = &rest[pos..];
        // Entities are short; a distant semicolon is not one of ours.
        let Some(semi) = rest.find(';').filter(|&i| i <= 12) else {
            out.push('&');
            rest = &rest[1..];
            continue;
        };
        let entity = &rest[1..semi];
        let decoded = match entity {
            "amp" => Some('&'),
            "lt" => Some('<'),
            "gt" => Some('>'),
            "quot" => Some('"'),
            "apos" | "#39" => Some('\''),
            "nbsp" => Some(' '),
            _ => decode_numeric(entity),
        };
        match decoded {
            Some(c) => {
                out.push(c);
                rest = &rest[semi + 1..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn decode_numeric(entity: &str) -> Option<char> {
    let code = if let Some(hex) = entity.strip_prefix("#x").or_else(|| entity.strip_prefix("#X")) {
        u32::from_str_radix(hex, 16).ok()?
    } else if let Some(dec) = entity.strip_prefix('#') {
        dec.parse::<u32>().ok()?
    } else {
        return None;
    };
    char::from_u32(code)
}

/// Collapse runs of whitespace; option text arrives pretty-printed.
fn normalize_text(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
        <html><body><form method="post" action="./Default.aspx" id="form1">
        <input type="hidden" name="__VIEWSTATE" id="__VIEWSTATE" value="dDwtMTA5;base64==" />
        <input type="hidden" name="__VIEWSTATEGENERATOR" id="__VIEWSTATEGENERATOR" value="CA0B0334" />
        <input value="AAAQQQ" type="hidden" name="__EVENTVALIDATION" id="__EVENTVALIDATION" />
        <input name="__RequestVerificationToken" type="hidden" value="afg-token" />
        <select name="ctl00$ContentPlaceHolder1$ddlMake" id="ctl00_ContentPlaceHolder1_ddlMake">
            <option selected="selected" value="">Select Make</option>
            <option value="12">TOYOTA</option>
            <option value='17'>MERCEDES-BENZ</option>
            <option value="23">ROLLS &amp; ROYCE</option>
            <option disabled value="99">RETIRED MAKE</option>
        </select>
        </form></body></html>"#;

    #[test]
    fn scrapes_hidden_state() {
        let state = page_state(PAGE).unwrap();
        assert_eq!(state.view_state, "dDwtMTA5;base64==");
        assert_eq!(state.view_state_generator, "CA0B0334");
        assert_eq!(state.event_validation, "AAAQQQ");
        assert_eq!(state.anti_forgery.as_deref(), Some("afg-token"));
        assert!(state.is_complete());
    }

    #[test]
    fn missing_token_is_an_error() {
        let err = page_state("<html><body></body></html>").unwrap_err();
        assert!(matches!(err, Error::MissingField(f) if f == "__VIEWSTATE"));
    }

    #[test]
    fn value_attribute_order_does_not_matter() {
        // __EVENTVALIDATION in the fixture has value before name.
        assert_eq!(hidden_field(PAGE, "__EVENTVALIDATION").unwrap(), "AAAQQQ");
    }

    #[test]
    fn scrapes_options_and_drops_placeholder_rows() {
        let opts = dropdown_options(PAGE, Dropdown::Make).unwrap();
        let values: Vec<&str> = opts.iter().map(|o| o.value.as_str()).collect();
        assert_eq!(values, ["12", "17", "23"]);
        // Entity decoded, disabled row dropped, placeholder dropped.
        assert_eq!(opts[2].text, "ROLLS & ROYCE");
    }

    #[test]
    fn select_lookup_by_missing_id_fails() {
        let err = dropdown_options(PAGE, Dropdown::Model).unwrap_err();
        assert!(matches!(err, Error::Scrape(_)));
    }

    #[test]
    fn options_in_update_panel_fragment() {
        let fragment = r#"
            <span id="lbl"></span>
            <select name="ctl00$ContentPlaceHolder1$ddlModel" id="ctl00_ContentPlaceHolder1_ddlModel">
              <option value="">Select Model</option>
              <option value="340">LAND CRUISER
                    PRADO</option>
            </select>"#;
        let opts = dropdown_options(fragment, Dropdown::Model).unwrap();
        assert_eq!(opts.len(), 1);
        assert_eq!(opts[0].value, "340");
        // Pretty-printed whitespace collapsed.
        assert_eq!(opts[0].text, "LAND CRUISER PRADO");
    }

    #[test]
    fn unescape_handles_numeric_references() {
        assert_eq!(unescape("A &amp; B"), "A & B");
        assert_eq!(unescape("caf&#233;"), "café");
        assert_eq!(unescape("slash&#x2F;sep"), "slash/sep");
        // Unknown entities pass through untouched.
        assert_eq!(unescape("&bogus; &"), "&bogus; &");
    }

    #[test]
    fn option_without_value_submits_its_text() {
        let opts = options("<select><option>2019</option></select>");
        assert_eq!(opts[0].value, "2019");
        assert_eq!(opts[0].text, "2019");
    }
}
