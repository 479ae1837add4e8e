//! Partial-rendering ("delta") response codec
//!
//! A MicrosoftAjax partial postback does not return HTML. It returns a
//! stream of length-prefixed segments:
//!
//! ```text
//! len|type|id|content|len|type|id|content|...
//! ```
//!
//! `len` is the length of `content` counted in UTF-16 code units (the
//! upstream framework emits .NET string lengths). Content routinely
//! contains `|` characters, so the only correct way to read a segment is
//! to consume exactly `len` units — splitting the body on pipes corrupts
//! any panel whose markup contains one.
//!
//! Segments we act on: `updatePanel` (the re-rendered dropdown HTML),
//! `hiddenField` (refreshed `__VIEWSTATE` / `__EVENTVALIDATION` tokens),
//! `pageRedirect` and `error` (upstream gave up on our replayed state).
//! Everything else (`scriptBlock`, `expando`, async control lists) is
//! carried opaquely.

use crate::types::{EVENT_VALIDATION, VIEWSTATE, VIEWSTATE_GENERATOR};
use crate::{Error, PageState, Result};
use tracing::trace;

/// One `len|type|id|content|` unit of a delta response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub kind: String,
    pub id: String,
    pub content: String,
}

/// A parsed partial-postback response.
#[derive(Debug, Clone, Default)]
pub struct Delta {
    pub segments: Vec<Segment>,
}

impl Delta {
    /// Parse a partial-postback body.
    ///
    /// A body that is a full HTML page (the upstream fell back to a
    /// complete re-render, which it does once the replayed state has
    /// expired) yields [`Error::StateExpired`] rather than a framing
    /// error, so callers can distinguish "start over" from "broken".
    pub fn parse(body: &str) -> Result<Delta> {
        if body.is_empty() {
            return Err(Error::Delta("empty response body".to_string()));
        }
        if looks_like_full_page(body) {
            return Err(Error::StateExpired);
        }

        // Some middleboxes append a trailing newline after the last segment.
        let body = body.trim_end_matches(['\r', '\n']);

        let mut segments = Vec::new();
        let mut cursor = 0usize;
        let bytes = body.as_bytes();

        while cursor < bytes.len() {
            let len = read_length(body, &mut cursor)?;
            let kind = read_token(body, &mut cursor, "segment type")?;
            let id = read_token(body, &mut cursor, "segment id")?;
            let content = read_content(body, &mut cursor, len)?;
            trace!(kind = %kind, id = %id, units = len, "delta segment");
            segments.push(Segment {
                kind: kind.to_string(),
                id: id.to_string(),
                content: content.to_string(),
            });
        }

        if segments.is_empty() {
            return Err(Error::Delta("no segments in response".to_string()));
        }

        Ok(Delta { segments })
    }

    /// Content of the first segment matching a kind filter.
    fn find(&self, kind: &str, id: impl Fn(&str) -> bool) -> Option<&str> {
        self.segments
            .iter()
            .find(|s| s.kind == kind && id(&s.id))
            .map(|s| s.content.as_str())
    }

    /// Refreshed hidden field value, by exact field name.
    pub fn hidden_field(&self, name: &str) -> Option<&str> {
        self.find("hiddenField", |id| id == name)
    }

    /// Re-rendered panel HTML whose id ends with `id_suffix`.
    ///
    /// Panel ids are fully qualified (`ctl00_ContentPlaceHolder1_upModel`);
    /// matching on the suffix keeps us independent of container renames.
    pub fn update_panel(&self, id_suffix: &str) -> Option<&str> {
        self.find("updatePanel", |id| id.ends_with(id_suffix))
    }

    /// HTML of the first update panel, whatever its id.
    pub fn first_update_panel(&self) -> Option<&str> {
        self.find("updatePanel", |_| true)
    }

    /// Fail if the upstream answered with a redirect or an error segment
    /// instead of panel content.
    pub fn ensure_ok(&self) -> Result<()> {
        if let Some(target) = self.find("pageRedirect", |_| true) {
            // Redirect targets arrive percent-encoded.
            let target = urlencoding::decode(target)
                .map(|c| c.into_owned())
                .unwrap_or_else(|_| target.to_string());
            return Err(Error::PageRedirect(target));
        }
        if let Some(message) = self.find("error", |_| true) {
            return Err(Error::UpstreamError(message.to_string()));
        }
        Ok(())
    }

    /// Fold refreshed state tokens into `state`. Fields absent from the
    /// delta keep their previous value; the upstream only re-sends what
    /// changed.
    pub fn apply_to(&self, state: &mut PageState) {
        for (name, slot) in [
            (VIEWSTATE, &mut state.view_state),
            (VIEWSTATE_GENERATOR, &mut state.view_state_generator),
            (EVENT_VALIDATION, &mut state.event_validation),
        ] {
            if let Some(value) = self.hidden_field(name) {
                *slot = value.to_string();
            }
        }
    }
}

/// Full pages start with markup or a doctype; deltas start with a digit.
fn looks_like_full_page(body: &str) -> bool {
    body.trim_start().starts_with('<')
}

/// Read the decimal length prefix and the `|` after it.
fn read_length(body: &str, cursor: &mut usize) -> Result<usize> {
    let rest = &body[*cursor..];
    let digits: &str = rest
        .split('|')
        .next()
        .unwrap_or_default();
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        let head: String = rest.chars().take(16).collect();
        return Err(Error::Delta(format!(
            "expected length prefix at offset {cursor}, found {head:?}"
        )));
    }
    let len: usize = digits
        .parse()
        .map_err(|_| Error::Delta(format!("length prefix overflow: {digits}")))?;
    *cursor += digits.len();
    expect_pipe(body, cursor)?;
    Ok(len)
}

/// Read an unsized field (type or id) up to its `|` delimiter. These
/// fields never contain pipes.
fn read_token<'a>(body: &'a str, cursor: &mut usize, what: &str) -> Result<&'a str> {
    let rest = &body[*cursor..];
    match rest.find('|') {
        Some(end) => {
            let token = &rest[..end];
            *cursor += end + 1;
            Ok(token)
        }
        None => Err(Error::Delta(format!("unterminated {what}"))),
    }
}

/// Consume exactly `len` UTF-16 code units of content plus the trailing
/// delimiter.
fn read_content<'a>(body: &'a str, cursor: &mut usize, len: usize) -> Result<&'a str> {
    let rest = &body[*cursor..];
    let mut units = 0usize;
    let mut end = 0usize;
    if len > 0 {
        for (idx, ch) in rest.char_indices() {
            units += ch.len_utf16();
            end = idx + ch.len_utf8();
            if units == len {
                break;
            }
            if units > len {
                return Err(Error::Delta(
                    "length prefix splits a character".to_string(),
                ));
            }
        }
        if units < len {
            return Err(Error::Delta(format!(
                "truncated content: wanted {} units, body ended after {}",
                len, units
            )));
        }
    }
    let content = &rest[..end];
    *cursor += end;
    expect_pipe(body, cursor)?;
    Ok(content)
}

fn expect_pipe(body: &str, cursor: &mut usize) -> Result<()> {
    if body.as_bytes().get(*cursor) == Some(&b'|') {
        *cursor += 1;
        Ok(())
    } else {
        Err(Error::Delta(format!(
            "expected '|' delimiter at offset {}",
            cursor
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Dropdown;

    fn seg(len: usize, kind: &str, id: &str, content: &str) -> String {
        format!("{len}|{kind}|{id}|{content}|")
    }

    #[test]
    fn parses_multi_segment_body() {
        let panel = "<select id=\"ddl\"><option value=\"1\">A</option></select>";
        let body = format!(
            "{}{}{}",
            seg(panel.len(), "updatePanel", "ctl00_ContentPlaceHolder1_upModel", panel),
            seg(8, "hiddenField", "__VIEWSTATE", "AAAABBBB"),
            seg(4, "hiddenField", "__EVENTVALIDATION", "CCCC"),
        );

        let delta = Delta::parse(&body).unwrap();
        assert_eq!(delta.segments.len(), 3);
        assert_eq!(delta.update_panel("upModel"), Some(panel));
        assert_eq!(delta.hidden_field("__VIEWSTATE"), Some("AAAABBBB"));
        assert_eq!(delta.hidden_field("__VIEWSTATEGENERATOR"), None);
    }

    #[test]
    fn content_may_contain_pipes() {
        // The length prefix must win over pipe-splitting.
        let content = "a|b|c|d";
        let body = seg(content.len(), "updatePanel", "panel", content);
        let delta = Delta::parse(&body).unwrap();
        assert_eq!(delta.first_update_panel(), Some(content));
    }

    #[test]
    fn length_counts_utf16_units() {
        // "Škoda" is 5 UTF-16 units but 6 UTF-8 bytes.
        let content = "Škoda";
        let body = seg(5, "updatePanel", "panel", content);
        let delta = Delta::parse(&body).unwrap();
        assert_eq!(delta.first_update_panel(), Some(content));
    }

    #[test]
    fn byte_counted_length_is_rejected() {
        // A byte-counted frame of the same content says 6, which leaves the
        // closing pipe misaligned. The parser must not silently accept it.
        let body = seg(6, "updatePanel", "panel", "Škoda");
        assert!(Delta::parse(&body).is_err());
    }

    #[test]
    fn zero_length_content_is_valid() {
        let body = seg(0, "asyncPostBackControlIDs", "", "");
        let delta = Delta::parse(&body).unwrap();
        assert_eq!(delta.segments[0].content, "");
    }

    #[test]
    fn truncated_content_is_an_error() {
        let err = Delta::parse("10|updatePanel|p|short|").unwrap_err();
        assert!(matches!(err, Error::Delta(_)), "got {err:?}");
    }

    #[test]
    fn non_numeric_length_is_an_error() {
        let err = Delta::parse("xx|updatePanel|p|hi|").unwrap_err();
        assert!(matches!(err, Error::Delta(_)), "got {err:?}");
    }

    #[test]
    fn full_html_page_means_state_expired() {
        let err = Delta::parse("<!DOCTYPE html><html><body>login</body></html>")
            .unwrap_err();
        assert!(matches!(err, Error::StateExpired));

        let err = Delta::parse("\n  <html><head></head></html>").unwrap_err();
        assert!(matches!(err, Error::StateExpired));
    }

    #[test]
    fn empty_body_is_an_error() {
        assert!(matches!(Delta::parse("").unwrap_err(), Error::Delta(_)));
    }

    #[test]
    fn page_redirect_surfaces_as_typed_error() {
        let target = "%2ferror.aspx";
        let delta = Delta::parse(&seg(target.len(), "pageRedirect", "", target)).unwrap();
        match delta.ensure_ok().unwrap_err() {
            Error::PageRedirect(t) => assert_eq!(t, "/error.aspx"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn error_segment_surfaces_as_typed_error() {
        let msg = "Invalid postback or callback argument.";
        let delta = Delta::parse(&seg(msg.len(), "error", "500", msg)).unwrap();
        match delta.ensure_ok().unwrap_err() {
            Error::UpstreamError(m) => assert_eq!(m, msg),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn apply_to_refreshes_only_present_tokens() {
        let mut state = PageState {
            view_state: "old-vs".to_string(),
            view_state_generator: "old-gen".to_string(),
            event_validation: "old-ev".to_string(),
            ..Default::default()
        };
        state.select(Dropdown::Make, "3");

        let body = format!(
            "{}{}",
            seg(6, "hiddenField", "__VIEWSTATE", "new-vs"),
            seg(6, "hiddenField", "__EVENTVALIDATION", "new-ev"),
        );
        let delta = Delta::parse(&body).unwrap();
        delta.apply_to(&mut state);

        assert_eq!(state.view_state, "new-vs");
        assert_eq!(state.event_validation, "new-ev");
        // Generator was not in the delta; previous value survives.
        assert_eq!(state.view_state_generator, "old-gen");
        assert_eq!(state.selection(Dropdown::Make), Some("3"));
    }
}
