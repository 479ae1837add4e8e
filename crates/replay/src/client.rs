//! Upstream HTTP client
//!
//! One client per proxy process. All outbound traffic flows through
//! [`UpstreamClient::pace`], which enforces the configured minimum gap
//! (plus jitter) between requests so the proxy never hammers the site
//! faster than a human clicking through the dropdowns.
//!
//! Cookies are not delegated to reqwest's jar: they live in [`PageState`]
//! so a stateless client can carry them between calls.

use crate::config::{PacingConfig, UpstreamConfig};
use mvlookup_common::{Error, PageState, Result};
use rand::Rng;
use reqwest::header;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, trace};

/// HTTP client for the upstream Web Forms page
pub struct UpstreamClient {
    http: reqwest::Client,
    cfg: UpstreamConfig,
    pacing: PacingConfig,
    last_request: Mutex<Option<Instant>>,
}

impl UpstreamClient {
    pub fn new(cfg: UpstreamConfig, pacing: PacingConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(cfg.connect_timeout())
            .timeout(cfg.request_timeout())
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| Error::Internal(format!("http client: {e}")))?;

        Ok(Self {
            http,
            cfg,
            pacing,
            last_request: Mutex::new(None),
        })
    }

    pub fn page_url(&self) -> String {
        self.cfg.page_url()
    }

    fn map_send_error(&self, e: reqwest::Error) -> Error {
        if e.is_timeout() {
            Error::Timeout {
                seconds: self.cfg.request_timeout_secs,
            }
        } else {
            Error::Upstream(e.to_string())
        }
    }

    /// Wait out the pacing gap since the previous outbound request.
    ///
    /// The lock is held across the sleep so concurrent API calls queue up
    /// instead of bursting through in parallel.
    async fn pace(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(prev) = *last {
            let gap = Duration::from_millis(
                self.pacing.delay_ms + rand::thread_rng().gen_range(0..=self.pacing.jitter_ms),
            );
            let elapsed = prev.elapsed();
            if elapsed < gap {
                let wait = gap - elapsed;
                trace!(wait_ms = wait.as_millis() as u64, "pacing outbound request");
                tokio::time::sleep(wait).await;
            }
        }
        *last = Some(Instant::now());
    }

    /// GET the lookup page. Returns the HTML body and any `Set-Cookie`
    /// values the upstream issued.
    pub async fn fetch_page(&self) -> Result<(String, Vec<String>)> {
        self.pace().await;
        let url = self.cfg.page_url();
        debug!(%url, "fetching upstream page");

        let resp = self
            .http
            .get(&url)
            .header(header::USER_AGENT, &self.cfg.user_agent)
            .header(header::ACCEPT, "text/html,application/xhtml+xml")
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Error::UpstreamStatus {
                status: status.as_u16(),
            });
        }

        let cookies = resp
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(|v| v.to_string())
            .collect();

        let body = resp.text().await.map_err(|e| self.map_send_error(e))?;
        Ok((body, cookies))
    }

    /// POST one partial postback. `form` is the already-encoded body.
    /// Returns the raw delta text; parsing is the caller's job.
    pub async fn post_delta(&self, state: &PageState, form: String) -> Result<String> {
        self.pace().await;
        let url = self.cfg.page_url();
        debug!(%url, bytes = form.len(), "posting partial postback");

        let mut req = self
            .http
            .post(&url)
            .header(header::USER_AGENT, &self.cfg.user_agent)
            .header(
                header::CONTENT_TYPE,
                "application/x-www-form-urlencoded; charset=utf-8",
            )
            .header(header::ACCEPT, "*/*")
            .header(header::REFERER, &url)
            .header(header::ORIGIN, self.cfg.base_url.trim_end_matches('/'))
            // These two make the ScriptManager answer with a delta
            // instead of a full page render.
            .header("X-MicrosoftAjax", "Delta=true")
            .header("X-Requested-With", "XMLHttpRequest")
            .body(form);

        if let Some(cookie) = state.cookie_header() {
            req = req.header(header::COOKIE, cookie);
        }

        let resp = req.send().await.map_err(|e| self.map_send_error(e))?;

        let status = resp.status();
        // A redirect on postback means the server dropped our state.
        if status.is_redirection() {
            return Err(Error::StateExpired);
        }
        if !status.is_success() {
            return Err(Error::UpstreamStatus {
                status: status.as_u16(),
            });
        }

        resp.text().await.map_err(|e| self.map_send_error(e))
    }
}
