//! Proxy API client

use anyhow::{anyhow, Result};
use mvlookup_common::{DropdownOption, PageState};
use serde::Deserialize;
use uuid::Uuid;

/// One cascade response from the proxy
#[derive(Debug, Deserialize)]
pub struct OptionsReply {
    pub options: Vec<DropdownOption>,
    pub session: Uuid,
    pub tokens: PageState,
}

/// Client for the mvlookup JSON API
pub struct ProxyClient {
    http: reqwest::Client,
    endpoint: String,
}

impl ProxyClient {
    pub fn new(endpoint: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
        }
    }

    /// GET /api/init — fetch make options and open a session.
    pub async fn init(&self) -> Result<OptionsReply> {
        let resp = self
            .http
            .get(format!("{}/api/init", self.endpoint))
            .send()
            .await?;
        Self::decode(resp).await
    }

    /// POST one cascade endpoint with a session id plus the parent ids.
    pub async fn cascade(
        &self,
        path: &str,
        session: Uuid,
        fields: &[(&str, &str)],
    ) -> Result<OptionsReply> {
        let mut body = serde_json::Map::new();
        body.insert("session".to_string(), serde_json::json!(session));
        for (k, v) in fields {
            body.insert((*k).to_string(), serde_json::json!(v));
        }

        let resp = self
            .http
            .post(format!("{}/api/{}", self.endpoint, path))
            .json(&serde_json::Value::Object(body))
            .send()
            .await?;
        Self::decode(resp).await
    }

    /// GET /health
    pub async fn health(&self) -> Result<serde_json::Value> {
        let resp = self
            .http
            .get(format!("{}/health", self.endpoint))
            .send()
            .await?;
        Ok(resp.error_for_status()?.json().await?)
    }

    async fn decode(resp: reqwest::Response) -> Result<OptionsReply> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp.json().await?);
        }
        // The proxy answers errors as {"code": ..., "error": ...}.
        let body: serde_json::Value = resp.json().await.unwrap_or_default();
        let message = body["error"].as_str().unwrap_or("unknown error").to_string();
        let code = body["code"].as_str().unwrap_or("unknown").to_string();
        Err(anyhow!("{status} ({code}): {message}"))
    }
}
