//! Proxy configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Proxy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// JSON API listen address
    pub listen: String,

    /// Upstream page configuration
    pub upstream: UpstreamConfig,

    /// Outbound request pacing
    pub pacing: PacingConfig,

    /// Session cache configuration
    pub session: SessionConfig,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8080".to_string(),
            upstream: UpstreamConfig::default(),
            pacing: PacingConfig::default(),
            session: SessionConfig::default(),
        }
    }
}

/// Upstream site configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Origin of the Web Forms site
    pub base_url: String,

    /// Path of the lookup page
    pub page_path: String,

    /// User-Agent sent on every request; the upstream rejects obvious bots
    pub user_agent: String,

    /// Connect timeout in seconds
    pub connect_timeout_secs: u64,

    /// Total per-request timeout in seconds
    pub request_timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: "https://umvvs.tra.go.tz".to_string(),
            page_path: "/".to_string(),
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/120.0 Safari/537.36"
                .to_string(),
            connect_timeout_secs: 10,
            request_timeout_secs: 30,
        }
    }
}

impl UpstreamConfig {
    /// Full URL of the lookup page
    pub fn page_url(&self) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            self.page_path.trim_start_matches('/')
        )
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Pacing between outbound requests, to stay under upstream rate limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacingConfig {
    /// Minimum gap between outbound requests, in milliseconds
    pub delay_ms: u64,

    /// Random jitter added on top, in milliseconds
    pub jitter_ms: u64,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            delay_ms: 750,
            jitter_ms: 250,
        }
    }
}

/// Session cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Seconds an idle session stays resident
    pub ttl_secs: u64,

    /// Seconds between eviction sweeps
    pub sweep_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 600,
            sweep_interval_secs: 60,
        }
    }
}

impl SessionConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl ProxyConfig {
    /// Load configuration from file
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &std::path::Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_url_joins_without_double_slash() {
        let mut cfg = UpstreamConfig::default();
        cfg.base_url = "https://umvvs.tra.go.tz/".to_string();
        cfg.page_path = "/Default.aspx".to_string();
        assert_eq!(cfg.page_url(), "https://umvvs.tra.go.tz/Default.aspx");
    }

    #[test]
    fn config_round_trips_through_toml() {
        let cfg = ProxyConfig::default();
        let text = toml::to_string_pretty(&cfg).unwrap();
        let back: ProxyConfig = toml::from_str(&text).unwrap();
        assert_eq!(back.listen, cfg.listen);
        assert_eq!(back.upstream.base_url, cfg.upstream.base_url);
        assert_eq!(back.session.ttl_secs, cfg.session.ttl_secs);
    }
}
