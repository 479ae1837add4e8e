use std::net::SocketAddr;
use std::path::PathBuf;

use tracing::info;

use mvlookup_replay::ProxyConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config_path = std::env::var("MVLOOKUP_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("mvlookup.toml"));
    let mut cfg = ProxyConfig::load(&config_path)?;

    // Env overrides for the common knobs.
    if let Ok(listen) = std::env::var("MVLOOKUP_LISTEN") {
        if !listen.trim().is_empty() {
            cfg.listen = listen;
        }
    }
    if let Ok(upstream) = std::env::var("MVLOOKUP_UPSTREAM_URL") {
        if !upstream.trim().is_empty() {
            cfg.upstream.base_url = upstream;
        }
    }

    let addr: SocketAddr = cfg.listen.parse()?;
    info!(
        "Starting mvlookup API on http://{} (upstream: {})",
        addr, cfg.upstream.base_url
    );

    mvlookup_web::serve(addr, cfg).await
}
