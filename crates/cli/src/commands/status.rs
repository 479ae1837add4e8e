//! Proxy status command

use anyhow::Result;

use crate::client::ProxyClient;
use crate::output::{print_value, OutputFormat};

pub async fn status(client: &ProxyClient, format: OutputFormat) -> Result<()> {
    let health = client.health().await?;
    print_value(&health, format);
    Ok(())
}
