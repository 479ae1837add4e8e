//! Cascade lookup commands
//!
//! Every invocation is a fresh browser session as far as the upstream is
//! concerned, so a deep lookup replays the whole chain: `engines` walks
//! init → models → years → countries → fuel-types before asking for the
//! engine list. The proxy's session id carries the state between steps.

use anyhow::Result;
use clap::Args;
use tracing::debug;

use crate::client::ProxyClient;
use crate::output::{print_list, OutputFormat};

#[derive(Args, Debug)]
pub struct ModelsArgs {
    /// Make id (from `mvlookup makes`)
    #[arg(long)]
    pub make: String,
}

#[derive(Args, Debug)]
pub struct YearsArgs {
    #[arg(long)]
    pub make: String,
    /// Model id (from `mvlookup models`)
    #[arg(long)]
    pub model: String,
}

#[derive(Args, Debug)]
pub struct CountriesArgs {
    #[arg(long)]
    pub make: String,
    #[arg(long)]
    pub model: String,
    #[arg(long)]
    pub year: String,
}

#[derive(Args, Debug)]
pub struct FuelTypesArgs {
    #[arg(long)]
    pub make: String,
    #[arg(long)]
    pub model: String,
    #[arg(long)]
    pub year: String,
    #[arg(long)]
    pub country: String,
}

#[derive(Args, Debug)]
pub struct EnginesArgs {
    #[arg(long)]
    pub make: String,
    #[arg(long)]
    pub model: String,
    #[arg(long)]
    pub year: String,
    #[arg(long)]
    pub country: String,
    #[arg(long)]
    pub fuel: String,
}

/// The chain of cascade calls needed to reach one stage. Each entry is
/// the endpoint path plus the request fields it needs.
async fn walk(
    client: &ProxyClient,
    steps: &[(&str, Vec<(&str, &str)>)],
    format: OutputFormat,
) -> Result<()> {
    let mut reply = client.init().await?;
    debug!(
        session = %reply.session,
        makes = reply.options.len(),
        viewstate_bytes = reply.tokens.view_state.len(),
        "initialized"
    );
    for (path, fields) in steps {
        reply = client.cascade(path, reply.session, fields).await?;
        debug!(path, options = reply.options.len(), "cascade step");
    }
    print_list(&reply.options, format);
    Ok(())
}

pub async fn makes(client: &ProxyClient, format: OutputFormat) -> Result<()> {
    walk(client, &[], format).await
}

pub async fn models(client: &ProxyClient, args: ModelsArgs, format: OutputFormat) -> Result<()> {
    walk(
        client,
        &[("models", vec![("make", args.make.as_str())])],
        format,
    )
    .await
}

pub async fn years(client: &ProxyClient, args: YearsArgs, format: OutputFormat) -> Result<()> {
    walk(
        client,
        &[
            ("models", vec![("make", args.make.as_str())]),
            (
                "years",
                vec![("make", args.make.as_str()), ("model", args.model.as_str())],
            ),
        ],
        format,
    )
    .await
}

pub async fn countries(
    client: &ProxyClient,
    args: CountriesArgs,
    format: OutputFormat,
) -> Result<()> {
    walk(
        client,
        &[
            ("models", vec![("make", args.make.as_str())]),
            (
                "years",
                vec![("make", args.make.as_str()), ("model", args.model.as_str())],
            ),
            (
                "countries",
                vec![
                    ("make", args.make.as_str()),
                    ("model", args.model.as_str()),
                    ("year", args.year.as_str()),
                ],
            ),
        ],
        format,
    )
    .await
}

pub async fn fuel_types(
    client: &ProxyClient,
    args: FuelTypesArgs,
    format: OutputFormat,
) -> Result<()> {
    walk(
        client,
        &[
            ("models", vec![("make", args.make.as_str())]),
            (
                "years",
                vec![("make", args.make.as_str()), ("model", args.model.as_str())],
            ),
            (
                "countries",
                vec![
                    ("make", args.make.as_str()),
                    ("model", args.model.as_str()),
                    ("year", args.year.as_str()),
                ],
            ),
            (
                "fuel-types",
                vec![
                    ("make", args.make.as_str()),
                    ("model", args.model.as_str()),
                    ("year", args.year.as_str()),
                    ("country", args.country.as_str()),
                ],
            ),
        ],
        format,
    )
    .await
}

pub async fn engines(client: &ProxyClient, args: EnginesArgs, format: OutputFormat) -> Result<()> {
    walk(
        client,
        &[
            ("models", vec![("make", args.make.as_str())]),
            (
                "years",
                vec![("make", args.make.as_str()), ("model", args.model.as_str())],
            ),
            (
                "countries",
                vec![
                    ("make", args.make.as_str()),
                    ("model", args.model.as_str()),
                    ("year", args.year.as_str()),
                ],
            ),
            (
                "fuel-types",
                vec![
                    ("make", args.make.as_str()),
                    ("model", args.model.as_str()),
                    ("year", args.year.as_str()),
                    ("country", args.country.as_str()),
                ],
            ),
            (
                "engines",
                vec![
                    ("make", args.make.as_str()),
                    ("model", args.model.as_str()),
                    ("year", args.year.as_str()),
                    ("country", args.country.as_str()),
                    ("fuel", args.fuel.as_str()),
                ],
            ),
        ],
        format,
    )
    .await
}
