//! mvlookup CLI - Main Entry Point
//!
//! Command-line client for the mvlookup proxy: walks the upstream
//! dropdown cascade through the JSON API and prints the option lists.

use clap::{Parser, Subcommand};

mod client;
mod commands;
mod output;

use client::ProxyClient;
use commands::{lookup, status};

/// mvlookup CLI - vehicle lookup through the postback-replay proxy
#[derive(Parser)]
#[command(name = "mvlookup")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Proxy API endpoint
    #[arg(long, default_value = "http://127.0.0.1:8080", global = true)]
    endpoint: String,

    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: output::OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List vehicle makes
    Makes,

    /// List models of a make
    Models(lookup::ModelsArgs),

    /// List manufacture years of a model
    Years(lookup::YearsArgs),

    /// List countries of origin
    Countries(lookup::CountriesArgs),

    /// List fuel types
    FuelTypes(lookup::FuelTypesArgs),

    /// List engine capacities
    Engines(lookup::EnginesArgs),

    /// Check proxy health
    Status,

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let client = ProxyClient::new(&cli.endpoint);
    let format = cli.format;

    match cli.command {
        Commands::Makes => lookup::makes(&client, format).await,
        Commands::Models(args) => lookup::models(&client, args, format).await,
        Commands::Years(args) => lookup::years(&client, args, format).await,
        Commands::Countries(args) => lookup::countries(&client, args, format).await,
        Commands::FuelTypes(args) => lookup::fuel_types(&client, args, format).await,
        Commands::Engines(args) => lookup::engines(&client, args, format).await,
        Commands::Status => status::status(&client, format).await,
        Commands::Version => {
            println!("mvlookup {}", mvlookup_common::VERSION);
            Ok(())
        }
    }
}
