mod api;
mod auth;
mod collector;
mod crawl;
mod grid;
mod hosts;
mod record;
mod sink;
mod state;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, Level};

use api::{build_http_client, DirectoryClient};
use auth::{GuestAuth, TokenStore};
use collector::{Collector, KnownIdSet};
use crawl::Crawler;
use hosts::HostRegistry;
use sink::JsonLinesSink;
use state::{CrawlConfig, HostsConfig};

/// Enumerate every charge point in a region from a bounding-box search API.
#[derive(Parser, Debug)]
#[command(name = "chargepoint-crawler", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Job>,
}

#[derive(Subcommand, Debug)]
enum Job {
    /// Tiled crawl of the charge-point directory (default)
    Locations {
        /// JSON-lines output, also read back as resumption state
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Flat crawl of the host registry
    Hosts {
        /// JSON-lines output, also read back as resumption state
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load env before anything reads it
    let _ = dotenv::dotenv();

    let level = dotenv::var("LOG_LEVEL")
        .ok()
        .and_then(|l| l.parse::<Level>().ok())
        .unwrap_or(Level::INFO);
    tracing_subscriber::fmt().with_max_level(level).init();

    let cli = Cli::parse();
    match cli.command.unwrap_or(Job::Locations { output: None }) {
        Job::Locations { output } => crawl_locations(output).await,
        Job::Hosts { output } => crawl_hosts(output).await,
    }
}

async fn crawl_locations(output: Option<PathBuf>) -> Result<()> {
    let mut config = CrawlConfig::from_env()?;
    if let Some(path) = output {
        config.output_path = path;
    }
    info!(
        region = ?config.region,
        country = %config.target_country,
        output = %config.output_path.display(),
        "Location crawl configured"
    );

    let known = KnownIdSet::load(&config.output_path, "uuid");
    let mut sink = JsonLinesSink::open(&config.output_path)?;

    let http = build_http_client(&config.http)?;
    let tokens = TokenStore::connect(GuestAuth::new(http.clone(), &config.auth_url))
        .await
        .context("Failed to obtain guest token")?;
    let client = DirectoryClient::new(http, &config.api_base, config.http.clone(), Arc::new(tokens));

    let mut collector = Collector::new(known);
    let seeds = grid::coarse_cells(&config.region);
    let report = Crawler::new(&client, &config.target_country, config.max_in_flight)
        .run(seeds, &mut collector, &mut sink)
        .await?;

    info!(
        new_records = report.emitted,
        written = sink.written(),
        total_known = collector.known().len(),
        "Locations saved to {}",
        config.output_path.display()
    );
    Ok(())
}

async fn crawl_hosts(output: Option<PathBuf>) -> Result<()> {
    let mut config = HostsConfig::from_env()?;
    if let Some(path) = output {
        config.output_path = path;
    }

    let http = build_http_client(&config.http)?;
    let output_path = config.output_path.clone();
    let registry = HostRegistry::from_env(http, config)?;

    let mut known = KnownIdSet::load(&output_path, "id");
    let mut sink = JsonLinesSink::open(&output_path)?;
    let report = registry.crawl(&mut known, &mut sink).await?;

    info!(
        new_hosts = report.emitted,
        "Hosts saved to {}",
        output_path.display()
    );
    Ok(())
}
