//! Command-line entry points: scrape a source, serve the extraction API, or
//! list the configured sources.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use crate::config::{AppConfig, SinkKind};
use crate::fetch::HttpFetcher;
use crate::pipeline::Pipeline;
use crate::server::{self, AppState};
use crate::sink::build_sink;
use crate::source::SourceCatalog;

#[derive(Parser)]
#[command(name = "profile-harvest")]
#[command(version, about = "Scrape performer profiles from listing sites", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Scrape one source and hand every record to the configured sink
    Run {
        /// Source name (see `sources`)
        #[arg(short, long)]
        source: String,

        /// Override the source's listing URL
        #[arg(long)]
        base_url: Option<String>,

        /// Override the sink from configuration
        #[arg(long, value_enum)]
        sink: Option<SinkKind>,

        /// JSON file with extra or replacement source profiles
        #[arg(long, value_name = "FILE")]
        sources_file: Option<PathBuf>,
    },

    /// Start the extraction API server
    Serve {
        /// Host to bind to
        #[arg(short = 'H', long)]
        host: Option<String>,

        /// Port to bind to
        #[arg(short, long)]
        port: Option<u16>,

        #[arg(long, value_name = "FILE")]
        sources_file: Option<PathBuf>,
    },

    /// List configured sources
    Sources {
        #[arg(long, value_name = "FILE")]
        sources_file: Option<PathBuf>,
    },
}

pub async fn run_scrape(
    mut config: AppConfig,
    source: String,
    base_url: Option<String>,
    sink: Option<SinkKind>,
    sources_file: Option<PathBuf>,
) -> anyhow::Result<()> {
    let catalog = SourceCatalog::load(sources_file.as_deref())?;
    let mut profile = catalog.get(&source)?.clone();
    if let Some(url) = base_url {
        profile = profile.with_base_url(&url);
    }
    if let Some(kind) = sink {
        config.sink.kind = kind;
    }

    let fetcher = HttpFetcher::new(&config.fetch, &profile.session)?;
    let sink = build_sink(&config.sink).context("failed to open sink")?;
    info!(source = %profile.name, url = %profile.base_url, sink = sink.name(), "starting run");

    let report = Pipeline::new(profile, Box::new(fetcher), sink)?.run().await?;
    println!("{}", report);
    Ok(())
}

pub async fn run_serve(
    mut config: AppConfig,
    host: Option<String>,
    port: Option<u16>,
    sources_file: Option<PathBuf>,
) -> anyhow::Result<()> {
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    let catalog = SourceCatalog::load(sources_file.as_deref())?;
    server::serve(&config.server, AppState::new(catalog, config.fetch)).await
}

pub fn run_list(sources_file: Option<PathBuf>) -> anyhow::Result<()> {
    let catalog = SourceCatalog::load(sources_file.as_deref())?;
    for name in catalog.names() {
        let profile = catalog.get(name)?;
        println!("{:<16} {:<18} {}", profile.name, profile.display_name, profile.base_url);
    }
    Ok(())
}
