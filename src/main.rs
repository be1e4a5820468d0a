mod assemble;
mod cards;
mod cli;
mod config;
mod dictionary;
mod extract;
mod fetch;
mod models;
mod normalize;
mod pipeline;
mod server;
mod sink;
mod source;

use clap::Parser;

use crate::cli::{Cli, Commands};
use crate::config::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load()?;

    match cli.command {
        Commands::Run {
            source,
            base_url,
            sink,
            sources_file,
        } => cli::run_scrape(config, source, base_url, sink, sources_file).await,
        Commands::Serve {
            host,
            port,
            sources_file,
        } => cli::run_serve(config, host, port, sources_file).await,
        Commands::Sources { sources_file } => cli::run_list(sources_file),
    }
}
