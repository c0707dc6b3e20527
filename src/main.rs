//! WebDNA MCP server binary.

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use webdna_mcp_rs::config::{Args, Command, Config, Transport};
use webdna_mcp_rs::{SERVER_NAME, VERSION};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    // stdout carries the wire protocol in stdio mode; every log line goes
    // to stderr regardless of transport.
    let default_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config::from_args(&args)?;
    info!(version = VERSION, "{} starting", SERVER_NAME);

    match args.command {
        Some(Command::Scrape { base_url, delay_ms }) => {
            webdna_mcp_rs::scraper::run(&config, &base_url, delay_ms).await?;
        }
        None => match config.transport {
            Transport::Stdio => webdna_mcp_rs::worker::run(&config).await?,
            Transport::Http => webdna_mcp_rs::http::start_server(&config).await?,
        },
    }

    Ok(())
}
