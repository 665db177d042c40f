#![warn(missing_docs)]

//! `cfed-node`: run, reconcile, or inspect a chunkfed node.

use anyhow::Result;
use chunkfed_node::cli::Cli;
use chunkfed_node::LogFormat;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.load_config()?;
    init_tracing(Cli::log_format(config.as_ref()));

    tracing::info!("chunkfed node starting...");
    cli.run(config).await
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
    }
}
