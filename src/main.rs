// Tern - Multi-transport MCP capability gateway
// Main entry point

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use tern::config::load_settings;
use tern::mcp::AggregationLayer;
use tern::server::{GatewayServer, ServerConfig};

#[derive(Debug, Parser)]
#[command(name = "tern", version, about = "MCP capability aggregation gateway")]
struct Cli {
    /// Path to the configuration file (default: ~/.tern/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the configured listen port
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tern=info")),
        )
        .init();

    let cli = Cli::parse();

    // Load configuration
    let mut settings = load_settings(cli.config.as_deref())?;
    if let Some(port) = cli.port {
        settings.server.port = port;
    }

    // Register every configured provider, then connect them all
    let aggregator = Arc::new(AggregationLayer::new());
    for provider in settings.providers.clone() {
        if let Err(e) = aggregator.add_provider(provider).await {
            tracing::warn!("skipping provider: {}", e);
        }
    }
    aggregator.start().await;

    // Serve until interrupted, then tear the providers down. Embedders can
    // attach a tunnel service here; the binary runs local-only.
    let server = GatewayServer::new(
        Arc::clone(&aggregator),
        None,
        ServerConfig {
            bind_address: settings.server.bind_address(),
            ..ServerConfig::default()
        },
    );

    tokio::select! {
        result = server.serve() => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutting down");
        }
    }

    aggregator.stop().await;
    Ok(())
}
