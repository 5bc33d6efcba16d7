//! `mcp-bridge` — standalone binary entry point for the bridge server.

#![deny(unsafe_code)]
#![deny(clippy::unwrap_used)]

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use mcp_bridge::config::BridgeConfig;
use mcp_bridge::server::build_router;
use mcp_bridge::Bridge;

/// Bridge between browser frontends and external MCP clients.
#[derive(Parser)]
#[command(name = "mcp-bridge")]
#[command(author, version, about = "Bridge between browser frontends and external MCP clients")]
struct Args {
    /// Path to a TOML configuration file.
    #[arg(long, env = "BRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Override `server.listen_addr`.
    #[arg(long, env = "BRIDGE_LISTEN_ADDR")]
    listen_addr: Option<String>,

    /// Override `agent.url`.
    #[arg(long, env = "BRIDGE_AGENT_URL")]
    agent_url: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn,mcp_bridge=info")),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => BridgeConfig::load(path)?,
        None => BridgeConfig::default(),
    };
    if let Some(listen_addr) = args.listen_addr {
        config.server.listen_addr = listen_addr;
    }
    if let Some(agent_url) = args.agent_url {
        config.agent.url = Some(agent_url);
    }

    let listen_addr = config.server.listen_addr.clone();
    let bridge = Arc::new(Bridge::new(config));
    let idle_timers = bridge.start_idle_sweeps();

    let router = build_router(bridge.clone());
    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    tracing::info!(%listen_addr, "mcp-bridge listening");

    let server = axum::serve(listener, router).with_graceful_shutdown(shutdown_signal());
    server.await?;

    bridge.close(idle_timers).await;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("received ctrl-c, shutting down");
}
