//! Engine relay: keeps one connection to an engine-control server and fans its
//! output out to local WebSocket consumers.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use clap::Parser;
use engine_relay::control::ControlSurface;
use engine_relay::host::LoggingHost;
use engine_relay::registry::ConsumerChannels;
use engine_relay::server::Server;
use engine_relay::store::MemoryStore;
use engine_relay::ws::{Config, ReconnectConfig};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "engine-relay")]
#[command(about = "Relay between an engine-control server and local consumers")]
struct Args {
    /// Address consumers connect to
    #[arg(long, default_value = "127.0.0.1:9001")]
    listen: SocketAddr,

    /// Engine-control endpoint
    #[arg(long, env = "ENGINE_RELAY_ENDPOINT", default_value = engine_relay::ws::config::DEFAULT_ENDPOINT)]
    endpoint: String,

    /// Connect on startup instead of waiting for a consumer to ask
    #[arg(long)]
    connect: bool,

    /// Delay before reconnecting after the engine socket closes
    #[arg(long, default_value_t = 3000)]
    reconnect_delay_ms: u64,

    /// Delay between the handshake and the engine-setup commands
    #[arg(long, default_value_t = 100)]
    settle_delay_ms: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .compact()
        .init();

    let mut config = Config::default().with_endpoint(args.endpoint);
    config.settle_delay = Duration::from_millis(args.settle_delay_ms);
    config.reconnect = ReconnectConfig::fixed(Duration::from_millis(args.reconnect_delay_ms));

    let channels = Arc::new(ConsumerChannels::new());
    let surface = Arc::new(ControlSurface::new(
        config,
        Arc::clone(&channels) as _,
        Arc::new(MemoryStore::new()),
        Arc::new(LoggingHost),
    ));

    let server = Server::bind(args.listen, Arc::clone(&surface), channels)
        .await
        .with_context(|| format!("unable to listen on {}", args.listen))?;
    let addr = server.local_addr()?;
    info!(%addr, "Engine relay listening");

    if args.connect {
        surface.connection().connect(None)?;
    }

    let shutdown = CancellationToken::new();
    let serving = tokio::spawn(server.serve(shutdown.clone()));

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    surface.connection().disconnect()?;
    shutdown.cancel();
    serving.await??;

    Ok(())
}
