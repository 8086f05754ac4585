//! Cartographica island server - main entry point
//!
//! Loads configuration, starts the socket engine with the island relay and
//! runs until SIGINT or SIGTERM.

use anyhow::Result;
use clap::Parser;
use island_server::{config, logging, signals, Args, Relay};
use socket_engine::WebSocketServer;
use tracing::{error, info};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = config::load_config(&args)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;

    if let Err(e) = logging::setup_logging(&config.logging) {
        return Err(anyhow::anyhow!("Failed to initialize logging: {}", e));
    }

    info!("🏝️ Starting island '{}'", config.island.name);
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded from: {}", args.config.display());
    if config.island.idle_timeout_ms > 0 {
        info!("💤 Idle players are closed after {}ms", config.island.idle_timeout_ms);
    }

    let relay = Relay::new(&config.island);
    let server = WebSocketServer::bind(config.server.clone(), relay)?;
    let shutdown = server.shutdown_handle();
    let mut server_task = tokio::spawn(server.run());

    tokio::select! {
        finished = &mut server_task => {
            error!("Server stopped unexpectedly");
            finished??;
        }
        signal = signals::wait_for_shutdown_signal() => {
            signal?;
            info!("🛑 Shutting down island '{}'", config.island.name);
            shutdown.shutdown();
            server_task.await??;
        }
    }

    info!("👋 Island server stopped");
    Ok(())
}
