//! edge-dispatch: local proxy that routes requests to edge functions.
//!
//! ```text
//!     Client ──▶ HttpServer ──▶ Dispatcher ──▶ RouteRegistry (match path)
//!                   │               │
//!                   │               └──▶ IsolateBootstrapper (sandbox, once)
//!                   │
//!                   ├──▶ sandbox   (edge functions, X-Edge-* headers)
//!                   └──▶ origin    (everything else)
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use edge_dispatch::config::watcher::{ConfigWatcher, FunctionDirWatcher};
use edge_dispatch::config::{load_config, DispatchConfig};
use edge_dispatch::lifecycle::{build_edge_context, spawn_reload_task, EdgeServices, Shutdown};
use edge_dispatch::net::LocalPortAllocator;
use edge_dispatch::observability::{init_logging, init_metrics};
use edge_dispatch::HttpServer;

#[derive(Parser, Debug)]
#[command(name = "edge-dispatch", version, about = "Local edge functions proxy")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on (overrides listener.bind_address).
    #[arg(short, long)]
    listen: Option<String>,

    /// Origin server address (overrides origin.address).
    #[arg(short, long)]
    origin: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => DispatchConfig::default(),
    };
    if let Some(listen) = cli.listen {
        config.listener.bind_address = listen;
    }
    if let Some(origin) = cli.origin {
        config.origin.address = origin;
    }

    init_logging(&config.observability)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "edge-dispatch starting");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse::<SocketAddr>() {
            Ok(addr) => init_metrics(addr)?,
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    let local_addr = listener.local_addr()?;

    let ports = Arc::new(LocalPortAllocator::new(
        config.edge.sandbox_ip()?,
    ));
    ports.reserve(local_addr.port());

    let services = EdgeServices::from_config(&config, ports);
    let ctx = build_edge_context(&config, local_addr, services).await?;

    let shutdown = Shutdown::new();
    shutdown.trigger_on_signal();

    // Watchers must stay alive for the lifetime of the server.
    let (config_rx, _config_watcher) = match &cli.config {
        Some(path) => {
            let (watcher, rx) = ConfigWatcher::new(path);
            (rx, Some(watcher.run()?))
        }
        None => (mpsc::unbounded_channel().1, None),
    };
    let (dir_watcher, files_rx) = FunctionDirWatcher::new(&config.edge.functions_dirs);
    let _dir_watcher = dir_watcher.run()?;

    let reload = spawn_reload_task(&ctx, config_rx, files_rx, shutdown.subscribe());

    tracing::info!(
        address = %local_addr,
        origin = %config.origin.address,
        declarations = config.edge.declarations.len(),
        "Listening for connections"
    );

    let server = HttpServer::new(&config, ctx.dispatcher.clone())?;
    server.run(listener, shutdown.subscribe()).await?;

    shutdown.trigger();
    let _ = reload.await;

    tracing::info!("Shutdown complete");
    Ok(())
}
