//! Startup orchestration.
//!
//! # Responsibilities
//! - Build the edge services (port allocator, runtime, function sources)
//! - Wire bootstrapper, registry and dispatcher together
//! - Kick off sandbox startup in the background when edge functions exist
//! - Apply config and function file changes while running

use std::net::{AddrParseError, IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::config::DispatchConfig;
use crate::dispatch::Dispatcher;
use crate::isolate::{
    BootstrapOptions, BootstrapProgress, ErrorFormatters, IsolateBootstrapper, IsolateRuntime,
    LogProgress, ProcessRuntime,
};
use crate::net::PortAllocator;
use crate::routing::{
    DirectoryFunctionSource, FunctionSource, InternalDirectory, InternalFunctionSupplier,
    RouteRegistry, SourceError,
};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to load internal edge functions: {0}")]
    Internal(#[from] SourceError),

    #[error("invalid sandbox host: {0}")]
    SandboxHost(#[from] AddrParseError),
}

/// External collaborators of the edge subsystem. Swappable in tests.
#[derive(Clone)]
pub struct EdgeServices {
    pub runtime: Arc<dyn IsolateRuntime>,
    pub ports: Arc<dyn PortAllocator>,
    pub source: Arc<dyn FunctionSource>,
    pub internal: Arc<dyn InternalFunctionSupplier>,
    pub progress: Arc<dyn BootstrapProgress>,
    pub formatters: ErrorFormatters,
}

impl EdgeServices {
    /// Production services: a spawned runtime process and on-disk functions.
    pub fn from_config(config: &DispatchConfig, ports: Arc<dyn PortAllocator>) -> Self {
        Self {
            runtime: Arc::new(ProcessRuntime::new(config.runtime.clone())),
            ports,
            source: Arc::new(DirectoryFunctionSource::new(config.edge.functions_dirs.clone())),
            internal: Arc::new(InternalDirectory::new(config.edge.internal_dir.clone())),
            progress: Arc::new(LogProgress),
            formatters: ErrorFormatters::default(),
        }
    }
}

/// The wired edge subsystem.
#[derive(Clone)]
pub struct EdgeContext {
    pub dispatcher: Arc<Dispatcher>,
    pub registry: Arc<RouteRegistry>,
    pub bootstrapper: Arc<IsolateBootstrapper>,
}

/// Wire the edge subsystem for a server listening on `listen`.
///
/// Sandbox startup begins immediately, without waiting, when any edge
/// function is declared or bundled.
pub async fn build_edge_context(
    config: &DispatchConfig,
    listen: SocketAddr,
    services: EdgeServices,
) -> Result<EdgeContext, StartupError> {
    let host = config.edge.sandbox_ip()?;
    let internal = services.internal.internal_functions().await?;
    let internal_count = internal.functions.len();

    let bootstrapper = Arc::new(
        IsolateBootstrapper::new(
            services.runtime,
            services.ports,
            BootstrapOptions::new(host, &config.edge, &internal),
        )
        .with_progress(services.progress)
        .with_formatters(services.formatters),
    );

    let registry = Arc::new(RouteRegistry::new(
        config.edge.declarations.clone(),
        config.edge.import_map.clone(),
        services.source,
        services.internal,
        bootstrapper.clone(),
    ));

    let dispatcher = Arc::new(Dispatcher::new(
        registry.clone(),
        bootstrapper.clone(),
        pass_host(listen),
        config.edge.declarations.len(),
        internal_count,
    ));

    if dispatcher.has_edge_functions() {
        tracing::info!(
            declarations = config.edge.declarations.len(),
            internal_functions = internal_count,
            "Edge functions configured, starting sandbox in the background"
        );
        let _ = bootstrapper.start();
    } else {
        tracing::info!("No edge functions configured, all requests go to the origin");
    }

    Ok(EdgeContext {
        dispatcher,
        registry,
        bootstrapper,
    })
}

/// `host:port` the sandbox uses to reach this server again.
fn pass_host(listen: SocketAddr) -> String {
    let ip = if listen.ip().is_unspecified() {
        IpAddr::V4(Ipv4Addr::LOCALHOST)
    } else {
        listen.ip()
    };
    SocketAddr::new(ip, listen.port()).to_string()
}

/// Apply config reloads and function file changes until shutdown.
///
/// Only edge declarations are hot-reloaded; listener, origin and runtime
/// settings need a restart.
pub fn spawn_reload_task(
    ctx: &EdgeContext,
    mut config_rx: mpsc::UnboundedReceiver<DispatchConfig>,
    mut files_rx: mpsc::UnboundedReceiver<()>,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    let registry = ctx.registry.clone();
    let dispatcher = ctx.dispatcher.clone();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                Some(config) = config_rx.recv() => {
                    registry.update_declarations(config.edge.declarations);
                    dispatcher.reconfigure(registry.declaration_count());
                    tracing::info!(
                        declarations = registry.declaration_count(),
                        "Edge function declarations reloaded"
                    );
                }
                Some(()) = files_rx.recv() => {
                    registry.invalidate();
                }
                _ = shutdown.recv() => break,
                else => break,
            }
        }
        tracing::debug!("Reload task stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pass_host_replaces_unspecified() {
        assert_eq!(pass_host("0.0.0.0:8888".parse().unwrap()), "127.0.0.1:8888");
        assert_eq!(pass_host("127.0.0.2:80".parse().unwrap()), "127.0.0.2:80");
    }
}
