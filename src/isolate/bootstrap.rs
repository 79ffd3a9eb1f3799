//! One-time sandbox startup.
//!
//! # Responsibilities
//! - Start the sandbox server at most once per process
//! - Let any number of callers await the same startup
//! - Cache the outcome (success or failure) for the process lifetime
//!
//! # Design Decisions
//! - Startup runs in its own spawned task; a cancelled request never aborts
//!   or repeats it
//! - `OnceLock` guards the spawn, a `Shared` future fans the result out
//! - No timeout: a hung startup stalls edge requests until it resolves

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use async_trait::async_trait;
use futures_util::future::{BoxFuture, FutureExt, Shared};

use crate::config::EdgeConfig;
use crate::isolate::error::{BootstrapError, ControlError};
use crate::isolate::runtime::{
    BootstrapProgress, ErrorFormatters, FunctionBundle, IsolateRuntime, IsolateServer,
    LogProgress, ServeOptions, SubmitReport,
};
use crate::net::port::PortAllocator;
use crate::observability::metrics;
use crate::routing::registry::{FunctionSink, RegistryError};
use crate::routing::source::InternalFunctions;

type StartupOutcome = Result<SandboxHandle, BootstrapError>;
type StartupFuture = Shared<BoxFuture<'static, StartupOutcome>>;

/// Handle to the running sandbox. Cheap to clone; all clones share one server.
#[derive(Clone)]
pub struct SandboxHandle {
    inner: Arc<SandboxInner>,
}

struct SandboxInner {
    address: SocketAddr,
    server: Box<dyn IsolateServer>,
}

impl SandboxHandle {
    pub fn new(address: SocketAddr, server: Box<dyn IsolateServer>) -> Self {
        Self {
            inner: Arc::new(SandboxInner { address, server }),
        }
    }

    /// Address requests for edge functions are forwarded to.
    pub fn address(&self) -> SocketAddr {
        self.inner.address
    }

    pub fn port(&self) -> u16 {
        self.inner.address.port()
    }

    /// Submit the current function set to the sandbox.
    pub async fn submit(&self, bundle: &FunctionBundle) -> Result<SubmitReport, ControlError> {
        self.inner.server.submit(bundle).await
    }
}

impl std::fmt::Debug for SandboxHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxHandle")
            .field("address", &self.inner.address)
            .finish_non_exhaustive()
    }
}

/// Static settings for the sandbox.
#[derive(Debug, Clone)]
pub struct BootstrapOptions {
    pub host: IpAddr,
    pub directories: Vec<PathBuf>,
    pub import_maps: Vec<PathBuf>,
    pub debug: bool,
}

impl BootstrapOptions {
    /// User directories and import map first, then the internal ones.
    pub fn new(host: IpAddr, edge: &EdgeConfig, internal: &InternalFunctions) -> Self {
        let directories = edge
            .functions_dirs
            .iter()
            .chain(internal.path.iter())
            .cloned()
            .collect();
        let import_maps = edge
            .import_map
            .iter()
            .chain(internal.import_map.iter())
            .cloned()
            .collect();

        Self {
            host,
            directories,
            import_maps,
            debug: edge.debug,
        }
    }
}

impl Default for BootstrapOptions {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            directories: Vec::new(),
            import_maps: Vec::new(),
            debug: false,
        }
    }
}

/// Starts the sandbox once and shares the result.
pub struct IsolateBootstrapper {
    runtime: Arc<dyn IsolateRuntime>,
    ports: Arc<dyn PortAllocator>,
    options: BootstrapOptions,
    progress: Arc<dyn BootstrapProgress>,
    formatters: ErrorFormatters,
    startup: OnceLock<StartupFuture>,
}

impl IsolateBootstrapper {
    pub fn new(
        runtime: Arc<dyn IsolateRuntime>,
        ports: Arc<dyn PortAllocator>,
        options: BootstrapOptions,
    ) -> Self {
        Self {
            runtime,
            ports,
            options,
            progress: Arc::new(LogProgress),
            formatters: ErrorFormatters::default(),
            startup: OnceLock::new(),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn BootstrapProgress>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_formatters(mut self, formatters: ErrorFormatters) -> Self {
        self.formatters = formatters;
        self
    }

    /// Kick off startup if it has not begun and return the pending outcome.
    ///
    /// Dropping the returned future does not cancel startup. Must be called
    /// from within a Tokio runtime.
    pub fn start(&self) -> StartupFuture {
        self.startup
            .get_or_init(|| {
                let task = tokio::spawn(run_startup(
                    self.runtime.clone(),
                    self.ports.clone(),
                    self.options.clone(),
                    self.progress.clone(),
                    self.formatters,
                ));
                async move {
                    match task.await {
                        Ok(outcome) => outcome,
                        Err(e) => Err(BootstrapError::Crashed(e.to_string())),
                    }
                }
                .boxed()
                .shared()
            })
            .clone()
    }

    /// Wait for the sandbox, starting it if needed.
    pub async fn ensure_started(&self) -> StartupOutcome {
        self.start().await
    }

    /// Whether startup has been triggered.
    pub fn is_started(&self) -> bool {
        self.startup.get().is_some()
    }

    /// The outcome, if startup has already finished.
    pub fn outcome(&self) -> Option<StartupOutcome> {
        self.startup.get().and_then(|startup| startup.peek().cloned())
    }
}

async fn run_startup(
    runtime: Arc<dyn IsolateRuntime>,
    ports: Arc<dyn PortAllocator>,
    options: BootstrapOptions,
    progress: Arc<dyn BootstrapProgress>,
    formatters: ErrorFormatters,
) -> StartupOutcome {
    let started = Instant::now();
    let outcome = start_sandbox(runtime, ports, options, progress, formatters).await;
    metrics::record_bootstrap(started, outcome.is_ok());

    match &outcome {
        Ok(handle) => tracing::info!(
            address = %handle.address(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Edge functions sandbox ready"
        ),
        Err(e) => tracing::error!(
            error = %e,
            "Edge functions sandbox failed to start; edge functions will not be served"
        ),
    }
    outcome
}

async fn start_sandbox(
    runtime: Arc<dyn IsolateRuntime>,
    ports: Arc<dyn PortAllocator>,
    options: BootstrapOptions,
    progress: Arc<dyn BootstrapProgress>,
    formatters: ErrorFormatters,
) -> StartupOutcome {
    let port = ports
        .free_port()
        .map_err(|e| BootstrapError::PortAllocation(e.to_string()))?;

    tracing::info!(
        host = %options.host,
        port,
        directories = ?options.directories,
        "Starting edge functions sandbox"
    );

    let server = runtime
        .serve(ServeOptions {
            host: options.host,
            port,
            directories: options.directories,
            import_maps: options.import_maps,
            debug: options.debug,
            progress,
            formatters,
        })
        .await?;

    Ok(SandboxHandle::new(SocketAddr::new(options.host, port), server))
}

#[async_trait]
impl FunctionSink for IsolateBootstrapper {
    async fn publish(&self, bundle: &FunctionBundle) -> Result<(), RegistryError> {
        let handle = self.ensure_started().await?;
        let report = handle.submit(bundle).await?;

        for failure in &report.failures {
            tracing::error!(
                function = %failure.function,
                kind = ?failure.kind,
                "{}",
                failure.message
            );
        }
        tracing::info!(
            loaded = report.loaded.len(),
            failed = report.failures.len(),
            "Edge functions loaded"
        );
        Ok(())
    }
}
