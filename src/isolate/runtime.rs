//! Boundary between the dispatcher and the sandbox runtime.
//!
//! The runtime is an external collaborator: it is started with a
//! [`ServeOptions`] and hands back an [`IsolateServer`], the control channel
//! through which function bundles are submitted.

use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::isolate::error::{BootstrapError, ControlError};
use crate::routing::source::{ImportMap, RegisteredFunction};

/// Everything the sandbox needs to (re)load the current function set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FunctionBundle {
    pub functions: Vec<RegisteredFunction>,
    pub import_map: ImportMap,
}

/// The two classes of load failure the sandbox reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The module's default export is not a function.
    NotAFunction,
    /// The module failed to import or threw while evaluating.
    ImportFailure,
}

/// A function the sandbox could not load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionFailure {
    pub function: String,
    pub kind: FailureKind,
    pub message: String,
}

/// The sandbox's answer to a bundle submission.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmitReport {
    pub loaded: Vec<String>,
    pub failures: Vec<FunctionFailure>,
}

/// Formatters for the two failure classes.
#[derive(Debug, Clone, Copy)]
pub struct ErrorFormatters {
    pub not_a_function: fn(&str) -> String,
    pub import_failure: fn(&str, &str) -> String,
}

impl ErrorFormatters {
    pub fn format(&self, function: &str, kind: FailureKind, detail: &str) -> String {
        match kind {
            FailureKind::NotAFunction => (self.not_a_function)(function),
            FailureKind::ImportFailure => (self.import_failure)(function, detail),
        }
    }
}

impl Default for ErrorFormatters {
    fn default() -> Self {
        Self {
            not_a_function: |function| {
                format!(
                    "Failed to load edge function {function}: the default export is not a function"
                )
            },
            import_failure: |function, detail| {
                format!("Failed to load edge function {function}: {detail}")
            },
        }
    }
}

/// Hooks fired around the (optional) runtime download.
pub trait BootstrapProgress: Send + Sync {
    fn before_download(&self);
    fn after_download(&self);
}

/// Reports download progress through the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogProgress;

impl BootstrapProgress for LogProgress {
    fn before_download(&self) {
        tracing::info!("Setting up the edge functions environment. This may take a moment...");
    }

    fn after_download(&self) {
        tracing::info!("Edge functions environment ready");
    }
}

/// Options passed to [`IsolateRuntime::serve`].
#[derive(Clone)]
pub struct ServeOptions {
    pub host: IpAddr,
    pub port: u16,
    pub directories: Vec<PathBuf>,
    pub import_maps: Vec<PathBuf>,
    pub debug: bool,
    pub progress: Arc<dyn BootstrapProgress>,
    pub formatters: ErrorFormatters,
}

/// Starts sandbox servers.
#[async_trait]
pub trait IsolateRuntime: Send + Sync {
    /// Start a sandbox listening on `options.host:options.port`. Returns once
    /// the sandbox accepts connections.
    async fn serve(&self, options: ServeOptions) -> Result<Box<dyn IsolateServer>, BootstrapError>;
}

/// Control channel of a running sandbox.
#[async_trait]
pub trait IsolateServer: Send + Sync {
    async fn submit(&self, bundle: &FunctionBundle) -> Result<SubmitReport, ControlError>;
}
