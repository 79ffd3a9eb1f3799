//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the dispatcher.
//! All types derive Serde traits for deserialization from config files.

use std::net::{AddrParseError, IpAddr};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use url::Url;

/// Root configuration for the edge dispatcher.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct DispatchConfig {
    /// Listener configuration (the address clients talk to).
    pub listener: ListenerConfig,

    /// The local development server that serves non-edge traffic.
    pub origin: OriginConfig,

    /// Edge function routing settings.
    pub edge: EdgeConfig,

    /// Sandbox runtime process settings.
    pub runtime: RuntimeConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "127.0.0.1:8888").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8888".to_string(),
        }
    }
}

/// Origin (main development server) configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OriginConfig {
    /// Origin address (e.g., "127.0.0.1:3000").
    pub address: String,
}

impl Default for OriginConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:3000".to_string(),
        }
    }
}

/// A route declared in configuration, bound by name to an edge function.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct FunctionDeclaration {
    /// Name of the function to invoke.
    pub function: String,

    /// Route pattern (e.g., "/api/*" or "/users/:id").
    pub path: String,

    /// Patterns that veto a match of `path`.
    #[serde(default)]
    pub excluded_path: Vec<String>,
}

impl FunctionDeclaration {
    pub fn new(function: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            function: function.into(),
            path: path.into(),
            excluded_path: Vec::new(),
        }
    }
}

/// Edge function configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EdgeConfig {
    /// Directories scanned for user edge functions.
    pub functions_dirs: Vec<PathBuf>,

    /// Directory holding functions bundled with the tool itself.
    pub internal_dir: Option<PathBuf>,

    /// User import map (JSON with an `imports` object).
    pub import_map: Option<PathBuf>,

    /// Route declarations.
    pub declarations: Vec<FunctionDeclaration>,

    /// Host the sandbox listens on.
    pub sandbox_host: String,

    /// Run the sandbox in debug mode.
    pub debug: bool,
}

impl Default for EdgeConfig {
    fn default() -> Self {
        Self {
            functions_dirs: Vec::new(),
            internal_dir: None,
            import_map: None,
            declarations: Vec::new(),
            sandbox_host: "127.0.0.1".to_string(),
            debug: false,
        }
    }
}

impl EdgeConfig {
    /// Parsed `sandbox_host`. The port allocator and the sandbox both bind here.
    pub fn sandbox_ip(&self) -> Result<IpAddr, AddrParseError> {
        self.sandbox_host.parse()
    }
}

/// Sandbox runtime process configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Executable to launch. `{port}` and `{host}` are substituted in `args`.
    pub command: PathBuf,

    /// Arguments passed to the executable.
    pub args: Vec<String>,

    /// Where to fetch the runtime binary from when `install_path` is missing.
    pub download_url: Option<Url>,

    /// Where the downloaded binary is stored. Used as the command when set.
    pub install_path: Option<PathBuf>,

    /// Path of the control endpoint that accepts function bundles.
    pub control_path: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            command: PathBuf::from("deno"),
            args: vec![
                "run".to_string(),
                "--allow-all".to_string(),
                "sandbox.ts".to_string(),
                "--port={port}".to_string(),
            ],
            download_url: None,
            install_path: None,
            control_path: "/_edge/functions".to_string(),
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 60 }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Pretty or JSON output.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
