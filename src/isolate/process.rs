//! Sandbox runtime backed by a child process.
//!
//! # Responsibilities
//! - Download the runtime binary on first use (with progress hooks)
//! - Launch it on the allocated port
//! - Wait until the port accepts connections
//! - Submit function bundles over an HTTP control endpoint
//!
//! # Control protocol
//! ```text
//! POST {control_path}   body: FunctionBundle (JSON)
//!   → 200 {"loaded": ["name", ...],
//!          "errors": [{"function": "name", "kind": "not_a_function" | "import_failure",
//!                      "message": "..."}]}
//! ```

use std::ffi::OsString;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use url::Url;

use crate::config::RuntimeConfig;
use crate::isolate::error::{BootstrapError, ControlError};
use crate::isolate::runtime::{
    BootstrapProgress, ErrorFormatters, FailureKind, FunctionBundle, FunctionFailure,
    IsolateRuntime, IsolateServer, ServeOptions, SubmitReport,
};
use crate::resilience::backoff::Backoff;

/// Launches the sandbox as a child process.
pub struct ProcessRuntime {
    config: RuntimeConfig,
    client: reqwest::Client,
}

impl ProcessRuntime {
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::builder().no_proxy().build().unwrap_or_default(),
        }
    }

    fn program(&self) -> &Path {
        self.config
            .install_path
            .as_deref()
            .unwrap_or(&self.config.command)
    }

    async fn ensure_installed(&self, progress: &dyn BootstrapProgress) -> Result<(), BootstrapError> {
        let (Some(url), Some(path)) = (&self.config.download_url, &self.config.install_path) else {
            return Ok(());
        };
        if tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Ok(());
        }

        progress.before_download();
        let result = self.download(url, path).await;
        progress.after_download();
        result
    }

    async fn download(&self, url: &Url, path: &Path) -> Result<(), BootstrapError> {
        let fail = |e: &dyn std::fmt::Display| BootstrapError::Download(e.to_string());

        tracing::info!(url = %url, path = ?path, "Downloading sandbox runtime");
        let bytes = self
            .client
            .get(url.clone())
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| fail(&e))?
            .bytes()
            .await
            .map_err(|e| fail(&e))?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| fail(&e))?;
        }
        tokio::fs::write(path, &bytes).await.map_err(|e| fail(&e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
                .await
                .map_err(|e| fail(&e))?;
        }
        Ok(())
    }

    fn command(&self, options: &ServeOptions) -> Result<Command, BootstrapError> {
        let port = options.port.to_string();
        let host = options.host.to_string();

        let mut command = Command::new(self.program());
        command
            .args(
                self.config
                    .args
                    .iter()
                    .map(|arg| arg.replace("{port}", &port).replace("{host}", &host)),
            )
            .env("EDGE_FUNCTIONS_DIRS", join_paths(&options.directories)?)
            .env("EDGE_IMPORT_MAPS", join_paths(&options.import_maps)?)
            .env("EDGE_DEBUG", if options.debug { "1" } else { "0" })
            .stdin(Stdio::null())
            .kill_on_drop(true);
        Ok(command)
    }
}

fn join_paths(paths: &[PathBuf]) -> Result<OsString, BootstrapError> {
    std::env::join_paths(paths).map_err(|e| BootstrapError::Spawn(e.to_string()))
}

#[async_trait]
impl IsolateRuntime for ProcessRuntime {
    async fn serve(&self, options: ServeOptions) -> Result<Box<dyn IsolateServer>, BootstrapError> {
        self.ensure_installed(options.progress.as_ref()).await?;

        let mut child = self
            .command(&options)?
            .spawn()
            .map_err(|e| BootstrapError::Spawn(format!("{}: {}", self.program().display(), e)))?;

        let address = SocketAddr::new(options.host, options.port);
        wait_until_ready(&mut child, address).await?;

        let control_url = Url::parse(&format!("http://{}{}", address, self.config.control_path))
            .map_err(|e| BootstrapError::Spawn(e.to_string()))?;

        tokio::spawn(supervise(child));

        Ok(Box::new(ProcessServer::new(
            self.client.clone(),
            control_url,
            options.formatters,
        )))
    }
}

async fn wait_until_ready(child: &mut Child, address: SocketAddr) -> Result<(), BootstrapError> {
    let mut backoff = Backoff::new(Duration::from_millis(25), Duration::from_millis(500));
    loop {
        if let Some(status) = child
            .try_wait()
            .map_err(|e| BootstrapError::Spawn(e.to_string()))?
        {
            return Err(BootstrapError::Exited(status.to_string()));
        }
        if TcpStream::connect(address).await.is_ok() {
            tracing::debug!(address = %address, attempts = backoff.attempts(), "Sandbox accepting connections");
            return Ok(());
        }
        tokio::time::sleep(backoff.next_delay()).await;
    }
}

/// Owns the child for the rest of the process; dropping it kills the sandbox.
async fn supervise(mut child: Child) {
    match child.wait().await {
        Ok(status) => tracing::error!(status = %status, "Edge functions sandbox exited"),
        Err(e) => tracing::error!(error = %e, "Failed to wait on edge functions sandbox"),
    }
}

#[derive(Debug, Deserialize)]
struct ControlResponse {
    #[serde(default)]
    loaded: Vec<String>,
    #[serde(default)]
    errors: Vec<ControlFailure>,
}

#[derive(Debug, Deserialize)]
struct ControlFailure {
    function: String,
    kind: FailureKind,
    #[serde(default)]
    message: String,
}

/// HTTP control channel of a sandbox process.
pub struct ProcessServer {
    client: reqwest::Client,
    control_url: Url,
    formatters: ErrorFormatters,
}

impl ProcessServer {
    pub fn new(client: reqwest::Client, control_url: Url, formatters: ErrorFormatters) -> Self {
        Self {
            client,
            control_url,
            formatters,
        }
    }
}

#[async_trait]
impl IsolateServer for ProcessServer {
    async fn submit(&self, bundle: &FunctionBundle) -> Result<SubmitReport, ControlError> {
        let response = self
            .client
            .post(self.control_url.clone())
            .json(bundle)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ControlError::Status(status.as_u16()));
        }

        let body: ControlResponse = response.json().await?;
        Ok(SubmitReport {
            loaded: body.loaded,
            failures: body
                .errors
                .into_iter()
                .map(|e| FunctionFailure {
                    message: self.formatters.format(&e.function, e.kind, &e.message),
                    function: e.function,
                    kind: e.kind,
                })
                .collect(),
        })
    }
}
