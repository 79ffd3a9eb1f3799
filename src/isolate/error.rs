//! Isolate error types.

use thiserror::Error;

/// Why the sandbox could not be started.
///
/// Cloneable so a single cached failure can be handed to every waiter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BootstrapError {
    #[error("failed to allocate a port for the sandbox: {0}")]
    PortAllocation(String),
    #[error("failed to download the sandbox runtime: {0}")]
    Download(String),
    #[error("failed to launch the sandbox runtime: {0}")]
    Spawn(String),
    #[error("sandbox runtime exited during startup ({0})")]
    Exited(String),
    #[error("sandbox startup task failed: {0}")]
    Crashed(String),
}

/// Failure on the control channel used to submit function bundles.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("control request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("sandbox rejected the function bundle with status {0}")]
    Status(u16),
    #[error("control channel closed: {0}")]
    Closed(String),
}
