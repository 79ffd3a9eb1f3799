//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate addresses and hosts
//! - Check function names are usable as header values
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Route patterns are not rejected here; the registry treats a malformed
//!   pattern as a declaration that never matches

use std::net::{IpAddr, SocketAddr};

use thiserror::Error;

use crate::config::schema::DispatchConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field}: invalid socket address {value:?}")]
    InvalidAddress { field: &'static str, value: String },
    #[error("edge.sandbox_host: invalid IP address {0:?}")]
    InvalidSandboxHost(String),
    #[error("edge.declarations[{index}]: invalid function name {name:?}")]
    InvalidFunctionName { index: usize, name: String },
    #[error("runtime.command must not be empty")]
    EmptyCommand,
    #[error("runtime.control_path must start with '/'")]
    InvalidControlPath,
}

/// Function names travel in a comma-separated header, so they are restricted
/// to a conservative character set.
pub fn is_valid_function_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
}

/// Validate a parsed configuration.
pub fn validate_config(config: &DispatchConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    for (field, value) in [
        ("listener.bind_address", &config.listener.bind_address),
        ("origin.address", &config.origin.address),
    ] {
        if value.parse::<SocketAddr>().is_err() {
            errors.push(ValidationError::InvalidAddress {
                field,
                value: value.clone(),
            });
        }
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidAddress {
            field: "observability.metrics_address",
            value: config.observability.metrics_address.clone(),
        });
    }

    if config.edge.sandbox_host.parse::<IpAddr>().is_err() {
        errors.push(ValidationError::InvalidSandboxHost(
            config.edge.sandbox_host.clone(),
        ));
    }

    for (index, declaration) in config.edge.declarations.iter().enumerate() {
        if !is_valid_function_name(&declaration.function) {
            errors.push(ValidationError::InvalidFunctionName {
                index,
                name: declaration.function.clone(),
            });
        }
    }

    if config.runtime.command.as_os_str().is_empty() && config.runtime.install_path.is_none() {
        errors.push(ValidationError::EmptyCommand);
    }

    if !config.runtime.control_path.starts_with('/') {
        errors.push(ValidationError::InvalidControlPath);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
