//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::DispatchConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<DispatchConfig, ConfigError> {
    let config: DispatchConfig = toml::from_str(content)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<DispatchConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config(&content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_declarations() {
        let config = parse_config(
            r#"
            [origin]
            address = "127.0.0.1:3000"

            [edge]
            functions_dirs = ["netlify/edge-functions"]

            [[edge.declarations]]
            function = "auth"
            path = "/api/*"
            excluded_path = ["/api/public/*"]

            [[edge.declarations]]
            function = "geo"
            path = "/"
            "#,
        )
        .unwrap();

        assert_eq!(config.edge.declarations.len(), 2);
        assert_eq!(config.edge.declarations[0].function, "auth");
        assert_eq!(config.edge.declarations[0].excluded_path, vec!["/api/public/*"]);
        assert!(config.edge.declarations[1].excluded_path.is_empty());
        assert_eq!(config.edge.sandbox_host, "127.0.0.1");
        assert_eq!(config.listener.bind_address, "127.0.0.1:8888");
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = parse_config("").unwrap();
        assert!(config.edge.declarations.is_empty());
        assert_eq!(config.runtime.control_path, "/_edge/functions");
    }

    #[test]
    fn test_validation_errors_surface() {
        let err = parse_config(
            r#"
            [origin]
            address = "not an address"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Validation(ref errors) if errors.len() == 1));
        assert!(err.to_string().contains("origin.address"));
    }

    #[test]
    fn test_syntax_error() {
        let err = parse_config("[edge").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
