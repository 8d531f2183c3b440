// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Error types shared across the Hive crate.
//!
//! Each subsystem owns a strongly-typed error defined with `thiserror`
//! (see [`crate::port::PortError`], [`crate::agent::AgentError`], ...).
//! The errors here cover the cross-cutting concerns: configuration and
//! state persistence. `anyhow` is used for propagation at the binary edge.

use thiserror::Error;

/// Errors that can occur during configuration loading.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(String),

    #[error("Invalid config format: {0}")]
    InvalidFormat(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("IO error reading config: {0}")]
    IoError(String),

    #[error("YAML parsing error: {0}")]
    YamlError(String),

    #[error("JSON parsing error: {0}")]
    JsonError(String),
}

impl ConfigError {
    /// Create an invalid value error.
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(err.to_string()),
            _ => Self::IoError(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        Self::JsonError(err.to_string())
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::YamlError(err.to_string())
    }
}

/// Errors that can occur while persisting or restoring hub state.
#[derive(Error, Debug)]
pub enum StateError {
    #[error("Failed to create state directory: {0}")]
    CreateDir(String),

    #[error("Failed to write state file: {0}")]
    Write(String),

    #[error("Failed to read state file: {0}")]
    Read(String),

    #[error("State file corrupted: {0}")]
    Corrupted(String),

    #[error("Unsupported state version: {0}")]
    UnsupportedVersion(u32),
}

impl From<serde_json::Error> for StateError {
    fn from(err: serde_json::Error) -> Self {
        Self::Corrupted(err.to_string())
    }
}

/// Result type alias using anyhow for flexible error handling.
pub type Result<T> = anyhow::Result<T>;

/// Convert any error type that implements std::error::Error to an anyhow::Error.
pub fn to_anyhow<E: std::error::Error + Send + Sync + 'static>(err: E) -> anyhow::Error {
    anyhow::Error::new(err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_from_json() {
        let result: std::result::Result<serde_json::Value, _> = serde_json::from_str("invalid json");
        let json_err = result.unwrap_err();
        let config_err: ConfigError = json_err.into();
        assert!(matches!(config_err, ConfigError::JsonError(_)));
    }

    #[test]
    fn test_config_error_from_io_not_found() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let config_err: ConfigError = io_err.into();
        assert!(matches!(config_err, ConfigError::NotFound(_)));
    }

    #[test]
    fn test_config_error_invalid_display() {
        let err = ConfigError::invalid("port", "must be non-zero");
        let display = format!("{}", err);
        assert!(display.contains("port"));
        assert!(display.contains("must be non-zero"));
    }

    #[test]
    fn test_state_error_from_json() {
        let result: std::result::Result<serde_json::Value, _> = serde_json::from_str("{");
        let state_err: StateError = result.unwrap_err().into();
        assert!(matches!(state_err, StateError::Corrupted(_)));
    }

    #[test]
    fn test_to_anyhow() {
        let err = to_anyhow(StateError::UnsupportedVersion(7));
        assert!(err.to_string().contains('7'));
    }
}
