//! Core error types for ktm

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors raised while allocating, opening or closing a tunnel
#[derive(Error, Debug)]
pub enum TunnelError {
    /// Every port in the configured range is taken
    #[error("No free local port in range {start}..={end}")]
    RangeExhausted { start: u16, end: u16 },

    /// The configured port range cannot hold a single port
    #[error("Invalid port range: {0}")]
    InvalidPortRange(String),

    /// The transport could not establish the forward
    #[error("Tunnel establishment failed: {0}")]
    EstablishFailed(#[from] TransportError),

    /// The tunnel process survived SIGKILL
    #[error("Tunnel process {pid} for '{context}' could not be terminated; kill it manually")]
    TerminationFailed { context: String, pid: u32 },

    /// Persisting or reading the tunnel record failed
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Failures reported by a transport while opening a forward
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The forward was not confirmed before the connect timeout
    #[error("Timed out after {0:?} waiting for the forward")]
    Timeout(Duration),

    /// The remote host rejected our credentials
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The remote host could not be reached
    #[error("Host unreachable: {0}")]
    Unreachable(String),

    /// The transport process exited before the forward came up
    #[error("Transport exited ({}): {detail}", describe_exit(.code))]
    Exited { code: Option<i32>, detail: String },

    /// The transport process could not be started
    #[error("Failed to start transport: {0}")]
    Spawn(String),
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => code.to_string(),
        None => "signal".to_string(),
    }
}

/// Tunnel store errors
#[derive(Error, Debug)]
pub enum StoreError {
    /// A persisted entry could not be decoded
    #[error("Malformed entry {path:?}: {reason}")]
    Malformed { path: PathBuf, reason: String },

    /// A context name that cannot be used as a store key
    #[error("Invalid context name: {0:?}")]
    InvalidContextName(String),

    /// The cross-process state lock could not be taken
    #[error("Failed to lock state directory: {0}")]
    Lock(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// A cluster id that is not in the configuration
    #[error("Unknown cluster: {0}")]
    UnknownCluster(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exited_display_with_and_without_code() {
        let err = TransportError::Exited {
            code: Some(255),
            detail: "bad".to_string(),
        };
        assert_eq!(err.to_string(), "Transport exited (255): bad");

        let err = TransportError::Exited {
            code: None,
            detail: "killed".to_string(),
        };
        assert_eq!(err.to_string(), "Transport exited (signal): killed");
    }

    #[test]
    fn test_range_exhausted_display() {
        let err = TunnelError::RangeExhausted {
            start: 16443,
            end: 16444,
        };
        assert!(err.to_string().contains("16443..=16444"));
    }
}
