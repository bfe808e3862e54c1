//! Orchestrator error types

use thiserror::Error;

use ktm_core::error::{ConfigError, StoreError, TunnelError};

/// Errors surfaced by orchestrator operations
#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// The caller declined to continue past an unsatisfied network check
    #[error("Aborted: {0}")]
    Aborted(String),

    /// A kubectl invocation failed
    #[error("kubectl: {0}")]
    Kubectl(String),

    #[error(transparent)]
    Tunnel(#[from] TunnelError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
