//! Kubeconfig context glue
//!
//! ktm never edits kubeconfig itself; it asks kubectl which context is
//! current and switches it after a batch connect.

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::OrchestratorError;

/// Access to the active kubeconfig context
#[async_trait]
pub trait KubeContext: Send + Sync {
    /// The current context, if one is set
    async fn current(&self) -> Result<Option<String>, OrchestratorError>;

    /// Make `name` the current context
    async fn use_context(&self, name: &str) -> Result<(), OrchestratorError>;
}

/// [`KubeContext`] backed by the kubectl binary
#[derive(Debug, Clone)]
pub struct Kubectl {
    program: String,
}

impl Default for Kubectl {
    fn default() -> Self {
        Self {
            program: "kubectl".to_string(),
        }
    }
}

impl Kubectl {
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    async fn run(&self, args: &[&str]) -> Result<std::process::Output, OrchestratorError> {
        Command::new(&self.program)
            .args(args)
            .output()
            .await
            .map_err(|e| OrchestratorError::Kubectl(format!("failed to run {}: {}", self.program, e)))
    }
}

#[async_trait]
impl KubeContext for Kubectl {
    async fn current(&self) -> Result<Option<String>, OrchestratorError> {
        let output = self.run(&["config", "current-context"]).await?;
        if !output.status.success() {
            // kubectl exits non-zero when no current context is set
            tracing::debug!(
                "kubectl current-context failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
            return Ok(None);
        }
        let name = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok((!name.is_empty()).then_some(name))
    }

    async fn use_context(&self, name: &str) -> Result<(), OrchestratorError> {
        let output = self.run(&["config", "use-context", name]).await?;
        if !output.status.success() {
            return Err(OrchestratorError::Kubectl(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        tracing::info!("Switched kubeconfig context to {}", name);
        Ok(())
    }
}
