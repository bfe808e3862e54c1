//! Multi-cluster connect
//!
//! Clusters are connected one at a time in the order the caller gave them.
//! A failing cluster is recorded and the batch moves on; the first success
//! in selection order becomes the active context.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use ktm_core::network::{NetworkValidator, Unsatisfied, Validation};
use ktm_core::time::current_time_secs;
use ktm_core::types::{ClusterDescriptor, TunnelRecord};

use crate::error::OrchestratorError;
use crate::supervisor::{OpenOptions, TunnelSupervisor};

/// An unmet network requirement noticed while connecting
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkWarning {
    pub context_name: String,
    pub reason: String,
    pub hint: Option<String>,
}

/// Outcome for one cluster of a batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum ConnectionOutcome {
    Success(TunnelRecord),
    Failed(String),
}

/// Per-cluster entry of a batch report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionResult {
    pub context_name: String,
    /// Cluster id (`group:host`)
    pub cluster: String,
    pub outcome: ConnectionOutcome,
    pub warnings: Vec<NetworkWarning>,
}

impl ConnectionResult {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, ConnectionOutcome::Success(_))
    }

    pub fn tunnel(&self) -> Option<&TunnelRecord> {
        match &self.outcome {
            ConnectionOutcome::Success(record) => Some(record),
            ConnectionOutcome::Failed(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&str> {
        match &self.outcome {
            ConnectionOutcome::Success(_) => None,
            ConnectionOutcome::Failed(reason) => Some(reason),
        }
    }
}

/// Result of a batch connect
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    /// Number of clusters selected
    pub requested: usize,
    /// One entry per attempted cluster, in selection order
    pub results: Vec<ConnectionResult>,
    /// Context of the first successful cluster
    pub active_context: Option<String>,
    /// The batch stopped before attempting every cluster
    pub cancelled: bool,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }

    /// `(context, reason)` for every failed cluster
    pub fn failures(&self) -> impl Iterator<Item = (&str, &str)> {
        self.results
            .iter()
            .filter_map(|r| r.failure().map(|reason| (r.context_name.as_str(), reason)))
    }

    /// Every network warning, in selection order
    pub fn warnings(&self) -> impl Iterator<Item = &NetworkWarning> {
        self.results.iter().flat_map(|r| r.warnings.iter())
    }

    /// Distinct hints for unresolved network requirements
    pub fn unresolved_hints(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.warnings()
            .filter_map(|w| w.hint.clone())
            .filter(|hint| seen.insert(hint.clone()))
            .collect()
    }

    /// Every selected cluster was attempted and connected
    pub fn is_complete_success(&self) -> bool {
        !self.cancelled && self.results.len() == self.requested && self.failed() == 0
    }

    /// Clusters were selected but none connected
    pub fn is_total_failure(&self) -> bool {
        self.requested > 0 && self.succeeded() == 0
    }
}

/// Connects sets of clusters
pub struct BatchOrchestrator {
    supervisor: Arc<TunnelSupervisor>,
    validator: NetworkValidator,
}

impl BatchOrchestrator {
    pub fn new(supervisor: Arc<TunnelSupervisor>, validator: NetworkValidator) -> Self {
        Self {
            supervisor,
            validator,
        }
    }

    /// Connect every selected cluster in order
    pub async fn connect_batch(&self, selected: &[ClusterDescriptor]) -> BatchReport {
        self.connect_batch_with_cancel(selected, &CancellationToken::new())
            .await
    }

    /// Connect selected clusters in order, stopping between clusters once
    /// `cancel` fires
    ///
    /// Tunnels opened before cancellation stay open.
    pub async fn connect_batch_with_cancel(
        &self,
        selected: &[ClusterDescriptor],
        cancel: &CancellationToken,
    ) -> BatchReport {
        let mut results = Vec::with_capacity(selected.len());
        let mut reserved = HashSet::new();
        let mut cancelled = false;

        for (index, cluster) in selected.iter().enumerate() {
            if cancel.is_cancelled() {
                tracing::warn!(
                    "Batch cancelled after {} of {} clusters",
                    index,
                    selected.len()
                );
                cancelled = true;
                break;
            }

            let result = self.connect_in_batch(cluster, &reserved).await;
            if let Some(tunnel) = result.tunnel() {
                reserved.insert(tunnel.local_port);
            }
            results.push(result);
        }

        let active_context = results
            .iter()
            .find(|r| r.is_success())
            .map(|r| r.context_name.clone());

        BatchReport {
            requested: selected.len(),
            results,
            active_context,
            cancelled,
        }
    }

    async fn connect_in_batch(
        &self,
        cluster: &ClusterDescriptor,
        reserved: &HashSet<u16>,
    ) -> ConnectionResult {
        let context = cluster.context_name();
        let mut warnings = Vec::new();

        let network_satisfied_at = match self.validator.check(&cluster.network).await {
            Validation::Satisfied if cluster.network.is_none() => None,
            Validation::Satisfied => Some(current_time_secs()),
            Validation::Unsatisfied(unsatisfied) => {
                tracing::warn!("{}: {}", context, unsatisfied.reason);
                warnings.push(NetworkWarning {
                    context_name: context.clone(),
                    reason: unsatisfied.reason,
                    hint: unsatisfied.hint,
                });
                None
            }
        };

        let options = OpenOptions {
            excluding: reserved.clone(),
            network_satisfied_at,
        };
        let outcome = match self.supervisor.open_with(&context, cluster, &options).await {
            Ok(record) => ConnectionOutcome::Success(record),
            Err(e) => {
                tracing::warn!("Failed to connect {}: {}", context, e);
                ConnectionOutcome::Failed(e.to_string())
            }
        };

        ConnectionResult {
            context_name: context,
            cluster: cluster.id.to_string(),
            outcome,
            warnings,
        }
    }

    /// Connect a single cluster
    ///
    /// When the network requirement is unmet, `confirm` decides whether to
    /// go ahead; declining returns [`OrchestratorError::Aborted`] before any
    /// tunnel is created.
    pub async fn connect_one<F>(
        &self,
        cluster: &ClusterDescriptor,
        confirm: F,
    ) -> Result<TunnelRecord, OrchestratorError>
    where
        F: FnOnce(&Unsatisfied) -> bool,
    {
        let context = cluster.context_name();
        let network_satisfied_at = match self.validator.check(&cluster.network).await {
            Validation::Satisfied if cluster.network.is_none() => None,
            Validation::Satisfied => Some(current_time_secs()),
            Validation::Unsatisfied(unsatisfied) => {
                if !confirm(&unsatisfied) {
                    return Err(OrchestratorError::Aborted(unsatisfied.reason));
                }
                tracing::info!("Continuing {} despite: {}", context, unsatisfied.reason);
                None
            }
        };

        let options = OpenOptions {
            excluding: HashSet::new(),
            network_satisfied_at,
        };
        Ok(self.supervisor.open_with(&context, cluster, &options).await?)
    }
}
