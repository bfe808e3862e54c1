//! Point-in-time tunnel status
//!
//! Snapshots are composed from the reconciled store listing plus a fresh
//! network check per tunnel. Building one never writes state beyond the
//! store's own stale-record cleanup.

use std::sync::Arc;

use serde::Serialize;

use ktm_core::error::StoreError;
use ktm_core::network::{NetworkStatus, NetworkValidator};
use ktm_core::store::TunnelStore;

/// Status of one live tunnel
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusEntry {
    pub context_name: String,
    pub live: bool,
    pub local_port: u16,
    pub pid: u32,
    pub remote_addr: String,
    pub ssh_host: String,
    pub created_at: u64,
    pub network: NetworkStatus,
}

/// Aggregate status view
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub entries: Vec<StatusEntry>,
    pub active_context: Option<String>,
    pub warnings: Vec<String>,
}

impl StatusReport {
    /// Entry for a context, if its tunnel is live
    pub fn entry(&self, context: &str) -> Option<&StatusEntry> {
        self.entries.iter().find(|e| e.context_name == context)
    }

    /// Whether the active context has a live tunnel
    pub fn active_is_live(&self) -> bool {
        self.active_context
            .as_deref()
            .map(|ctx| self.entry(ctx).is_some())
            .unwrap_or(false)
    }
}

/// Builds status reports
pub struct StatusReporter {
    store: Arc<TunnelStore>,
    validator: NetworkValidator,
}

impl StatusReporter {
    pub fn new(store: Arc<TunnelStore>, validator: NetworkValidator) -> Self {
        Self { store, validator }
    }

    /// Live tunnels with their current network status
    pub async fn snapshot(&self) -> Result<Vec<StatusEntry>, StoreError> {
        let mut entries = Vec::new();
        for stored in self.store.list_all().await? {
            let network = match &stored.network {
                Some(record) => self.validator.status(&record.requirement).await,
                None => NetworkStatus::Unknown,
            };
            let tunnel = stored.tunnel;
            entries.push(StatusEntry {
                context_name: tunnel.context_name,
                live: true,
                local_port: tunnel.local_port,
                pid: tunnel.handle.pid(),
                remote_addr: tunnel.remote_addr,
                ssh_host: tunnel.ssh_host,
                created_at: tunnel.created_at,
                network,
            });
        }
        Ok(entries)
    }

    /// Snapshot cross-checked against the active context
    ///
    /// An active context without a live tunnel is reported as a warning,
    /// never corrected.
    pub async fn report(&self, active_context: Option<&str>) -> Result<StatusReport, StoreError> {
        let entries = self.snapshot().await?;
        let mut warnings = Vec::new();

        if let Some(active) = active_context {
            if !entries.iter().any(|e| e.context_name == active) {
                warnings.push(format!("Active context '{}' has no live tunnel", active));
            }
        }
        for entry in &entries {
            if let NetworkStatus::Unsatisfied { reason, .. } = &entry.network {
                warnings.push(format!("{}: {}", entry.context_name, reason));
            }
        }

        Ok(StatusReport {
            entries,
            active_context: active_context.map(str::to_string),
            warnings,
        })
    }
}
