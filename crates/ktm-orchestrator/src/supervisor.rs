//! Tunnel supervision
//!
//! The supervisor owns the lifecycle of individual tunnels: it allocates a
//! port, asks the transport for a forward, persists the record, and later
//! terminates the process and removes the record.
//!
//! # Locking
//!
//! `open` and `close` hold the store's per-context lock for their whole
//! duration. `open` additionally holds an in-process allocation mutex and
//! the cross-process state lock from port allocation until the record is
//! persisted, so two invocations can never hand out the same port.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use ktm_core::allocator::PortAllocator;
use ktm_core::error::{StoreError, TunnelError};
use ktm_core::store::TunnelStore;
use ktm_core::time::current_time_secs;
use ktm_core::traits::{ForwardSpec, ProcessControl, Transport};
use ktm_core::types::{ClusterDescriptor, NetworkRecord, ProcessHandle, TunnelRecord};

/// Default remote API server port
pub const DEFAULT_API_PORT: u16 = 6443;

/// Default time a tunnel gets to exit after SIGTERM
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(3);

/// How long to wait for the process to disappear after SIGKILL
const KILL_WAIT: Duration = Duration::from_secs(1);

/// Interval between liveness checks while waiting for exit
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Extra inputs to [`TunnelSupervisor::open_with`]
#[derive(Debug, Clone, Default)]
pub struct OpenOptions {
    /// Ports reserved by the caller that are not yet recorded in the store
    pub excluding: HashSet<u16>,
    /// When the network requirement was last seen satisfied
    pub network_satisfied_at: Option<u64>,
}

/// What `close` did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    /// There was no live tunnel for the context
    NotRunning,
    /// The process exited after SIGTERM
    Terminated { pid: u32 },
    /// The process needed SIGKILL
    Killed { pid: u32 },
}

/// Result of closing one context during `close_all`
#[derive(Debug)]
pub struct ClosedTunnel {
    pub context: String,
    pub outcome: Result<CloseOutcome, TunnelError>,
}

/// Creates, checks and terminates tunnels
pub struct TunnelSupervisor {
    store: Arc<TunnelStore>,
    transport: Arc<dyn Transport>,
    processes: Arc<dyn ProcessControl>,
    allocator: PortAllocator,
    default_api_port: u16,
    grace_period: Duration,
    alloc_lock: Mutex<()>,
}

impl TunnelSupervisor {
    pub fn new(
        store: Arc<TunnelStore>,
        transport: Arc<dyn Transport>,
        processes: Arc<dyn ProcessControl>,
        allocator: PortAllocator,
    ) -> Self {
        Self {
            store,
            transport,
            processes,
            allocator,
            default_api_port: DEFAULT_API_PORT,
            grace_period: DEFAULT_GRACE_PERIOD,
            alloc_lock: Mutex::new(()),
        }
    }

    /// Remote API port used when a cluster does not set one
    pub fn with_default_api_port(mut self, port: u16) -> Self {
        self.default_api_port = port;
        self
    }

    /// Time between SIGTERM and SIGKILL
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    pub fn store(&self) -> &Arc<TunnelStore> {
        &self.store
    }

    /// Open a tunnel for `context`, or return the live one
    pub async fn open(
        &self,
        context: &str,
        cluster: &ClusterDescriptor,
    ) -> Result<TunnelRecord, TunnelError> {
        self.open_with(context, cluster, &OpenOptions::default()).await
    }

    /// Open a tunnel for `context` with caller-reserved ports excluded
    pub async fn open_with(
        &self,
        context: &str,
        cluster: &ClusterDescriptor,
        options: &OpenOptions,
    ) -> Result<TunnelRecord, TunnelError> {
        let _context_guard = self.store.context_lock(context).await;

        if let Some(live) = self.live_record(context).await? {
            tracing::debug!(
                "Tunnel for {} already live on port {} (pid {})",
                context,
                live.local_port,
                live.handle
            );
            return Ok(live);
        }

        let _alloc_guard = self.alloc_lock.lock().await;
        let _state_lock = self.store.lock_state().await?;

        // Another invocation may have opened it while we waited for the lock
        if let Some(live) = self.live_record(context).await? {
            return Ok(live);
        }

        let in_use = self.store.live_ports().await?;
        let port = self.allocator.allocate(&in_use, &options.excluding)?;
        let spec = ForwardSpec {
            ssh_host: cluster.ssh_host().to_string(),
            local_port: port,
            remote_host: cluster.remote_addr.clone(),
            remote_port: cluster.api_port_or(self.default_api_port),
        };

        tracing::info!(
            "Opening tunnel for {}: 127.0.0.1:{} -> {} via {}",
            context,
            port,
            spec.remote_addr(),
            spec.ssh_host
        );
        let handle = self.transport.open(context, &spec).await.map_err(|e| {
            tracing::warn!("Tunnel for {} failed: {}", context, e);
            TunnelError::EstablishFailed(e)
        })?;

        let record = TunnelRecord {
            context_name: context.to_string(),
            local_port: port,
            remote_addr: spec.remote_addr(),
            ssh_host: spec.ssh_host,
            handle,
            created_at: current_time_secs(),
        };
        let network = NetworkRecord {
            requirement: cluster.network.clone(),
            satisfied_last_checked_at: options.network_satisfied_at,
        };

        if let Err(e) = self.store.put(&record, &network).await {
            tracing::error!("Failed to persist tunnel for {}, killing pid {}: {}", context, handle, e);
            if let Err(kill_err) = self.processes.kill(handle) {
                tracing::error!(
                    "Could not kill unrecorded tunnel process {} for {}: {}",
                    handle,
                    context,
                    kill_err
                );
                return Err(TunnelError::TerminationFailed {
                    context: context.to_string(),
                    pid: handle.pid(),
                });
            }
            return Err(e.into());
        }

        Ok(record)
    }

    /// Live record for a context; clears stale or malformed entries.
    /// Caller holds the context lock.
    async fn live_record(&self, context: &str) -> Result<Option<TunnelRecord>, TunnelError> {
        match self.store.read(context).await {
            Ok(Some(stored)) if self.processes.is_alive(stored.tunnel.handle) => {
                Ok(Some(stored.tunnel))
            }
            Ok(Some(stored)) => {
                tracing::info!(
                    "Discarding stale tunnel record for {} (pid {} is gone)",
                    context,
                    stored.tunnel.handle
                );
                self.store.remove(context).await?;
                Ok(None)
            }
            Ok(None) => Ok(None),
            Err(StoreError::Malformed { path, reason }) => {
                tracing::warn!("Discarding malformed tunnel record {:?}: {}", path, reason);
                self.store.remove(context).await?;
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Terminate a context's tunnel and remove its record
    ///
    /// Sends SIGTERM, waits up to the grace period, then SIGKILL. The
    /// record is removed even when the process cannot be killed; that case
    /// returns [`TunnelError::TerminationFailed`].
    pub async fn close(&self, context: &str) -> Result<CloseOutcome, TunnelError> {
        let _context_guard = self.store.context_lock(context).await;

        let stored = match self.store.read(context).await {
            Ok(Some(stored)) => stored,
            Ok(None) => {
                // Clear an orphaned network record if one is left
                self.store.remove(context).await?;
                return Ok(CloseOutcome::NotRunning);
            }
            Err(StoreError::Malformed { path, reason }) => {
                tracing::warn!("Removing malformed tunnel record {:?}: {}", path, reason);
                self.store.remove(context).await?;
                return Ok(CloseOutcome::NotRunning);
            }
            Err(e) => return Err(e.into()),
        };

        let handle = stored.tunnel.handle;
        if !self.processes.is_alive(handle) {
            self.store.remove(context).await?;
            return Ok(CloseOutcome::NotRunning);
        }

        let outcome = self.terminate(context, handle).await;
        self.store.remove(context).await?;
        if outcome.is_ok() {
            tracing::info!("Closed tunnel for {} (pid {})", context, handle);
        }
        outcome
    }

    async fn terminate(&self, context: &str, handle: ProcessHandle) -> Result<CloseOutcome, TunnelError> {
        if let Err(e) = self.processes.terminate(handle) {
            tracing::warn!("SIGTERM to pid {} failed: {}", handle, e);
        }
        if self.wait_for_exit(handle, self.grace_period).await {
            return Ok(CloseOutcome::Terminated { pid: handle.pid() });
        }

        tracing::warn!(
            "Tunnel for {} (pid {}) ignored SIGTERM for {:?}, sending SIGKILL",
            context,
            handle,
            self.grace_period
        );
        if let Err(e) = self.processes.kill(handle) {
            tracing::warn!("SIGKILL to pid {} failed: {}", handle, e);
        }
        if self.wait_for_exit(handle, KILL_WAIT).await {
            return Ok(CloseOutcome::Killed { pid: handle.pid() });
        }

        tracing::error!("Tunnel for {} (pid {}) survived SIGKILL", context, handle);
        Err(TunnelError::TerminationFailed {
            context: context.to_string(),
            pid: handle.pid(),
        })
    }

    async fn wait_for_exit(&self, handle: ProcessHandle, limit: Duration) -> bool {
        let deadline = Instant::now() + limit;
        loop {
            if !self.processes.is_alive(handle) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(EXIT_POLL_INTERVAL).await;
        }
    }

    /// Close every context in the store, malformed entries included
    pub async fn close_all(&self) -> Result<Vec<ClosedTunnel>, TunnelError> {
        let mut closed = Vec::new();
        for context in self.store.contexts().await? {
            let outcome = self.close(&context).await;
            closed.push(ClosedTunnel { context, outcome });
        }
        Ok(closed)
    }

    /// Whether a live tunnel exists for `context`
    pub async fn is_alive(&self, context: &str) -> Result<bool, TunnelError> {
        match self.store.get(context).await {
            Ok(stored) => Ok(stored.is_some()),
            Err(StoreError::Malformed { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// All live tunnels, sorted by context
    pub async fn list_live(&self) -> Result<Vec<TunnelRecord>, TunnelError> {
        Ok(self
            .store
            .list_all()
            .await?
            .into_iter()
            .map(|stored| stored.tunnel)
            .collect())
    }
}
