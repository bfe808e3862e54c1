//! Wiring of the tunnel manager components

use std::sync::Arc;

use ktm_core::allocator::PortAllocator;
use ktm_core::config::ConfigFile;
use ktm_core::network::{NetworkValidator, SystemProbe};
use ktm_core::process::SystemProcesses;
use ktm_core::store::TunnelStore;
use ktm_core::traits::{NetworkProbe, ProcessControl, Transport};

use crate::batch::BatchOrchestrator;
use crate::error::OrchestratorError;
use crate::ssh::SshTransport;
use crate::status::StatusReporter;
use crate::supervisor::TunnelSupervisor;

/// Shared components for one ktm invocation
pub struct ManagerState {
    pub store: Arc<TunnelStore>,
    pub supervisor: Arc<TunnelSupervisor>,
    pub validator: NetworkValidator,
    pub batch: BatchOrchestrator,
    pub status: StatusReporter,
}

impl ManagerState {
    /// Build the real components from configuration
    pub fn from_config(config: &ConfigFile) -> Result<Self, OrchestratorError> {
        config.validate()?;

        let processes: Arc<dyn ProcessControl> = Arc::new(SystemProcesses);
        let store = Arc::new(TunnelStore::new(config.tunnels.state_dir(), processes.clone()));
        let transport: Arc<dyn Transport> = Arc::new(SshTransport::new(
            store.logs_dir(),
            config.tunnels.connect_timeout,
        ));
        let probe: Arc<dyn NetworkProbe> = Arc::new(SystemProbe::new(
            config.network.vpn_probe_address.clone(),
            config.network.vpn_interface_prefixes.clone(),
            config.network.probe_timeout,
        ));

        let allocator = PortAllocator::new(config.tunnels.port_range()?)
            .with_local_probe(config.tunnels.probe_local_ports);

        tracing::debug!(
            "Tunnel state in {:?}, ports {}..={}",
            store.dir(),
            allocator.range().start(),
            allocator.range().end()
        );

        let supervisor = TunnelSupervisor::new(store.clone(), transport, processes, allocator)
            .with_default_api_port(config.tunnels.api_port)
            .with_grace_period(config.tunnels.termination_grace);

        Ok(Self::assemble(store, supervisor, NetworkValidator::new(probe)))
    }

    /// Assemble state from pre-built parts
    pub fn assemble(
        store: Arc<TunnelStore>,
        supervisor: TunnelSupervisor,
        validator: NetworkValidator,
    ) -> Self {
        let supervisor = Arc::new(supervisor);
        Self {
            batch: BatchOrchestrator::new(supervisor.clone(), validator.clone()),
            status: StatusReporter::new(store.clone(), validator.clone()),
            store,
            supervisor,
            validator,
        }
    }
}
