//! Test doubles shared by the orchestrator integration tests

#![allow(dead_code)]

use std::collections::HashSet;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use ktm_core::allocator::{PortAllocator, PortRange};
use ktm_core::error::TransportError;
use ktm_core::network::NetworkValidator;
use ktm_core::store::TunnelStore;
use ktm_core::traits::{ForwardSpec, NetworkProbe, ProcessControl, Transport};
use ktm_core::types::{ClusterDescriptor, NetworkRequirement, ProcessHandle};
use ktm_orchestrator::{ManagerState, TunnelSupervisor};

pub const RANGE_START: u16 = 20000;

/// Process table that only exists in memory
#[derive(Default)]
pub struct FakeProcesses {
    alive: Mutex<HashSet<u32>>,
    ignores_sigterm: Mutex<HashSet<u32>>,
    unkillable: Mutex<HashSet<u32>>,
    signals_denied: Mutex<HashSet<u32>>,
}

impl FakeProcesses {
    pub fn spawn(&self, pid: u32) {
        self.alive.lock().unwrap().insert(pid);
    }

    /// Simulate the process dying on its own
    pub fn die(&self, pid: u32) {
        self.alive.lock().unwrap().remove(&pid);
    }

    pub fn ignore_sigterm(&self, pid: u32) {
        self.ignores_sigterm.lock().unwrap().insert(pid);
    }

    pub fn make_unkillable(&self, pid: u32) {
        self.ignore_sigterm(pid);
        self.unkillable.lock().unwrap().insert(pid);
    }

    /// Make every signal to `pid` fail with a permission error
    pub fn deny_signals(&self, pid: u32) {
        self.make_unkillable(pid);
        self.signals_denied.lock().unwrap().insert(pid);
    }

    pub fn is_running(&self, pid: u32) -> bool {
        self.alive.lock().unwrap().contains(&pid)
    }

    pub fn running(&self) -> usize {
        self.alive.lock().unwrap().len()
    }
}

impl FakeProcesses {
    fn check_permission(&self, pid: u32) -> io::Result<()> {
        if self.signals_denied.lock().unwrap().contains(&pid) {
            return Err(io::Error::from(io::ErrorKind::PermissionDenied));
        }
        Ok(())
    }
}

impl ProcessControl for FakeProcesses {
    fn is_alive(&self, handle: ProcessHandle) -> bool {
        self.alive.lock().unwrap().contains(&handle.pid())
    }

    fn terminate(&self, handle: ProcessHandle) -> io::Result<()> {
        self.check_permission(handle.pid())?;
        if !self.ignores_sigterm.lock().unwrap().contains(&handle.pid()) {
            self.die(handle.pid());
        }
        Ok(())
    }

    fn kill(&self, handle: ProcessHandle) -> io::Result<()> {
        self.check_permission(handle.pid())?;
        if !self.unkillable.lock().unwrap().contains(&handle.pid()) {
            self.die(handle.pid());
        }
        Ok(())
    }
}

/// Transport that "spawns" processes in a [`FakeProcesses`] table
pub struct FakeTransport {
    processes: Arc<FakeProcesses>,
    next_pid: AtomicU32,
    failing_hosts: Mutex<HashSet<String>>,
    opened: Mutex<Vec<(String, ForwardSpec)>>,
    cancel_on_open: Mutex<Option<CancellationToken>>,
}

impl FakeTransport {
    pub fn new(processes: Arc<FakeProcesses>) -> Self {
        Self {
            processes,
            next_pid: AtomicU32::new(1000),
            failing_hosts: Mutex::new(HashSet::new()),
            opened: Mutex::new(Vec::new()),
            cancel_on_open: Mutex::new(None),
        }
    }

    pub fn fail_host(&self, host: &str) {
        self.failing_hosts.lock().unwrap().insert(host.to_string());
    }

    /// Cancel `token` during the next successful open
    pub fn cancel_on_open(&self, token: CancellationToken) {
        *self.cancel_on_open.lock().unwrap() = Some(token);
    }

    pub fn opened(&self) -> Vec<(String, ForwardSpec)> {
        self.opened.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn open(&self, context: &str, spec: &ForwardSpec) -> Result<ProcessHandle, TransportError> {
        self.opened
            .lock()
            .unwrap()
            .push((context.to_string(), spec.clone()));

        if self.failing_hosts.lock().unwrap().contains(&spec.ssh_host) {
            return Err(TransportError::Unreachable(format!(
                "ssh: connect to host {} port 22: Connection refused",
                spec.ssh_host
            )));
        }

        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        self.processes.spawn(pid);
        if let Some(token) = self.cancel_on_open.lock().unwrap().take() {
            token.cancel();
        }
        Ok(ProcessHandle::new(pid))
    }
}

/// Network probe with switchable answers
#[derive(Default)]
pub struct FakeProbe {
    vpn: AtomicBool,
    overlays: Mutex<HashSet<String>>,
}

impl FakeProbe {
    pub fn set_vpn(&self, up: bool) {
        self.vpn.store(up, Ordering::SeqCst);
    }

    pub fn start_overlay(&self, subnet: &str) {
        self.overlays.lock().unwrap().insert(subnet.to_string());
    }
}

#[async_trait]
impl NetworkProbe for FakeProbe {
    async fn vpn_route_available(&self) -> bool {
        self.vpn.load(Ordering::SeqCst)
    }

    async fn overlay_running(&self, subnet: &str) -> bool {
        self.overlays.lock().unwrap().contains(subnet)
    }
}

/// Manager state wired to fakes in a temporary state directory
pub struct Harness {
    pub dir: TempDir,
    pub processes: Arc<FakeProcesses>,
    pub transport: Arc<FakeTransport>,
    pub probe: Arc<FakeProbe>,
    pub state: ManagerState,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_range_size(100)
    }

    pub fn with_range_size(size: u16) -> Self {
        let dir = TempDir::new().unwrap();
        let processes = Arc::new(FakeProcesses::default());
        let transport = Arc::new(FakeTransport::new(processes.clone()));
        let probe = Arc::new(FakeProbe::default());

        let store = Arc::new(TunnelStore::new(dir.path().join("tunnels"), processes.clone()));
        let allocator = PortAllocator::new(PortRange::new(RANGE_START, size).unwrap());
        let supervisor =
            TunnelSupervisor::new(store.clone(), transport.clone(), processes.clone(), allocator)
                .with_grace_period(Duration::from_millis(200));
        let state = ManagerState::assemble(store, supervisor, NetworkValidator::new(probe.clone()));

        Self {
            dir,
            processes,
            transport,
            probe,
            state,
        }
    }

    /// Record files left in the state directory
    pub fn record_files(&self) -> Vec<String> {
        match std::fs::read_dir(self.state.store.dir()) {
            Ok(entries) => entries
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .filter(|name| name.ends_with(".json"))
                .collect(),
            Err(_) => Vec::new(),
        }
    }
}

pub fn cluster(group: &str, host: &str) -> ClusterDescriptor {
    ClusterDescriptor::new(group, host, "10.0.0.5")
}

pub fn overlay_cluster(group: &str, host: &str, subnet: &str) -> ClusterDescriptor {
    cluster(group, host).with_network(NetworkRequirement::SubnetOverlay {
        subnet: subnet.to_string(),
        hint: format!("sshuttle -r user@host {}", subnet),
    })
}
