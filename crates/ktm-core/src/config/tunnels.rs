//! Tunnel configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::serde_utils::duration_secs;
use crate::allocator::PortRange;
use crate::error::ConfigError;

/// Where the k3s kubeconfig lives on control plane hosts
pub const DEFAULT_REMOTE_CONFIG_PATH: &str = "/etc/rancher/k3s/k3s.yaml";

/// Settings for local port allocation and the SSH forwards
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelsConfig {
    /// Kubeconfig path on the remote host (informational)
    pub remote_config_path: String,

    /// First local port handed out to tunnels
    pub port_range_start: u16,

    /// Number of ports available to tunnels
    pub port_range_size: u16,

    /// Remote API server port when a cluster does not set one
    pub api_port: u16,

    /// How long to wait for a forward to come up
    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,

    /// How long a tunnel gets to exit after SIGTERM before SIGKILL
    #[serde(with = "duration_secs")]
    pub termination_grace: Duration,

    /// Skip ports that another local program is listening on
    pub probe_local_ports: bool,

    /// State directory override
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_dir: Option<PathBuf>,
}

impl Default for TunnelsConfig {
    fn default() -> Self {
        Self {
            remote_config_path: DEFAULT_REMOTE_CONFIG_PATH.to_string(),
            port_range_start: 16443,
            port_range_size: 10000,
            api_port: 6443,
            connect_timeout: Duration::from_secs(15),
            termination_grace: Duration::from_secs(3),
            probe_local_ports: true,
            state_dir: None,
        }
    }
}

impl TunnelsConfig {
    /// The configured local port range
    pub fn port_range(&self) -> Result<PortRange, ConfigError> {
        PortRange::new(self.port_range_start, self.port_range_size)
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    /// Effective state directory
    pub fn state_dir(&self) -> PathBuf {
        self.state_dir
            .as_deref()
            .map(super::expand_home)
            .unwrap_or_else(super::default_state_dir)
    }
}
