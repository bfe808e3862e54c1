//! Core domain types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifier of a cluster in the form `group:host`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClusterId {
    /// Company or group the cluster belongs to
    pub group: String,
    /// SSH host alias of the control plane
    pub host: String,
}

impl ClusterId {
    /// Create a new cluster ID
    pub fn new(group: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            host: host.into(),
        }
    }

    /// Kubeconfig context name for this cluster (`group-host`)
    pub fn context_name(&self) -> String {
        format!("{}-{}", self.group, self.host)
    }
}

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.group, self.host)
    }
}

impl FromStr for ClusterId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((group, host)) if !group.is_empty() && !host.is_empty() => {
                Ok(Self::new(group, host))
            }
            _ => Err(format!("expected <group>:<host>, got {:?}", s)),
        }
    }
}

/// Connectivity prerequisite for reaching a cluster
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NetworkRequirement {
    /// Directly reachable
    #[default]
    None,
    /// Reachable only through a VPN
    Vpn,
    /// Reachable only while a subnet overlay (sshuttle) routes `subnet`
    SubnetOverlay {
        subnet: String,
        /// Command that establishes the overlay
        #[serde(default)]
        hint: String,
    },
}

impl NetworkRequirement {
    /// Whether the cluster is directly reachable
    pub fn is_none(&self) -> bool {
        matches!(self, NetworkRequirement::None)
    }

    /// Short indicator used in listings (e.g. `[VPN]`)
    pub fn indicator(&self) -> Option<&'static str> {
        match self {
            NetworkRequirement::None => None,
            NetworkRequirement::Vpn => Some("[VPN]"),
            NetworkRequirement::SubnetOverlay { .. } => Some("[sshuttle]"),
        }
    }
}

impl fmt::Display for NetworkRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkRequirement::None => write!(f, "direct"),
            NetworkRequirement::Vpn => write!(f, "vpn"),
            NetworkRequirement::SubnetOverlay { subnet, .. } => write!(f, "sshuttle {}", subnet),
        }
    }
}

/// A connectable cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterDescriptor {
    /// Cluster identifier
    pub id: ClusterId,
    /// Address of the API server as seen from the SSH host
    pub remote_addr: String,
    /// Remote API port; the configured default applies when absent
    pub api_port: Option<u16>,
    /// Network prerequisite for this cluster
    pub network: NetworkRequirement,
}

impl ClusterDescriptor {
    /// Create a directly reachable cluster descriptor
    pub fn new(
        group: impl Into<String>,
        host: impl Into<String>,
        remote_addr: impl Into<String>,
    ) -> Self {
        Self {
            id: ClusterId::new(group, host),
            remote_addr: remote_addr.into(),
            api_port: None,
            network: NetworkRequirement::None,
        }
    }

    /// Set the remote API port
    pub fn with_api_port(mut self, port: u16) -> Self {
        self.api_port = Some(port);
        self
    }

    /// Set the network requirement
    pub fn with_network(mut self, network: NetworkRequirement) -> Self {
        self.network = network;
        self
    }

    /// Kubeconfig context name for this cluster
    pub fn context_name(&self) -> String {
        self.id.context_name()
    }

    /// SSH host alias used to reach the control plane
    pub fn ssh_host(&self) -> &str {
        &self.id.host
    }

    /// Remote API port, falling back to `default`
    pub fn api_port_or(&self, default: u16) -> u16 {
        self.api_port.unwrap_or(default)
    }
}

/// Opaque handle to the OS process backing a tunnel
///
/// Besides the PID it carries the kernel start time of the process when the
/// platform exposes one, so a PID recycled by an unrelated process is not
/// mistaken for the tunnel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProcessHandle {
    pid: u32,
    /// Start time in clock ticks since boot (`/proc/<pid>/stat` field 22)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    start_time: Option<u64>,
}

impl ProcessHandle {
    /// Wrap a process ID
    pub fn new(pid: u32) -> Self {
        Self {
            pid,
            start_time: None,
        }
    }

    /// Pin the handle to one incarnation of the PID
    pub fn with_start_time(mut self, start_time: Option<u64>) -> Self {
        self.start_time = start_time;
        self
    }

    /// The process ID
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Recorded start time, if known
    pub fn start_time(&self) -> Option<u64> {
        self.start_time
    }
}

impl fmt::Display for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.pid)
    }
}

/// Persisted description of an established tunnel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelRecord {
    /// Kubeconfig context served by this tunnel
    pub context_name: String,
    /// Local port the forward listens on
    pub local_port: u16,
    /// Forward target (`host:port`) as seen from the SSH host
    pub remote_addr: String,
    /// SSH host alias carrying the forward
    pub ssh_host: String,
    /// Backing process
    pub handle: ProcessHandle,
    /// Creation time (Unix seconds)
    pub created_at: u64,
}

impl TunnelRecord {
    /// Local endpoint of the forward
    pub fn local_endpoint(&self) -> String {
        format!("127.0.0.1:{}", self.local_port)
    }
}

/// Persisted network requirement of a tunnel
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkRecord {
    /// Requirement captured at connect time
    pub requirement: NetworkRequirement,
    /// Last time the requirement was observed satisfied (Unix seconds).
    /// Advisory only; status is always re-validated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub satisfied_last_checked_at: Option<u64>,
}

impl NetworkRecord {
    /// Create a record that has never been observed satisfied
    pub fn new(requirement: NetworkRequirement) -> Self {
        Self {
            requirement,
            satisfied_last_checked_at: None,
        }
    }
}

/// Validate a context name for use as a store key
pub fn is_valid_context_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && name.len() <= 200
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cluster_id_parse_and_display() {
        let id: ClusterId = "acme:k3s-prod".parse().unwrap();
        assert_eq!(id.group, "acme");
        assert_eq!(id.host, "k3s-prod");
        assert_eq!(id.to_string(), "acme:k3s-prod");
        assert_eq!(id.context_name(), "acme-k3s-prod");
    }

    #[test]
    fn test_cluster_id_rejects_missing_parts() {
        assert!("acme".parse::<ClusterId>().is_err());
        assert!(":host".parse::<ClusterId>().is_err());
        assert!("acme:".parse::<ClusterId>().is_err());
    }

    #[test]
    fn test_network_requirement_serde_shape() {
        let req = NetworkRequirement::SubnetOverlay {
            subnet: "192.168.90.0/24".to_string(),
            hint: "sshuttle -r user@host 192.168.90.0/24".to_string(),
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains(r#""kind":"subnet_overlay""#));

        let vpn: NetworkRequirement = serde_json::from_str(r#"{"kind":"vpn"}"#).unwrap();
        assert_eq!(vpn, NetworkRequirement::Vpn);
    }

    #[test]
    fn test_overlay_hint_defaults_to_empty() {
        let req: NetworkRequirement =
            serde_json::from_str(r#"{"kind":"subnet_overlay","subnet":"10.0.0.0/8"}"#).unwrap();
        assert_eq!(
            req,
            NetworkRequirement::SubnetOverlay {
                subnet: "10.0.0.0/8".to_string(),
                hint: String::new(),
            }
        );
    }

    #[test]
    fn test_api_port_fallback() {
        let cluster = ClusterDescriptor::new("acme", "prod", "10.0.0.5");
        assert_eq!(cluster.api_port_or(6443), 6443);
        assert_eq!(cluster.with_api_port(7443).api_port_or(6443), 7443);
    }

    #[test]
    fn test_context_name_validation() {
        assert!(is_valid_context_name("acme-k3s-prod"));
        assert!(!is_valid_context_name(""));
        assert!(!is_valid_context_name(".hidden"));
        assert!(!is_valid_context_name("../escape"));
        assert!(!is_valid_context_name("a/b"));
    }
}
