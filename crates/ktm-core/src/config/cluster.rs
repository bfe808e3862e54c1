//! Cluster profile configuration

use serde::{Deserialize, Serialize};

use crate::types::{ClusterDescriptor, ClusterId, NetworkRequirement};

/// A cluster known to ktm
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterProfile {
    /// Company or group name
    pub group: String,

    /// SSH host alias of the control plane
    pub host: String,

    /// API server address as seen from the SSH host
    #[serde(default = "default_remote_addr")]
    pub remote_addr: String,

    /// Remote API port override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_port: Option<u16>,

    /// Free-form notes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,

    /// Network prerequisite
    #[serde(default)]
    pub network: NetworkRequirement,
}

fn default_remote_addr() -> String {
    "127.0.0.1".to_string()
}

impl ClusterProfile {
    /// Create a directly reachable profile
    pub fn new(group: impl Into<String>, host: impl Into<String>, remote_addr: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            host: host.into(),
            remote_addr: remote_addr.into(),
            api_port: None,
            network: NetworkRequirement::None,
            notes: None,
        }
    }

    /// Cluster identifier (`group:host`)
    pub fn id(&self) -> ClusterId {
        ClusterId::new(&self.group, &self.host)
    }

    /// Kubeconfig context name (`group-host`)
    pub fn context_name(&self) -> String {
        self.id().context_name()
    }

    /// Descriptor handed to the tunnel machinery
    pub fn descriptor(&self) -> ClusterDescriptor {
        ClusterDescriptor {
            id: self.id(),
            remote_addr: self.remote_addr.clone(),
            api_port: self.api_port,
            network: self.network.clone(),
        }
    }
}
