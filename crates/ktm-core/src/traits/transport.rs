//! Transport traits

use async_trait::async_trait;

use crate::error::TransportError;
use crate::types::ProcessHandle;

/// Description of a single local port forward
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardSpec {
    /// SSH host alias carrying the forward
    pub ssh_host: String,
    /// Local port to listen on (bound to loopback)
    pub local_port: u16,
    /// Target host as seen from the SSH host
    pub remote_host: String,
    /// Target port as seen from the SSH host
    pub remote_port: u16,
}

impl ForwardSpec {
    /// Forward target in `host:port` form
    pub fn remote_addr(&self) -> String {
        format!("{}:{}", self.remote_host, self.remote_port)
    }
}

/// Abstraction over whatever establishes a port forward
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open the forward and return a handle to the process carrying it.
    ///
    /// Must only return `Ok` once the forward is usable; on failure no
    /// process may be left behind.
    async fn open(&self, context: &str, spec: &ForwardSpec) -> Result<ProcessHandle, TransportError>;
}
