//! Network probe traits

use async_trait::async_trait;

/// Observations about the local network used by requirement validation
#[async_trait]
pub trait NetworkProbe: Send + Sync {
    /// Whether a VPN route appears to be up
    async fn vpn_route_available(&self) -> bool;

    /// Whether a subnet overlay (sshuttle) routing `subnet` is running
    async fn overlay_running(&self, subnet: &str) -> bool;
}
