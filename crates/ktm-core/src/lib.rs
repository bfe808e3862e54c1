//! ktm-core: tunnel state, port allocation and network checks for ktm
//!
//! This crate holds the pieces of the tunnel manager that do not spawn
//! tunnels themselves: domain types, configuration, the port allocator,
//! the on-disk tunnel store and the network requirement validator.

pub mod allocator;
pub mod config;
pub mod error;
pub mod lock;
pub mod network;
pub mod process;
pub mod store;
pub mod time;
pub mod traits;
pub mod types;

pub use allocator::{PortAllocator, PortRange};
pub use error::{ConfigError, StoreError, TransportError, TunnelError};
pub use network::{NetworkStatus, NetworkValidator, Unsatisfied, Validation};
pub use store::{StoredTunnel, TunnelStore};
pub use types::{
    ClusterDescriptor, ClusterId, NetworkRecord, NetworkRequirement, ProcessHandle, TunnelRecord,
};
