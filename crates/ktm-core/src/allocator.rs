//! Local port allocation for tunnels
//!
//! Ports are handed out from a fixed range in ascending order. The allocator
//! holds no state of its own; callers pass in the set of ports that live
//! tunnels already occupy.

use std::collections::HashSet;
use std::net::TcpListener;

use crate::error::TunnelError;

/// Contiguous range of local ports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRange {
    start: u16,
    size: u16,
}

impl PortRange {
    /// Create a range of `size` ports beginning at `start`
    pub fn new(start: u16, size: u16) -> Result<Self, TunnelError> {
        if size == 0 {
            return Err(TunnelError::InvalidPortRange(
                "range size must be at least 1".to_string(),
            ));
        }
        if start == 0 {
            return Err(TunnelError::InvalidPortRange(
                "range start must be a non-zero port".to_string(),
            ));
        }
        let last = start as u32 + size as u32 - 1;
        if last > u16::MAX as u32 {
            return Err(TunnelError::InvalidPortRange(format!(
                "range {}+{} extends past port {}",
                start,
                size,
                u16::MAX
            )));
        }
        Ok(Self { start, size })
    }

    /// First port in the range
    pub fn start(&self) -> u16 {
        self.start
    }

    /// Last port in the range (inclusive)
    pub fn end(&self) -> u16 {
        (self.start as u32 + self.size as u32 - 1) as u16
    }

    /// Number of ports in the range
    pub fn size(&self) -> u16 {
        self.size
    }

    /// Iterate the range in ascending order
    pub fn iter(&self) -> impl Iterator<Item = u16> {
        self.start..=self.end()
    }
}

/// Chooses free local ports for new tunnels
#[derive(Debug, Clone)]
pub struct PortAllocator {
    range: PortRange,
    probe_local: bool,
}

impl PortAllocator {
    /// Create an allocator over `range`
    pub fn new(range: PortRange) -> Self {
        Self {
            range,
            probe_local: false,
        }
    }

    /// Also skip ports some other local process is already listening on
    pub fn with_local_probe(mut self, enabled: bool) -> Self {
        self.probe_local = enabled;
        self
    }

    /// The range this allocator draws from
    pub fn range(&self) -> PortRange {
        self.range
    }

    /// Pick the lowest port in the range that is neither in `in_use` nor in
    /// `excluding`.
    ///
    /// `in_use` holds the ports of live tunnels; `excluding` holds ports
    /// reserved by the caller that are not yet recorded (e.g. earlier
    /// members of a batch).
    pub fn allocate(
        &self,
        in_use: &HashSet<u16>,
        excluding: &HashSet<u16>,
    ) -> Result<u16, TunnelError> {
        for port in self.range.iter() {
            if in_use.contains(&port) || excluding.contains(&port) {
                continue;
            }
            if self.probe_local && !local_port_free(port) {
                tracing::debug!("Port {} is held by another process, skipping", port);
                continue;
            }
            return Ok(port);
        }

        Err(TunnelError::RangeExhausted {
            start: self.range.start(),
            end: self.range.end(),
        })
    }
}

fn local_port_free(port: u16) -> bool {
    TcpListener::bind(("127.0.0.1", port)).is_ok()
}
