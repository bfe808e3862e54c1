//! Process control traits

use std::io;

use crate::types::ProcessHandle;

/// Liveness checks and signalling for tunnel processes
pub trait ProcessControl: Send + Sync {
    /// Whether the process is still running
    fn is_alive(&self, handle: ProcessHandle) -> bool;

    /// Ask the process to exit (SIGTERM)
    fn terminate(&self, handle: ProcessHandle) -> io::Result<()>;

    /// Force the process to exit (SIGKILL)
    fn kill(&self, handle: ProcessHandle) -> io::Result<()>;
}
