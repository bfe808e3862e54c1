//! Process liveness and signalling
//!
//! Tunnel processes are tracked by PID plus, on Linux, the kernel start
//! time of the process. A handle whose PID now belongs to a process with a
//! different start time is treated as dead and never signalled.

use std::io;

use crate::traits::ProcessControl;
use crate::types::ProcessHandle;

/// Check if a process with the given PID is still alive
///
/// On Unix, uses kill(pid, 0) to check if the process exists. Zombies
/// (exited but not yet reaped) count as dead on Linux.
#[cfg(unix)]
pub fn is_process_alive(pid: u32) -> bool {
    if pid == 0 || pid > i32::MAX as u32 {
        return false;
    }
    // kill(pid, 0) returns 0 if the process exists and we have permission to signal it
    // EPERM indicates the process exists but we can't signal it
    let exists = unsafe {
        if libc::kill(pid as libc::pid_t, 0) == 0 {
            true
        } else {
            io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
        }
    };
    exists && !is_zombie(pid)
}

#[cfg(not(unix))]
pub fn is_process_alive(_pid: u32) -> bool {
    false
}

/// Fields of `/proc/<pid>/stat` after the command name, starting with the
/// state (field 3)
#[cfg(target_os = "linux")]
fn stat_fields(pid: u32) -> Option<Vec<String>> {
    // "pid (comm) S ..."; comm may contain spaces or parens
    let stat = std::fs::read_to_string(format!("/proc/{}/stat", pid)).ok()?;
    let rest = &stat[stat.rfind(')')? + 1..];
    Some(rest.split_whitespace().map(str::to_string).collect())
}

#[cfg(target_os = "linux")]
fn is_zombie(pid: u32) -> bool {
    stat_fields(pid)
        .and_then(|fields| fields.first().map(|state| state == "Z"))
        .unwrap_or(false)
}

#[cfg(all(unix, not(target_os = "linux")))]
fn is_zombie(_pid: u32) -> bool {
    false
}

/// Kernel start time of a process in clock ticks since boot
#[cfg(target_os = "linux")]
pub fn process_start_time(pid: u32) -> Option<u64> {
    // starttime is field 22; fields[0] is field 3
    stat_fields(pid)?.get(19)?.parse().ok()
}

#[cfg(not(target_os = "linux"))]
pub fn process_start_time(_pid: u32) -> Option<u64> {
    None
}

/// Whether the process behind `handle` is the one it was recorded for
///
/// Handles without a start time, or platforms that cannot report one, only
/// get the PID check.
pub fn is_same_process(handle: ProcessHandle) -> bool {
    match (handle.start_time(), process_start_time(handle.pid())) {
        (Some(expected), Some(actual)) if expected != actual => {
            tracing::debug!(
                "PID {} was reused (start time {} != {})",
                handle.pid(),
                actual,
                expected
            );
            false
        }
        _ => true,
    }
}

#[cfg(unix)]
fn send_signal(pid: u32, signal: libc::c_int) -> io::Result<()> {
    if pid == 0 || pid > i32::MAX as u32 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid pid {}", pid),
        ));
    }
    let result = unsafe { libc::kill(pid as libc::pid_t, signal) };
    if result == 0 {
        return Ok(());
    }
    let err = io::Error::last_os_error();
    // Already gone
    if err.raw_os_error() == Some(libc::ESRCH) {
        return Ok(());
    }
    Err(err)
}

/// Process control backed by OS signals
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProcesses;

#[cfg(unix)]
impl ProcessControl for SystemProcesses {
    fn is_alive(&self, handle: ProcessHandle) -> bool {
        is_process_alive(handle.pid()) && is_same_process(handle)
    }

    fn terminate(&self, handle: ProcessHandle) -> io::Result<()> {
        if !is_same_process(handle) {
            return Ok(());
        }
        send_signal(handle.pid(), libc::SIGTERM)
    }

    fn kill(&self, handle: ProcessHandle) -> io::Result<()> {
        if !is_same_process(handle) {
            return Ok(());
        }
        send_signal(handle.pid(), libc::SIGKILL)
    }
}

#[cfg(not(unix))]
impl ProcessControl for SystemProcesses {
    fn is_alive(&self, _handle: ProcessHandle) -> bool {
        false
    }

    fn terminate(&self, _handle: ProcessHandle) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "process signalling is only supported on Unix",
        ))
    }

    fn kill(&self, handle: ProcessHandle) -> io::Result<()> {
        self.terminate(handle)
    }
}
