//! SSH port-forward transport
//!
//! Each tunnel is an `ssh -N -L` process in its own process group, so it
//! keeps running after `ktm` exits. Its stderr goes to a per-context log
//! file under the state directory.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::process::Command;
use tokio::time::Instant;

use ktm_core::error::TransportError;
use ktm_core::process::process_start_time;
use ktm_core::traits::{ForwardSpec, Transport};
use ktm_core::types::ProcessHandle;

/// Interval between readiness checks while a forward comes up
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Timeout for a single readiness connect attempt
const PROBE_TIMEOUT: Duration = Duration::from_millis(250);

/// Opens forwards by running the OpenSSH client
#[derive(Debug, Clone)]
pub struct SshTransport {
    program: String,
    leading_args: Vec<String>,
    logs_dir: PathBuf,
    connect_timeout: Duration,
}

impl SshTransport {
    /// Create a transport that logs into `logs_dir`
    pub fn new(logs_dir: impl Into<PathBuf>, connect_timeout: Duration) -> Self {
        Self {
            program: "ssh".to_string(),
            leading_args: Vec::new(),
            logs_dir: logs_dir.into(),
            connect_timeout,
        }
    }

    /// Run `program` with `leading_args` in front of the ssh arguments
    pub fn with_command(mut self, program: impl Into<String>, leading_args: Vec<String>) -> Self {
        self.program = program.into();
        self.leading_args = leading_args;
        self
    }

    /// Arguments passed to ssh for a forward
    pub fn forward_args(&self, spec: &ForwardSpec) -> Vec<String> {
        let connect_secs = self.connect_timeout.as_secs().max(1);
        vec![
            "-N".to_string(),
            "-o".to_string(),
            "ExitOnForwardFailure=yes".to_string(),
            "-o".to_string(),
            "ServerAliveInterval=60".to_string(),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", connect_secs),
            "-L".to_string(),
            format!(
                "127.0.0.1:{}:{}:{}",
                spec.local_port, spec.remote_host, spec.remote_port
            ),
            spec.ssh_host.clone(),
        ]
    }

    fn log_path(&self, context: &str) -> PathBuf {
        self.logs_dir.join(format!("{}.log", context))
    }
}

#[async_trait]
impl Transport for SshTransport {
    async fn open(&self, context: &str, spec: &ForwardSpec) -> Result<ProcessHandle, TransportError> {
        let log_path = self.log_path(context);
        std::fs::create_dir_all(&self.logs_dir)
            .map_err(|e| TransportError::Spawn(format!("Failed to create {:?}: {}", self.logs_dir, e)))?;
        let log_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .map_err(|e| TransportError::Spawn(format!("Failed to open {:?}: {}", log_path, e)))?;
        let log_offset = log_file.metadata().map(|m| m.len()).unwrap_or(0);

        let mut std_command = std::process::Command::new(&self.program);
        std_command
            .args(&self.leading_args)
            .args(self.forward_args(spec))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::from(log_file));
        // Own process group so terminal signals to ktm don't reach the tunnel
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            std_command.process_group(0);
        }
        let mut command = Command::from(std_command);
        command.kill_on_drop(false);

        tracing::debug!(
            "Spawning {} for {} (forward 127.0.0.1:{} -> {})",
            self.program,
            context,
            spec.local_port,
            spec.remote_addr()
        );
        let mut child = command
            .spawn()
            .map_err(|e| TransportError::Spawn(format!("{}: {}", self.program, e)))?;
        let pid = child
            .id()
            .ok_or_else(|| TransportError::Spawn("process exited before reporting a pid".to_string()))?;
        // The child is unreaped here, so the PID cannot have been recycled yet
        let handle = ProcessHandle::new(pid).with_start_time(process_start_time(pid));

        let deadline = Instant::now() + self.connect_timeout;
        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    let stderr = read_log_since(&log_path, log_offset).await;
                    return Err(classify_failure(status.code(), &stderr));
                }
                Ok(None) => {}
                Err(e) => {
                    let _ = child.start_kill();
                    return Err(TransportError::Spawn(e.to_string()));
                }
            }

            if local_port_accepts(spec.local_port).await {
                break;
            }

            if Instant::now() >= deadline {
                tracing::warn!(
                    "Forward for {} not ready after {:?}, killing pid {}",
                    context,
                    self.connect_timeout,
                    pid
                );
                let _ = child.start_kill();
                let _ = child.wait().await;
                return Err(TransportError::Timeout(self.connect_timeout));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }

        // Reap the child if it exits while we are still running
        tokio::spawn(async move {
            let _ = child.wait().await;
        });

        tracing::info!("Forward for {} is up (pid {})", context, pid);
        Ok(handle)
    }
}

async fn local_port_accepts(port: u16) -> bool {
    matches!(
        tokio::time::timeout(PROBE_TIMEOUT, TcpStream::connect(("127.0.0.1", port))).await,
        Ok(Ok(_))
    )
}

async fn read_log_since(path: &Path, offset: u64) -> String {
    match tokio::fs::read(path).await {
        Ok(bytes) => {
            let start = (offset as usize).min(bytes.len());
            String::from_utf8_lossy(&bytes[start..]).into_owned()
        }
        Err(_) => String::new(),
    }
}

/// Map an early ssh exit onto a transport error
pub fn classify_failure(code: Option<i32>, stderr: &str) -> TransportError {
    let detail = summarize_stderr(stderr);
    let lower = stderr.to_lowercase();

    if lower.contains("permission denied")
        || lower.contains("host key verification failed")
        || lower.contains("too many authentication failures")
    {
        return TransportError::AuthenticationFailed(detail);
    }

    if lower.contains("could not resolve hostname")
        || lower.contains("connection refused")
        || lower.contains("no route to host")
        || lower.contains("network is unreachable")
        || lower.contains("connection timed out")
        || lower.contains("operation timed out")
    {
        return TransportError::Unreachable(detail);
    }

    TransportError::Exited { code, detail }
}

/// Last meaningful stderr line
fn summarize_stderr(stderr: &str) -> String {
    stderr
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("Warning: Permanently added"))
        .last()
        .unwrap_or("no output")
        .to_string()
}
