//! Network requirement validation
//!
//! Checks whether the prerequisite for reaching a cluster (VPN or a subnet
//! overlay) is currently in place. Results are advisory: nothing here
//! blocks a tunnel, callers decide what to do with an unsatisfied check.
//! Every check probes live; nothing is cached between calls.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::traits::NetworkProbe;
use crate::types::NetworkRequirement;

/// Interface name prefixes that usually belong to VPN clients
pub const DEFAULT_VPN_INTERFACE_PREFIXES: &[&str] = &["tun", "utun", "wg", "ppp", "tap", "ipsec"];

/// Why a requirement is not met and how to fix it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Unsatisfied {
    pub reason: String,
    pub hint: Option<String>,
}

/// Outcome of a single requirement check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validation {
    Satisfied,
    Unsatisfied(Unsatisfied),
}

impl Validation {
    pub fn is_satisfied(&self) -> bool {
        matches!(self, Validation::Satisfied)
    }
}

/// Network state of a tunnel as shown in status output
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum NetworkStatus {
    /// Directly reachable, nothing to check
    NotRequired,
    Satisfied,
    Unsatisfied { reason: String, hint: Option<String> },
    /// The persisted requirement is missing or unreadable
    Unknown,
}

impl NetworkStatus {
    /// Map a fresh validation result onto a status
    pub fn from_validation(requirement: &NetworkRequirement, validation: Validation) -> Self {
        match (requirement.is_none(), validation) {
            (true, _) => NetworkStatus::NotRequired,
            (false, Validation::Satisfied) => NetworkStatus::Satisfied,
            (false, Validation::Unsatisfied(u)) => NetworkStatus::Unsatisfied {
                reason: u.reason,
                hint: u.hint,
            },
        }
    }
}

impl fmt::Display for NetworkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkStatus::NotRequired => write!(f, "-"),
            NetworkStatus::Satisfied => write!(f, "ok"),
            NetworkStatus::Unsatisfied { reason, .. } => write!(f, "{}", reason),
            NetworkStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// Validates network requirements against live probes
#[derive(Clone)]
pub struct NetworkValidator {
    probe: Arc<dyn NetworkProbe>,
}

impl NetworkValidator {
    pub fn new(probe: Arc<dyn NetworkProbe>) -> Self {
        Self { probe }
    }

    /// Check a requirement right now
    pub async fn check(&self, requirement: &NetworkRequirement) -> Validation {
        match requirement {
            NetworkRequirement::None => Validation::Satisfied,
            NetworkRequirement::Vpn => {
                if self.probe.vpn_route_available().await {
                    Validation::Satisfied
                } else {
                    Validation::Unsatisfied(Unsatisfied {
                        reason: "VPN connection required".to_string(),
                        hint: Some("Ensure VPN connection is active".to_string()),
                    })
                }
            }
            NetworkRequirement::SubnetOverlay { subnet, hint } => {
                if self.probe.overlay_running(subnet).await {
                    Validation::Satisfied
                } else {
                    let hint = if hint.trim().is_empty() {
                        format!("sshuttle -v -r <gateway> {}", subnet)
                    } else {
                        hint.clone()
                    };
                    Validation::Unsatisfied(Unsatisfied {
                        reason: format!("sshuttle tunnel required for {}", subnet),
                        hint: Some(hint),
                    })
                }
            }
        }
    }

    /// Check a requirement and express the result as a status
    pub async fn status(&self, requirement: &NetworkRequirement) -> NetworkStatus {
        let validation = self.check(requirement).await;
        NetworkStatus::from_validation(requirement, validation)
    }
}

/// Probe backed by the local system
#[derive(Debug, Clone)]
pub struct SystemProbe {
    vpn_probe_address: Option<String>,
    vpn_interface_prefixes: Vec<String>,
    timeout: Duration,
}

impl Default for SystemProbe {
    fn default() -> Self {
        Self {
            vpn_probe_address: None,
            vpn_interface_prefixes: DEFAULT_VPN_INTERFACE_PREFIXES
                .iter()
                .map(|p| p.to_string())
                .collect(),
            timeout: Duration::from_secs(2),
        }
    }
}

impl SystemProbe {
    pub fn new(
        vpn_probe_address: Option<String>,
        vpn_interface_prefixes: Vec<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            vpn_probe_address,
            vpn_interface_prefixes,
            timeout,
        }
    }

    async fn probe_address(&self, address: &str) -> bool {
        match tokio::time::timeout(self.timeout, tokio::net::TcpStream::connect(address)).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                tracing::debug!("VPN probe {} failed: {}", address, e);
                false
            }
            Err(_) => {
                tracing::debug!("VPN probe {} timed out", address);
                false
            }
        }
    }

    #[cfg(target_os = "linux")]
    async fn up_interfaces(&self) -> Vec<String> {
        let mut names = Vec::new();
        let Ok(mut entries) = tokio::fs::read_dir("/sys/class/net").await else {
            return names;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name().to_string_lossy().into_owned();
            let state = tokio::fs::read_to_string(entry.path().join("operstate"))
                .await
                .unwrap_or_default();
            // Point-to-point tunnel devices usually report "unknown"
            if matches!(state.trim(), "up" | "unknown") {
                names.push(name);
            }
        }
        names
    }

    #[cfg(not(target_os = "linux"))]
    async fn up_interfaces(&self) -> Vec<String> {
        match tokio::process::Command::new("ifconfig")
            .args(["-l", "-u"])
            .output()
            .await
        {
            Ok(output) if output.status.success() => String::from_utf8_lossy(&output.stdout)
                .split_whitespace()
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        }
    }

    #[cfg(target_os = "linux")]
    async fn process_command_lines(&self) -> Vec<Vec<String>> {
        let mut lines = Vec::new();
        let Ok(mut entries) = tokio::fs::read_dir("/proc").await else {
            return lines;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let is_pid = entry
                .file_name()
                .to_str()
                .map(|n| n.chars().all(|c| c.is_ascii_digit()))
                .unwrap_or(false);
            if !is_pid {
                continue;
            }
            if let Ok(raw) = tokio::fs::read(entry.path().join("cmdline")).await {
                let args: Vec<String> = raw
                    .split(|b| *b == 0)
                    .filter(|arg| !arg.is_empty())
                    .map(|arg| String::from_utf8_lossy(arg).into_owned())
                    .collect();
                if !args.is_empty() {
                    lines.push(args);
                }
            }
        }
        lines
    }

    #[cfg(not(target_os = "linux"))]
    async fn process_command_lines(&self) -> Vec<Vec<String>> {
        match tokio::process::Command::new("pgrep")
            .args(["-fl", "sshuttle"])
            .output()
            .await
        {
            Ok(output) => String::from_utf8_lossy(&output.stdout)
                .lines()
                .map(|line| line.split_whitespace().skip(1).map(str::to_string).collect())
                .collect(),
            Err(e) => {
                tracing::debug!("pgrep failed: {}", e);
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl NetworkProbe for SystemProbe {
    async fn vpn_route_available(&self) -> bool {
        if let Some(address) = &self.vpn_probe_address {
            return self.probe_address(address).await;
        }
        let interfaces = self.up_interfaces().await;
        has_vpn_interface(&interfaces, &self.vpn_interface_prefixes)
    }

    async fn overlay_running(&self, subnet: &str) -> bool {
        self.process_command_lines()
            .await
            .iter()
            .any(|args| cmdline_matches_overlay(args, subnet))
    }
}

/// Whether any interface name starts with one of the VPN prefixes
pub fn has_vpn_interface<S: AsRef<str>>(interfaces: &[String], prefixes: &[S]) -> bool {
    interfaces.iter().any(|name| {
        prefixes
            .iter()
            .any(|prefix| !prefix.as_ref().is_empty() && name.starts_with(prefix.as_ref()))
    })
}

/// Whether a process command line is an sshuttle instance routing `subnet`
pub fn cmdline_matches_overlay(args: &[String], subnet: &str) -> bool {
    let Some(start) = args.iter().position(|arg| arg.contains("sshuttle")) else {
        return false;
    };
    args[start + 1..].iter().any(|arg| arg == subnet)
}
