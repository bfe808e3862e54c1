//! Config command implementations

use std::path::Path;

use anyhow::{Context, Result};

use crate::output::{print_error, print_info, print_success};
use ktm_core::config::{ConfigFile, DEFAULT_REMOTE_CONFIG_PATH};

/// Show the effective configuration
///
/// Prints the file's settings merged with defaults and any environment or
/// command line overrides.
pub fn config_show(path: &Path, effective: &ConfigFile) -> Result<()> {
    if path.exists() {
        print_info(&format!("Configuration file: {:?}", path));
    } else {
        print_info(&format!("No configuration file at {:?}, showing defaults", path));
    }
    println!();

    let content =
        toml::to_string_pretty(effective).context("Failed to render configuration")?;
    println!("{}", content);

    Ok(())
}

/// Show where configuration and tunnel state live
pub fn config_path(path: &Path, effective: &ConfigFile) -> Result<()> {
    println!("config: {}", path.display());
    println!("state:  {}", effective.tunnels.state_dir().display());
    Ok(())
}

/// Write a commented default configuration
pub fn config_init(path: &Path, force: bool) -> Result<()> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() && !dir.exists() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create config directory: {:?}", dir))?;
            print_success(&format!("Created config directory: {:?}", dir));
        }
    }

    if path.exists() && !force {
        print_error(&format!("Config file already exists: {:?}", path));
        print_info("Use --force to overwrite");
        anyhow::bail!("Refusing to overwrite {:?}", path);
    }

    std::fs::write(path, generate_default_config())
        .with_context(|| format!("Failed to write config file: {:?}", path))?;

    print_success(&format!("Created configuration file: {:?}", path));
    Ok(())
}

/// Generate default configuration content
fn generate_default_config() -> String {
    format!(
        r#"# ktm configuration

[tunnels]
# Kubeconfig location on the control plane hosts
remote_config_path = "{remote}"

# Local ports handed out to tunnels: port_range_start .. +port_range_size
port_range_start = 16443
port_range_size = 10000

# API server port when a cluster does not set one
api_port = 6443

# Seconds to wait for a forward to accept connections
connect_timeout = 15

# Seconds between SIGTERM and SIGKILL when closing a tunnel
termination_grace = 3

# Skip ports another local program is already listening on
probe_local_ports = true

# Tunnel state directory (default: ~/.local/state/ktm/tunnels)
# state_dir = "~/.local/state/ktm/tunnels"

[network]
# An address only reachable over the VPN; when set, VPN checks connect to it
# vpn_probe_address = "10.0.0.1:443"
vpn_interface_prefixes = ["tun", "utun", "wg", "ppp", "tap", "ipsec"]
probe_timeout = 2

[logging]
level = "warn"
# file = "~/.local/state/ktm/ktm.log"

# Clusters are addressed as group:host. The host is an SSH alias for the
# control plane; remote_addr is the API server as seen from that host.
#
# [[clusters]]
# group = "acme"
# host = "k3s-prod"
# remote_addr = "127.0.0.1"
#
# [[clusters]]
# group = "acme"
# host = "k3s-internal"
# remote_addr = "192.168.90.10"
# network = {{ kind = "subnet_overlay", subnet = "192.168.90.0/24", hint = "sshuttle -r bastion 192.168.90.0/24" }}
#
# [[clusters]]
# group = "globex"
# host = "eks-gateway"
# remote_addr = "10.20.0.15"
# api_port = 443
# network = {{ kind = "vpn" }}
"#,
        remote = DEFAULT_REMOTE_CONFIG_PATH
    )
}
