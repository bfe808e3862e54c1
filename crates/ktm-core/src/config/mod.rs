//! Configuration management for ktm

mod cluster;
pub mod serde_utils;
mod tunnels;

pub use cluster::ClusterProfile;
pub use tunnels::{TunnelsConfig, DEFAULT_REMOTE_CONFIG_PATH};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;
use crate::network::DEFAULT_VPN_INTERFACE_PREFIXES;
use crate::types::ClusterId;
use serde_utils::duration_secs;

/// Environment variable naming the config file
pub const ENV_CONFIG: &str = "KTM_CONFIG";
/// Environment variable overriding `tunnels.port_range_start`
pub const ENV_PORT_RANGE_START: &str = "KTM_PORT_RANGE_START";
/// Environment variable overriding `tunnels.port_range_size`
pub const ENV_PORT_RANGE_SIZE: &str = "KTM_PORT_RANGE_SIZE";
/// Environment variable overriding `logging.file`
pub const ENV_LOG_FILE: &str = "KTM_LOG_FILE";
/// Environment variable overriding `tunnels.state_dir`
pub const ENV_STATE_DIR: &str = "KTM_STATE_DIR";

/// Get the default configuration directory
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ktm")
}

/// Get the default configuration file path
pub fn default_config_path() -> PathBuf {
    default_config_dir().join("config.toml")
}

/// Get the default tunnel state directory (`~/.local/state/ktm/tunnels`)
pub fn default_state_dir() -> PathBuf {
    dirs::state_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join(".local").join("state")))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ktm")
        .join("tunnels")
}

/// Expand a leading `~/` to the home directory
pub fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| path.to_path_buf()),
        Err(_) => path.to_path_buf(),
    }
}

/// Load configuration from a file
pub fn load_config<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Invalid(format!("Failed to read config: {}", e)))?;

    let config: T = toml::from_str(&content)?;
    Ok(config)
}

/// Contents of `config.toml`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub tunnels: TunnelsConfig,
    pub network: NetworkConfig,
    pub logging: LoggingConfig,
    pub clusters: Vec<ClusterProfile>,
}

impl ConfigFile {
    /// Load the config at `path`, falling back to defaults when it is missing
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        let config = match load_config::<Self>(path) {
            Ok(config) => config,
            Err(ConfigError::NotFound(_)) => {
                tracing::debug!("No config at {:?}, using defaults", path);
                Self::default()
            }
            Err(e) => return Err(e),
        };
        Ok(config)
    }

    /// Reject settings that cannot work
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.tunnels.port_range()?;
        if self.tunnels.api_port == 0 {
            return Err(ConfigError::Invalid("tunnels.api_port must be non-zero".to_string()));
        }
        if self.tunnels.connect_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "tunnels.connect_timeout must be at least 1 second".to_string(),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for cluster in &self.clusters {
            if cluster.group.is_empty() || cluster.host.is_empty() {
                return Err(ConfigError::Invalid(
                    "clusters need a non-empty group and host".to_string(),
                ));
            }
            if cluster.group.contains(':') || cluster.host.contains(':') {
                return Err(ConfigError::Invalid(format!(
                    "cluster {}: group and host may not contain ':'",
                    cluster.id()
                )));
            }
            if !crate::types::is_valid_context_name(&cluster.context_name()) {
                return Err(ConfigError::Invalid(format!(
                    "cluster {}: {:?} is not a usable context name",
                    cluster.id(),
                    cluster.context_name()
                )));
            }
            if !seen.insert(cluster.context_name()) {
                return Err(ConfigError::Invalid(format!(
                    "cluster {} is defined more than once",
                    cluster.id()
                )));
            }
        }
        Ok(())
    }

    /// Look up a cluster by `group:host` id or by context name
    ///
    /// A key containing `:` must be a well-formed id.
    pub fn find_cluster(&self, key: &str) -> Result<&ClusterProfile, ConfigError> {
        let found = if key.contains(':') {
            let id: ClusterId = key
                .parse()
                .map_err(|e| ConfigError::Invalid(format!("cluster id: {}", e)))?;
            self.clusters.iter().find(|c| c.id() == id)
        } else {
            self.clusters.iter().find(|c| c.context_name() == key)
        };
        found.ok_or_else(|| ConfigError::UnknownCluster(key.to_string()))
    }

    /// Apply one-shot overrides
    pub fn apply(&mut self, overrides: &ConfigOverrides) {
        if let Some(start) = overrides.port_range_start {
            self.tunnels.port_range_start = start;
        }
        if let Some(size) = overrides.port_range_size {
            self.tunnels.port_range_size = size;
        }
        if let Some(file) = &overrides.log_file {
            self.logging.file = Some(file.clone());
        }
        if let Some(dir) = &overrides.state_dir {
            self.tunnels.state_dir = Some(dir.clone());
        }
    }
}

/// Settings for network requirement probes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Host:port reachable only over the VPN; when set, VPN checks connect
    /// to it instead of inspecting interfaces
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vpn_probe_address: Option<String>,

    /// Interface name prefixes treated as VPN links
    pub vpn_interface_prefixes: Vec<String>,

    /// Timeout for the VPN probe connection
    #[serde(with = "duration_secs")]
    pub probe_timeout: Duration,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            vpn_probe_address: None,
            vpn_interface_prefixes: DEFAULT_VPN_INTERFACE_PREFIXES
                .iter()
                .map(|p| p.to_string())
                .collect(),
            probe_timeout: Duration::from_secs(2),
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Also write logs to this file
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,

    /// Default level filter when neither -v/-q nor RUST_LOG is given
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            file: None,
            level: "warn".to_string(),
        }
    }
}

/// Overrides taken from the environment or command line for one invocation
///
/// Never written back to the config file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub port_range_start: Option<u16>,
    pub port_range_size: Option<u16>,
    pub log_file: Option<PathBuf>,
    pub state_dir: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NetworkRequirement;
    use tempfile::TempDir;

    const SAMPLE: &str = r#"
[tunnels]
port_range_start = 20000
port_range_size = 50
connect_timeout = 5

[network]
vpn_probe_address = "10.0.0.1:443"

[[clusters]]
group = "acme"
host = "k3s-prod"
remote_addr = "192.168.90.10"
network = { kind = "subnet_overlay", subnet = "192.168.90.0/24", hint = "sshuttle -r user@host 192.168.90.0/24" }

[[clusters]]
group = "globex"
host = "edge"
remote_addr = "10.2.0.4"
api_port = 7443
network = { kind = "vpn" }
"#;

    #[test]
    fn test_parse_sample_config() {
        let config: ConfigFile = toml::from_str(SAMPLE).unwrap();
        config.validate().unwrap();

        assert_eq!(config.tunnels.port_range_start, 20000);
        assert_eq!(config.tunnels.port_range_size, 50);
        assert_eq!(config.tunnels.api_port, 6443);
        assert_eq!(config.tunnels.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.tunnels.termination_grace, Duration::from_secs(3));
        assert_eq!(config.network.vpn_probe_address.as_deref(), Some("10.0.0.1:443"));
        assert_eq!(config.logging.level, "warn");
        assert_eq!(config.clusters.len(), 2);

        let edge = config.find_cluster("globex:edge").unwrap();
        assert_eq!(edge.network, NetworkRequirement::Vpn);
        assert_eq!(edge.descriptor().api_port_or(6443), 7443);
        assert_eq!(
            config.find_cluster("acme-k3s-prod").unwrap().host,
            "k3s-prod"
        );
        assert!(matches!(
            config.find_cluster("acme:missing"),
            Err(ConfigError::UnknownCluster(_))
        ));
    }

    #[test]
    fn test_find_cluster_rejects_malformed_id() {
        let config: ConfigFile = toml::from_str(SAMPLE).unwrap();
        match config.find_cluster("acme:") {
            Err(ConfigError::Invalid(msg)) => assert!(msg.contains("<group>:<host>")),
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            config.find_cluster("nothing-here"),
            Err(ConfigError::UnknownCluster(_))
        ));
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = ConfigFile::load_or_default(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, ConfigFile::default());
        assert_eq!(config.tunnels.port_range_start, 16443);
        assert_eq!(config.tunnels.port_range_size, 10000);
    }

    #[test]
    fn test_rendered_config_reloads() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        let mut config = ConfigFile::default();
        config
            .clusters
            .push(ClusterProfile::new("acme", "prod", "10.0.0.5"));

        std::fs::write(&path, toml::to_string_pretty(&config).unwrap()).unwrap();
        let loaded = ConfigFile::load_or_default(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_validate_rejects_bad_ranges() {
        let mut config = ConfigFile::default();
        config.tunnels.port_range_size = 0;
        assert!(config.validate().is_err());

        config.tunnels.port_range_start = 65000;
        config.tunnels.port_range_size = 1000;
        assert!(config.validate().is_err());

        config.tunnels.port_range_size = 536;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_duplicate_clusters() {
        let mut config = ConfigFile::default();
        config.clusters.push(ClusterProfile::new("acme", "prod", "10.0.0.5"));
        config.clusters.push(ClusterProfile::new("acme", "prod", "10.0.0.6"));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_overrides_take_precedence() {
        let mut config: ConfigFile = toml::from_str(SAMPLE).unwrap();
        config.apply(&ConfigOverrides {
            port_range_start: Some(30000),
            port_range_size: None,
            log_file: Some(PathBuf::from("/tmp/ktm.log")),
            state_dir: Some(PathBuf::from("/tmp/ktm-state")),
        });

        assert_eq!(config.tunnels.port_range_start, 30000);
        assert_eq!(config.tunnels.port_range_size, 50);
        assert_eq!(config.logging.file, Some(PathBuf::from("/tmp/ktm.log")));
        assert_eq!(config.tunnels.state_dir(), PathBuf::from("/tmp/ktm-state"));
    }

    #[test]
    fn test_expand_home() {
        let plain = Path::new("/var/lib/ktm");
        assert_eq!(expand_home(plain), plain.to_path_buf());
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_home(Path::new("~/state")), home.join("state"));
        }
    }
}
