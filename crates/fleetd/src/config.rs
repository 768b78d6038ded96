//! fleetd.toml configuration.
//!
//! Precedence, lowest first: built-in defaults, the TOML file, `MM_*`
//! environment variables, command-line flags.

use std::path::{Path, PathBuf};

use anyhow::Context;
use fleet_monitor::{MonitorConfig, ProvisionConfig};
use fleet_state::DEFAULT_STATUS_NAMESPACE;
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetdConfig {
    pub monitor: MonitorConfig,
    pub store: StoreConfig,
    pub docker: DockerConfig,
    pub database: DatabaseConfig,
    pub api: ApiConfig,
    pub console: ConsoleConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Shared Redis; game servers write their own status records.
    Redis,
    /// Local redb file; game servers report through the API.
    Embedded,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub redis_host: String,
    pub redis_port: u16,
    pub path: PathBuf,
    pub namespace: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Redis,
            redis_host: "127.0.0.1".to_string(),
            redis_port: 6379,
            path: PathBuf::from("/var/lib/fleetd/fleet.redb"),
            namespace: DEFAULT_STATUS_NAMESPACE.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DockerConfig {
    pub socket: PathBuf,
    /// Pin the Engine API version, e.g. "1.43". Unversioned when unset.
    pub api_version: Option<String>,
    pub image: String,
    pub config_volume: String,
    pub config_mount_point: String,
    pub setup_scripts_dir: String,
    pub host_network: bool,
    pub env_prefix: String,
}

impl Default for DockerConfig {
    fn default() -> Self {
        let provision = ProvisionConfig::default();
        Self {
            socket: PathBuf::from("/var/run/docker.sock"),
            api_version: None,
            image: provision.image,
            config_volume: provision.config_volume,
            config_mount_point: provision.config_mount_point,
            setup_scripts_dir: provision.setup_scripts_dir,
            host_network: provision.host_network,
            env_prefix: provision.env_prefix,
        }
    }
}

/// Coordinates of the game database, handed to every instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3306,
            user: "root".to_string(),
            password: "root".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    pub enabled: bool,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl FleetdConfig {
    /// Read `path`, falling back to defaults when it does not exist.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            info!(path = ?path, "no config file, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: FleetdConfig =
            toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
        info!(path = ?path, "config loaded");
        Ok(config)
    }

    /// Apply `MM_*` overrides from the process environment.
    pub fn apply_env(&mut self) -> anyhow::Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<()> {
        if let Some(host) = lookup("MM_REDIS_ADDR") {
            self.store.redis_host = host;
        }
        if let Some(port) = lookup("MM_REDIS_PORT") {
            self.store.redis_port = parse_port("MM_REDIS_PORT", &port)?;
        }
        if let Some(host) = lookup("MM_MYSQL_ADDR") {
            self.database.host = host;
        }
        if let Some(port) = lookup("MM_MYSQL_PORT") {
            self.database.port = parse_port("MM_MYSQL_PORT", &port)?;
        }
        if let Some(user) = lookup("MM_MYSQL_USER") {
            self.database.user = user;
        }
        if let Some(password) = lookup("MM_MYSQL_PASSWORD") {
            self.database.password = password;
        }
        if let Some(port) = lookup("MM_WEB_PORT") {
            self.api.port = parse_port("MM_WEB_PORT", &port)?;
        }
        // Any non-empty value disables the console.
        if lookup("MM_NO_COMMAND_MANAGER").is_some_and(|v| !v.is_empty()) {
            self.console.enabled = false;
        }
        Ok(())
    }

    /// Everything the provisioner injects into a new instance.
    pub fn provision_config(&self) -> ProvisionConfig {
        ProvisionConfig {
            image: self.docker.image.clone(),
            config_volume: self.docker.config_volume.clone(),
            config_mount_point: self.docker.config_mount_point.clone(),
            setup_scripts_dir: self.docker.setup_scripts_dir.clone(),
            host_network: self.docker.host_network,
            env_prefix: self.docker.env_prefix.clone(),
            redis_host: self.store.redis_host.clone(),
            redis_port: self.store.redis_port,
            mysql_host: self.database.host.clone(),
            mysql_port: self.database.port,
            mysql_user: self.database.user.clone(),
            mysql_password: self.database.password.clone(),
        }
    }
}

fn parse_port(key: &str, raw: &str) -> anyhow::Result<u16> {
    raw.trim()
        .parse()
        .with_context(|| format!("{key}={raw:?} is not a port"))
}
