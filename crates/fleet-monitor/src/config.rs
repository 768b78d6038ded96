//! Tunables for the control loop and the provisioning payload.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Control-loop thresholds. Every field has a default so a partial
/// `[monitor]` table deserializes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Delay between the end of one tick and the start of the next.
    pub tick_ms: u64,
    /// Heartbeat age after which an instance is considered dead.
    pub stale_timeout_ms: u64,
    /// At or below this TPS an instance is restarted.
    pub restart_tps: f64,
    /// At or below this TPS a warning is logged.
    pub warn_tps: f64,
    pub lobby_minimum_available_slots: i64,
    /// How long an instance may keep reporting "starting" before it is
    /// killed.
    pub startup_timeout_secs: u64,
    /// Minimum gap between two hygiene restarts in the same group.
    pub hygiene_cooldown_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            tick_ms: 2000,
            stale_timeout_ms: 35_000,
            restart_tps: 10.0,
            warn_tps: 17.0,
            lobby_minimum_available_slots: 50,
            startup_timeout_secs: 300,
            hygiene_cooldown_secs: 600,
        }
    }
}

impl MonitorConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}

/// Static parts of every instance the monitor creates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisionConfig {
    pub image: String,
    /// Named volume holding shared server configuration.
    pub config_volume: String,
    pub config_mount_point: String,
    /// Directory containing `start.sh`; becomes the working directory.
    pub setup_scripts_dir: String,
    /// Share the host network instead of publishing the instance port.
    pub host_network: bool,
    /// Prefix for every injected environment variable.
    pub env_prefix: String,
    pub redis_host: String,
    pub redis_port: u16,
    pub mysql_host: String,
    pub mysql_port: u16,
    pub mysql_user: String,
    pub mysql_password: String,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            image: "mineplex/java:latest".to_string(),
            config_volume: "server-config".to_string(),
            config_mount_point: "/home/mineplex/config".to_string(),
            setup_scripts_dir: "/home/mineplex/scripts".to_string(),
            host_network: false,
            env_prefix: "MINEPLEX".to_string(),
            redis_host: "127.0.0.1".to_string(),
            redis_port: 6379,
            mysql_host: "127.0.0.1".to_string(),
            mysql_port: 3306,
            mysql_user: "root".to_string(),
            mysql_password: "root".to_string(),
        }
    }
}
