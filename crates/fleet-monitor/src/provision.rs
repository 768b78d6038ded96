//! Builds the executor payload for a new instance of a group.

use fleet_executor::{InstanceSpec, NetworkMode, VolumeMount};
use fleet_state::ServerGroup;

use crate::config::ProvisionConfig;
use crate::error::{MonitorError, MonitorResult};

#[derive(Debug, Clone, Default)]
pub struct Provisioner {
    config: ProvisionConfig,
}

impl Provisioner {
    pub fn new(config: ProvisionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ProvisionConfig {
        &self.config
    }

    /// Port instance `number` of `group` listens on.
    pub fn port_for(group: &ServerGroup, number: u32) -> MonitorResult<u16> {
        u16::try_from(number)
            .ok()
            .and_then(|n| group.port_section.checked_add(n))
            .ok_or_else(|| {
                MonitorError::InvalidName(format!(
                    "{}-{number} overflows port section {}",
                    group.prefix, group.port_section
                ))
            })
    }

    pub fn spec_for(&self, group: &ServerGroup, name: &str, port: u16) -> InstanceSpec {
        let cfg = &self.config;
        let var = |key: &str| format!("{}_{key}", cfg.env_prefix);

        let mut env = vec![
            (var("PORT"), port.to_string()),
            (var("PREFIX"), group.prefix.clone()),
            (var("SERVER_NAME"), name.to_string()),
            (var("GROUP"), group.name.clone()),
            (var("ADD_ANTICHEAT"), group.flag("addNoCheat").to_string()),
            (var("WORLD_ZIP"), group.world_zip.clone()),
            (var("PLUGIN"), group.plugin.clone()),
            (var("CONFIG_PATH"), group.config_path.clone()),
            (var("SERVER_TYPE"), group.server_type.clone()),
            (var("MIN_PLAYERS"), group.min_players.to_string()),
            (var("MAX_PLAYERS"), group.max_players.to_string()),
            (var("REDIS_HOST"), cfg.redis_host.clone()),
            (var("REDIS_PORT"), cfg.redis_port.to_string()),
            (var("MYSQL_HOST"), cfg.mysql_host.clone()),
            (var("MYSQL_PORT"), cfg.mysql_port.to_string()),
            (var("MYSQL_USER"), cfg.mysql_user.clone()),
            (var("MYSQL_PASSWORD"), cfg.mysql_password.clone()),
        ];
        for (flag, value) in &group.flags {
            if flag == "addNoCheat" {
                continue;
            }
            env.push((var(&screaming_snake(flag)), value.clone()));
        }

        let network = if cfg.host_network {
            NetworkMode::Host
        } else {
            NetworkMode::Ports { ports: vec![port] }
        };

        InstanceSpec {
            name: name.to_string(),
            image: cfg.image.clone(),
            env,
            mounts: vec![VolumeMount {
                source: cfg.config_volume.clone(),
                target: cfg.config_mount_point.clone(),
                read_only: false,
            }],
            network,
            working_dir: Some(format!("{}/", cfg.setup_scripts_dir.trim_end_matches('/'))),
            cmd: vec!["/bin/sh".to_string(), "start.sh".to_string()],
            memory_mb: (group.required_ram > 0).then_some(group.required_ram),
            cpus: (group.required_cpu > 0).then_some(group.required_cpu),
        }
    }
}

/// `mapVoting` -> `MAP_VOTING`.
fn screaming_snake(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    let mut prev_lower = false;
    for c in key.chars() {
        if !c.is_ascii_alphanumeric() {
            out.push('_');
            prev_lower = false;
            continue;
        }
        if c.is_ascii_uppercase() && prev_lower {
            out.push('_');
        }
        prev_lower = c.is_ascii_lowercase() || c.is_ascii_digit();
        out.push(c.to_ascii_uppercase());
    }
    out
}
