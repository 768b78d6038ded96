//! Provisioning payload handed to an executor.

use serde::{Deserialize, Serialize};

/// How an instance is attached to the network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum NetworkMode {
    /// Share the host network namespace; the instance binds its own port.
    Host,
    /// Publish each TCP port on the same host port.
    Ports { ports: Vec<u16> },
}

/// A named volume mounted into the instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeMount {
    pub source: String,
    pub target: String,
    pub read_only: bool,
}

/// Everything needed to create one instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceSpec {
    pub name: String,
    pub image: String,
    /// Ordered `KEY=value` pairs.
    pub env: Vec<(String, String)>,
    pub mounts: Vec<VolumeMount>,
    pub network: NetworkMode,
    pub working_dir: Option<String>,
    pub cmd: Vec<String>,
    /// Memory limit in megabytes.
    pub memory_mb: Option<u32>,
    /// CPU limit in whole cores.
    pub cpus: Option<u32>,
}

impl InstanceSpec {
    /// Look up an env value by key.
    pub fn env_value(&self, key: &str) -> Option<&str> {
        self.env
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Result of a `create` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceHandle {
    pub name: String,
    /// Executor-assigned id, when known.
    pub id: Option<String>,
    /// False when the name already existed and nothing was created.
    pub created: bool,
}

impl InstanceHandle {
    pub fn existing(name: &str) -> Self {
        Self {
            name: name.to_string(),
            id: None,
            created: false,
        }
    }
}
