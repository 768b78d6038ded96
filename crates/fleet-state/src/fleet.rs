//! Typed view over a [`FleetStore`].
//!
//! `Fleet` owns the key layout (group hashes, status namespace) and the
//! decoding of raw records into `ServerGroup` / `ServerRecord`.

use tracing::{debug, info};

use crate::error::{StateError, StateResult};
use crate::store::FleetStore;
use crate::types::*;

/// One entry of a status snapshot. Undecodable records are kept (as
/// `InvalidRecord`) so callers can log and skip them individually.
#[derive(Debug)]
pub struct StatusEntry {
    pub key: String,
    pub record: StateResult<ServerRecord>,
}

/// Injected handle to the fleet store with typed accessors.
#[derive(Debug, Clone)]
pub struct Fleet<S> {
    store: S,
    namespace: String,
}

impl<S: FleetStore> Fleet<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            namespace: DEFAULT_STATUS_NAMESPACE.to_string(),
        }
    }

    /// Use a different status key namespace (e.g. another region).
    pub fn with_namespace(mut self, namespace: &str) -> Self {
        self.namespace = namespace.to_string();
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn status_key(&self, name: &str) -> String {
        format!("{}{name}", self.namespace)
    }

    // ── Groups ─────────────────────────────────────────────────────

    pub async fn group_names(&self) -> StateResult<Vec<String>> {
        self.store.group_names().await
    }

    pub async fn group_exists(&self, name: &str) -> StateResult<bool> {
        self.store.group_indexed(name).await
    }

    /// Load and validate a group's policy.
    ///
    /// Returns `NotFound` when no record exists and `MalformedPolicy` when
    /// the record is incomplete.
    pub async fn server_group(&self, name: &str) -> StateResult<ServerGroup> {
        let fields = self.store.group_fields(name).await?;
        if fields.is_empty() {
            return Err(StateError::NotFound(format!("group {name}")));
        }
        ServerGroup::from_fields(name, &fields)
    }

    /// Register a group, first write wins per field.
    ///
    /// Returns the number of fields that were actually written; 0 means the
    /// group was already fully registered.
    pub async fn register_group(&self, group: &ServerGroup) -> StateResult<usize> {
        self.store.index_group(&group.name).await?;
        let written = self
            .store
            .set_group_fields_nx(&group.name, &group.to_fields())
            .await?;
        debug!(group = %group.name, written, "group registered");
        Ok(written)
    }

    pub async fn remove_group(&self, name: &str) -> StateResult<bool> {
        let removed = self.store.delete_group(name).await?;
        if removed {
            info!(group = %name, "removed server group");
        }
        Ok(removed)
    }

    /// Register every default group whose name is absent from the index.
    /// Returns the names that were seeded.
    pub async fn seed_default_groups(&self) -> StateResult<Vec<String>> {
        let existing = self.store.group_names().await?;
        let mut seeded = Vec::new();
        for group in ServerGroup::defaults() {
            if existing.iter().any(|n| n == &group.name) {
                continue;
            }
            info!(group = %group.name, "missing default group, adding");
            self.register_group(&group).await?;
            seeded.push(group.name);
        }
        let total = existing.len() + seeded.len();
        info!(total, "server groups registered");
        Ok(seeded)
    }

    // ── Statuses ───────────────────────────────────────────────────

    /// Fetch every status record in the namespace, ordered by instance
    /// number within each prefix.
    ///
    /// A key that vanishes between the scan and the read is skipped.
    pub async fn server_statuses(&self) -> StateResult<Vec<StatusEntry>> {
        let pattern = format!("{}*", self.namespace);
        let keys = self.store.status_keys(&pattern).await?;

        let mut entries = Vec::with_capacity(keys.len());
        for key in keys {
            let Some(raw) = self.store.get_status(&key).await? else {
                continue;
            };
            let record = serde_json::from_str::<ServerRecord>(&raw).map_err(|e| {
                StateError::InvalidRecord {
                    key: key.clone(),
                    reason: e.to_string(),
                }
            });
            entries.push(StatusEntry { key, record });
        }

        entries.sort_by_key(|entry| {
            let name = entry.key.strip_prefix(&self.namespace).unwrap_or(&entry.key);
            instance_sort_key(name)
        });
        Ok(entries)
    }

    pub async fn server_status(&self, name: &str) -> StateResult<Option<ServerRecord>> {
        let key = self.status_key(name);
        match self.store.get_status(&key).await? {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| StateError::InvalidRecord {
                    key,
                    reason: e.to_string(),
                }),
            None => Ok(None),
        }
    }

    /// Whether any status record exists under `name`, decodable or not.
    pub async fn server_exists(&self, name: &str) -> StateResult<bool> {
        Ok(self.store.get_status(&self.status_key(name)).await?.is_some())
    }

    /// Write the provisioning placeholder unless a record already exists.
    /// Returns false when the instance had already reported.
    pub async fn register_server(&self, record: &ServerRecord) -> StateResult<bool> {
        if self.server_exists(&record.name).await? {
            return Ok(false);
        }
        self.put_server_status(record).await?;
        Ok(true)
    }

    /// Overwrite an instance's status record.
    pub async fn put_server_status(&self, record: &ServerRecord) -> StateResult<()> {
        let value = serde_json::to_string(record).map_err(|e| StateError::Serialize(e.to_string()))?;
        self.store.put_status(&self.status_key(&record.name), &value).await
    }

    /// Delete an instance's status record. Returns false if it was absent.
    pub async fn remove_server(&self, name: &str) -> StateResult<bool> {
        self.store.delete_status(&self.status_key(name)).await
    }
}
