//! `FleetStore` capability and the embedded redb backend.
//!
//! The trait is the raw key/hash surface the rest of the system consumes;
//! typed decoding lives in [`crate::fleet::Fleet`]. The embedded `StateStore`
//! keeps the same key layout as Redis so the two are interchangeable.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use crate::error::{StateResult, map_err};
use crate::tables::*;

/// Capability over the shared fleet store.
///
/// Every method is safe to call for absent keys: reads return empty values
/// and deletes report whether anything was removed.
pub trait FleetStore: Clone + Send + Sync + 'static {
    /// All names in the group index.
    fn group_names(&self) -> impl Future<Output = StateResult<Vec<String>>> + Send;

    /// Whether `name` is in the group index.
    fn group_indexed(&self, name: &str) -> impl Future<Output = StateResult<bool>> + Send;

    /// Add `name` to the group index.
    fn index_group(&self, name: &str) -> impl Future<Output = StateResult<()>> + Send;

    /// All fields of a group record. Empty when the record is absent.
    fn group_fields(
        &self,
        name: &str,
    ) -> impl Future<Output = StateResult<BTreeMap<String, String>>> + Send;

    /// Set each field only if it is absent. Returns how many were written.
    fn set_group_fields_nx(
        &self,
        name: &str,
        fields: &BTreeMap<String, String>,
    ) -> impl Future<Output = StateResult<usize>> + Send;

    /// Delete a group record and its index entry. Returns true if either existed.
    fn delete_group(&self, name: &str) -> impl Future<Output = StateResult<bool>> + Send;

    /// Status keys matching `pattern`. Only a trailing `*` wildcard is supported.
    fn status_keys(&self, pattern: &str) -> impl Future<Output = StateResult<Vec<String>>> + Send;

    /// Raw status JSON under `key`.
    fn get_status(&self, key: &str) -> impl Future<Output = StateResult<Option<String>>> + Send;

    /// Overwrite the status JSON under `key`.
    fn put_status(&self, key: &str, value: &str) -> impl Future<Output = StateResult<()>> + Send;

    /// Delete the status under `key`. Returns true if it existed.
    fn delete_status(&self, key: &str) -> impl Future<Output = StateResult<bool>> + Send;
}

/// Whether `key` matches a glob `pattern` with an optional trailing `*`.
pub fn key_matches(key: &str, pattern: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => key.starts_with(prefix),
        None => key == pattern,
    }
}

/// Embedded fleet store backed by redb.
///
/// Suitable for a single host where game servers report through the fleet
/// API rather than writing to Redis directly.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStore").finish_non_exhaustive()
    }
}

impl StateStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(GROUPS).map_err(map_err!(Table))?;
        txn.open_table(GROUP_INDEX).map_err(map_err!(Table))?;
        txn.open_table(STATUSES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn read_group_fields(&self, name: &str) -> StateResult<BTreeMap<String, String>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(GROUPS).map_err(map_err!(Table))?;
        match table.get(name).map_err(map_err!(Read))? {
            Some(guard) => serde_json::from_slice(guard.value()).map_err(map_err!(Read)),
            None => Ok(BTreeMap::new()),
        }
    }
}

impl FleetStore for StateStore {
    async fn group_names(&self) -> StateResult<Vec<String>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(GROUP_INDEX).map_err(map_err!(Table))?;
        let mut names = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, _) = entry.map_err(map_err!(Read))?;
            names.push(key.value().to_string());
        }
        Ok(names)
    }

    async fn group_indexed(&self, name: &str) -> StateResult<bool> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(GROUP_INDEX).map_err(map_err!(Table))?;
        Ok(table.get(name).map_err(map_err!(Read))?.is_some())
    }

    async fn index_group(&self, name: &str) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(GROUP_INDEX).map_err(map_err!(Table))?;
            if table.get(name).map_err(map_err!(Read))?.is_none() {
                table.insert(name, epoch_secs()).map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    async fn group_fields(&self, name: &str) -> StateResult<BTreeMap<String, String>> {
        self.read_group_fields(name)
    }

    async fn set_group_fields_nx(
        &self,
        name: &str,
        fields: &BTreeMap<String, String>,
    ) -> StateResult<usize> {
        // Read-modify-write inside one write transaction so concurrent
        // registrations cannot interleave.
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let written;
        {
            let mut table = txn.open_table(GROUPS).map_err(map_err!(Table))?;
            let mut current: BTreeMap<String, String> = match table.get(name).map_err(map_err!(Read))? {
                Some(guard) => serde_json::from_slice(guard.value()).map_err(map_err!(Read))?,
                None => BTreeMap::new(),
            };
            let before = current.len();
            for (key, value) in fields {
                current.entry(key.clone()).or_insert_with(|| value.clone());
            }
            written = current.len() - before;
            let value = serde_json::to_vec(&current).map_err(map_err!(Serialize))?;
            table
                .insert(name, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(group = %name, written, "group fields stored");
        Ok(written)
    }

    async fn delete_group(&self, name: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut groups = txn.open_table(GROUPS).map_err(map_err!(Table))?;
            let mut index = txn.open_table(GROUP_INDEX).map_err(map_err!(Table))?;
            let had_record = groups.remove(name).map_err(map_err!(Write))?.is_some();
            let had_index = index.remove(name).map_err(map_err!(Write))?.is_some();
            existed = had_record || had_index;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(group = %name, existed, "group deleted");
        Ok(existed)
    }

    async fn status_keys(&self, pattern: &str) -> StateResult<Vec<String>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(STATUSES).map_err(map_err!(Table))?;
        let mut keys = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, _) = entry.map_err(map_err!(Read))?;
            if key_matches(key.value(), pattern) {
                keys.push(key.value().to_string());
            }
        }
        Ok(keys)
    }

    async fn get_status(&self, key: &str) -> StateResult<Option<String>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(STATUSES).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => Ok(Some(String::from_utf8_lossy(guard.value()).into_owned())),
            None => Ok(None),
        }
    }

    async fn put_status(&self, key: &str, value: &str) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(STATUSES).map_err(map_err!(Table))?;
            table
                .insert(key, value.as_bytes())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    async fn delete_status(&self, key: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(STATUSES).map_err(map_err!(Table))?;
            existed = table.remove(key).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }
}

fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn key_matches_trailing_wildcard() {
        assert!(key_matches("serverstatus.minecraft.US.Lobby-1", "serverstatus.minecraft.US.*"));
        assert!(!key_matches("servergroups.Lobby", "serverstatus.minecraft.US.*"));
        assert!(key_matches("exact", "exact"));
        assert!(!key_matches("exact-not", "exact"));
    }

    #[tokio::test]
    async fn group_fields_first_write_wins() {
        let store = StateStore::open_in_memory().unwrap();

        let written = store
            .set_group_fields_nx("Lobby", &fields(&[("maxPlayers", "50"), ("prefix", "Lobby")]))
            .await
            .unwrap();
        assert_eq!(written, 2);

        // Re-registering does not overwrite, but fills new fields.
        let written = store
            .set_group_fields_nx("Lobby", &fields(&[("maxPlayers", "80"), ("pvp", "false")]))
            .await
            .unwrap();
        assert_eq!(written, 1);

        let stored = store.group_fields("Lobby").await.unwrap();
        assert_eq!(stored.get("maxPlayers").map(String::as_str), Some("50"));
        assert_eq!(stored.get("pvp").map(String::as_str), Some("false"));
    }

    #[tokio::test]
    async fn absent_group_reads_empty() {
        let store = StateStore::open_in_memory().unwrap();
        assert!(store.group_fields("nope").await.unwrap().is_empty());
        assert!(!store.group_indexed("nope").await.unwrap());
        assert!(!store.delete_group("nope").await.unwrap());
    }

    #[tokio::test]
    async fn group_index_and_delete() {
        let store = StateStore::open_in_memory().unwrap();
        store.index_group("MIN").await.unwrap();
        store.index_group("MIN").await.unwrap();
        store.index_group("NANO").await.unwrap();
        store
            .set_group_fields_nx("MIN", &fields(&[("name", "MIN")]))
            .await
            .unwrap();

        assert_eq!(store.group_names().await.unwrap(), vec!["MIN", "NANO"]);
        assert!(store.group_indexed("MIN").await.unwrap());

        assert!(store.delete_group("MIN").await.unwrap());
        assert!(!store.group_indexed("MIN").await.unwrap());
        assert!(store.group_fields("MIN").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn status_put_scan_delete() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_status("serverstatus.minecraft.US.Lobby-1", "{}").await.unwrap();
        store.put_status("serverstatus.minecraft.US.MIN-1", "{}").await.unwrap();
        store.put_status("other.Lobby-1", "{}").await.unwrap();

        let keys = store.status_keys("serverstatus.minecraft.US.*").await.unwrap();
        assert_eq!(keys.len(), 2);

        assert!(store.delete_status("serverstatus.minecraft.US.Lobby-1").await.unwrap());
        // Second delete is a no-op.
        assert!(!store.delete_status("serverstatus.minecraft.US.Lobby-1").await.unwrap());
        assert!(store.get_status("serverstatus.minecraft.US.Lobby-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("fleet.redb");

        {
            let store = StateStore::open(&db_path).unwrap();
            store.index_group("Lobby").await.unwrap();
            store.put_status("serverstatus.minecraft.US.Lobby-1", r#"{"_name":"Lobby-1"}"#)
                .await
                .unwrap();
        }

        let store = StateStore::open(&db_path).unwrap();
        assert!(store.group_indexed("Lobby").await.unwrap());
        let raw = store.get_status("serverstatus.minecraft.US.Lobby-1").await.unwrap();
        assert_eq!(raw.as_deref(), Some(r#"{"_name":"Lobby-1"}"#));
    }
}
