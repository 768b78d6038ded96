//! Redis backend for the fleet store.
//!
//! Game servers write their status documents straight into this Redis, so
//! the key layout here is the contract with the game-server plugin.

use std::collections::BTreeMap;
use std::fmt;

use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tracing::{debug, info};

use crate::error::{StateResult, map_err};
use crate::store::FleetStore;
use crate::types::{GROUP_INDEX_KEY, group_key};

/// Shared fleet store over a multiplexed Redis connection.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore")
            .field("connection", &"ConnectionManager")
            .finish()
    }
}

impl RedisStore {
    /// Connect to `redis://{host}:{port}`.
    pub async fn connect(host: &str, port: u16) -> StateResult<Self> {
        Self::connect_url(&format!("redis://{host}:{port}")).await
    }

    pub async fn connect_url(url: &str) -> StateResult<Self> {
        info!(%url, "connecting to fleet store");

        let client = redis::Client::open(url).map_err(map_err!(Connection))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(map_err!(Connection))?;

        info!("fleet store connected");
        Ok(Self { conn })
    }
}

impl FleetStore for RedisStore {
    async fn group_names(&self) -> StateResult<Vec<String>> {
        let mut conn = self.conn.clone();
        let mut names: Vec<String> = conn
            .smembers(GROUP_INDEX_KEY)
            .await
            .map_err(map_err!(Read))?;
        names.sort();
        Ok(names)
    }

    async fn group_indexed(&self, name: &str) -> StateResult<bool> {
        let mut conn = self.conn.clone();
        conn.sismember(GROUP_INDEX_KEY, name)
            .await
            .map_err(map_err!(Read))
    }

    async fn index_group(&self, name: &str) -> StateResult<()> {
        let mut conn = self.conn.clone();
        conn.sadd::<_, _, ()>(GROUP_INDEX_KEY, name)
            .await
            .map_err(map_err!(Write))
    }

    async fn group_fields(&self, name: &str) -> StateResult<BTreeMap<String, String>> {
        let mut conn = self.conn.clone();
        conn.hgetall(group_key(name))
            .await
            .map_err(map_err!(Read))
    }

    async fn set_group_fields_nx(
        &self,
        name: &str,
        fields: &BTreeMap<String, String>,
    ) -> StateResult<usize> {
        if fields.is_empty() {
            return Ok(0);
        }
        let key = group_key(name);
        let mut pipe = redis::pipe();
        for (field, value) in fields {
            pipe.hset_nx(&key, field, value);
        }

        let mut conn = self.conn.clone();
        let results: Vec<bool> = pipe.query_async(&mut conn).await.map_err(map_err!(Write))?;
        let written = results.into_iter().filter(|w| *w).count();
        debug!(group = %name, written, "group fields stored");
        Ok(written)
    }

    async fn delete_group(&self, name: &str) -> StateResult<bool> {
        let mut conn = self.conn.clone();
        let removed: (u32, u32) = redis::pipe()
            .del(group_key(name))
            .srem(GROUP_INDEX_KEY, name)
            .query_async(&mut conn)
            .await
            .map_err(map_err!(Write))?;
        debug!(group = %name, ?removed, "group deleted");
        Ok(removed.0 > 0 || removed.1 > 0)
    }

    async fn status_keys(&self, pattern: &str) -> StateResult<Vec<String>> {
        let mut conn = self.conn.clone();
        conn.keys(pattern).await.map_err(map_err!(Read))
    }

    async fn get_status(&self, key: &str) -> StateResult<Option<String>> {
        let mut conn = self.conn.clone();
        conn.get(key).await.map_err(map_err!(Read))
    }

    async fn put_status(&self, key: &str, value: &str) -> StateResult<()> {
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(key, value)
            .await
            .map_err(map_err!(Write))
    }

    async fn delete_status(&self, key: &str) -> StateResult<bool> {
        let mut conn = self.conn.clone();
        let removed: u32 = conn.del(key).await.map_err(map_err!(Write))?;
        Ok(removed > 0)
    }
}
