//! Domain types for the fleet state store.
//!
//! `ServerGroup` is stored as a flat string hash and decoded with
//! [`ServerGroup::from_fields`]; `ServerRecord` is the JSON document each
//! game server writes about itself.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{StateError, StateResult};

/// Set holding every registered group name.
pub const GROUP_INDEX_KEY: &str = "servergroups";

/// Namespace prefix for instance status keys.
pub const DEFAULT_STATUS_NAMESPACE: &str = "serverstatus.minecraft.US.";

/// Hash key for a group's policy record.
pub fn group_key(name: &str) -> String {
    format!("{GROUP_INDEX_KEY}.{name}")
}

/// Field names used in the stored group hash.
pub mod field {
    pub const NAME: &str = "name";
    pub const HOST: &str = "host";
    pub const PREFIX: &str = "prefix";
    pub const MIN_PLAYERS: &str = "minPlayers";
    pub const MAX_PLAYERS: &str = "maxPlayers";
    pub const HARD_MAX_PLAYER_CAP: &str = "hardMaxPlayerCap";
    pub const RAM: &str = "ram";
    pub const CPU: &str = "cpu";
    pub const JOINABLE_SERVERS: &str = "joinableServers";
    pub const TOTAL_SERVERS: &str = "totalServers";
    pub const ARCADE_GROUP: &str = "arcadeGroup";
    pub const WORLD_ZIP: &str = "worldZip";
    pub const PLUGIN: &str = "plugin";
    pub const CONFIG_PATH: &str = "configPath";
    pub const PORT_SECTION: &str = "portSection";
    pub const SERVER_TYPE: &str = "serverType";

    /// Every field with a typed home on `ServerGroup`. Anything else in the
    /// hash is an opaque gameplay flag.
    pub const TYPED: &[&str] = &[
        NAME,
        HOST,
        PREFIX,
        MIN_PLAYERS,
        MAX_PLAYERS,
        HARD_MAX_PLAYER_CAP,
        RAM,
        CPU,
        JOINABLE_SERVERS,
        TOTAL_SERVERS,
        ARCADE_GROUP,
        WORLD_ZIP,
        PLUGIN,
        CONFIG_PATH,
        PORT_SECTION,
        SERVER_TYPE,
    ];
}

// ── Server group ──────────────────────────────────────────────────

/// Scaling and provisioning policy for a pool of game servers sharing a
/// prefix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerGroup {
    pub name: String,
    /// Routing key matched case-insensitively against `ServerRecord::group`.
    pub prefix: String,
    pub host: String,
    pub min_players: u32,
    pub max_players: u32,
    pub hard_max_player_cap: u32,
    /// Minimum number of instances the group keeps alive.
    pub required_total_servers: u32,
    /// Minimum number of instances accepting new players.
    pub required_joinable_servers: u32,
    /// Base port; instance `N` listens on `port_section + N`.
    pub port_section: u16,
    pub world_zip: String,
    pub plugin: String,
    pub config_path: String,
    /// Memory hint in megabytes.
    pub required_ram: u32,
    /// CPU hint in whole cores.
    pub required_cpu: u32,
    pub server_type: String,
    pub arcade_group: bool,
    /// Gameplay and ops toggles (pvp, mapVoting, rewardGems, whitelist, ...).
    /// Opaque to the monitor, forwarded to provisioning.
    pub flags: BTreeMap<String, String>,
}

impl Default for ServerGroup {
    fn default() -> Self {
        Self {
            name: String::new(),
            prefix: String::new(),
            host: String::new(),
            min_players: 1,
            max_players: 16,
            hard_max_player_cap: 0,
            required_total_servers: 0,
            required_joinable_servers: 0,
            port_section: 0,
            world_zip: String::new(),
            plugin: String::new(),
            config_path: String::new(),
            required_ram: 1024,
            required_cpu: 1,
            server_type: "Dedicated".to_string(),
            arcade_group: false,
            flags: BTreeMap::new(),
        }
    }
}

impl ServerGroup {
    pub fn new(name: &str, prefix: &str, port_section: u16) -> Self {
        Self {
            name: name.to_string(),
            prefix: prefix.to_string(),
            port_section,
            ..Self::default()
        }
    }

    /// Set an opaque flag, builder style.
    pub fn with_flag(mut self, key: &str, value: impl ToString) -> Self {
        self.flags.insert(key.to_string(), value.to_string());
        self
    }

    /// Read an opaque boolean flag. Missing or unparsable reads as `false`.
    pub fn flag(&self, key: &str) -> bool {
        self.flags
            .get(key)
            .is_some_and(|v| v.eq_ignore_ascii_case("true"))
    }

    /// Whether the group name is `lobby` (any case).
    pub fn is_lobby(&self) -> bool {
        self.name.eq_ignore_ascii_case("lobby")
    }

    /// Whether `group` (an instance's self-reported group) routes here.
    pub fn matches(&self, group: &str) -> bool {
        self.prefix.eq_ignore_ascii_case(group)
    }

    /// Flatten into the stored hash representation.
    pub fn to_fields(&self) -> BTreeMap<String, String> {
        let mut fields = self.flags.clone();
        let typed = [
            (field::NAME, self.name.clone()),
            (field::HOST, self.host.clone()),
            (field::PREFIX, self.prefix.clone()),
            (field::MIN_PLAYERS, self.min_players.to_string()),
            (field::MAX_PLAYERS, self.max_players.to_string()),
            (field::HARD_MAX_PLAYER_CAP, self.hard_max_player_cap.to_string()),
            (field::RAM, self.required_ram.to_string()),
            (field::CPU, self.required_cpu.to_string()),
            (field::JOINABLE_SERVERS, self.required_joinable_servers.to_string()),
            (field::TOTAL_SERVERS, self.required_total_servers.to_string()),
            (field::ARCADE_GROUP, self.arcade_group.to_string()),
            (field::WORLD_ZIP, self.world_zip.clone()),
            (field::PLUGIN, self.plugin.clone()),
            (field::CONFIG_PATH, self.config_path.clone()),
            (field::PORT_SECTION, self.port_section.to_string()),
            (field::SERVER_TYPE, self.server_type.clone()),
        ];
        for (key, value) in typed {
            fields.insert(key.to_string(), value);
        }
        fields
    }

    /// Decode a stored hash.
    ///
    /// Fails closed: a missing or unparsable required field yields
    /// `MalformedPolicy` rather than a group with zeroed targets.
    pub fn from_fields(group: &str, fields: &BTreeMap<String, String>) -> StateResult<Self> {
        let decoder = FieldDecoder { group, fields };
        let defaults = Self::default();

        let flags = fields
            .iter()
            .filter(|(k, _)| !field::TYPED.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        Ok(Self {
            name: decoder.required_str(field::NAME)?,
            prefix: decoder.required_str(field::PREFIX)?,
            host: decoder.optional_str(field::HOST),
            min_players: decoder.optional(field::MIN_PLAYERS, defaults.min_players)?,
            max_players: decoder.required(field::MAX_PLAYERS)?,
            hard_max_player_cap: decoder
                .optional(field::HARD_MAX_PLAYER_CAP, defaults.hard_max_player_cap)?,
            required_total_servers: decoder.required(field::TOTAL_SERVERS)?,
            required_joinable_servers: decoder.required(field::JOINABLE_SERVERS)?,
            port_section: decoder.required(field::PORT_SECTION)?,
            world_zip: decoder.optional_str(field::WORLD_ZIP),
            plugin: decoder.optional_str(field::PLUGIN),
            config_path: decoder.optional_str(field::CONFIG_PATH),
            required_ram: decoder.optional(field::RAM, defaults.required_ram)?,
            required_cpu: decoder.optional(field::CPU, defaults.required_cpu)?,
            server_type: decoder.required_str(field::SERVER_TYPE)?,
            arcade_group: decoder.optional(field::ARCADE_GROUP, false)?,
            flags,
        })
    }

    // ── Seeds ─────────────────────────────────────────────────────

    /// The hub lobby.
    pub fn lobby() -> Self {
        let mut lobby = Self::new("Lobby", "Lobby", 25700).with_flag("addNoCheat", true);
        lobby.max_players = 50;
        lobby.required_total_servers = 1;
        lobby.required_joinable_servers = 1;
        lobby.plugin = "Hub.jar".to_string();
        lobby.world_zip = "Lobby_HUB.zip".to_string();
        lobby.server_type = "Lobby".to_string();
        lobby
    }

    /// Mixed arcade minigame pool.
    pub fn mixed_arcade() -> Self {
        let mut min = Self::arcade_pool("MIN", 25800)
            .with_flag("games", "Skywars,SurvivalGames");
        min.plugin = "Arcade.jar".to_string();
        min
    }

    /// Nano minigame pool.
    pub fn nano() -> Self {
        let mut nano = Self::arcade_pool("NANO", 25900);
        nano.plugin = "Nano.jar".to_string();
        nano
    }

    fn arcade_pool(name: &str, port_section: u16) -> Self {
        let mut group = Self::new(name, name, port_section)
            .with_flag("addNoCheat", true)
            .with_flag("pvp", true)
            .with_flag("mapVoting", true)
            .with_flag("rewardAchievements", true)
            .with_flag("rewardGems", true)
            .with_flag("rewardItems", true)
            .with_flag("rewardStats", true)
            .with_flag("gameAutoStart", true);
        group.arcade_group = true;
        group.max_players = 16;
        group.min_players = 2;
        group.required_total_servers = 1;
        group.required_joinable_servers = 1;
        group.server_type = "Minigames".to_string();
        group.world_zip = "Lobby_ARCADE.zip".to_string();
        group
    }

    /// Groups seeded at startup when absent from the index.
    pub fn defaults() -> Vec<Self> {
        vec![Self::lobby(), Self::mixed_arcade(), Self::nano()]
    }
}

struct FieldDecoder<'a> {
    group: &'a str,
    fields: &'a BTreeMap<String, String>,
}

impl FieldDecoder<'_> {
    fn malformed(&self, reason: String) -> StateError {
        StateError::MalformedPolicy {
            group: self.group.to_string(),
            reason,
        }
    }

    fn required_str(&self, key: &str) -> StateResult<String> {
        match self.fields.get(key).map(|v| v.trim()) {
            Some(v) if !v.is_empty() && v != "undefined" => Ok(v.to_string()),
            _ => Err(self.malformed(format!("missing field `{key}`"))),
        }
    }

    fn optional_str(&self, key: &str) -> String {
        match self.fields.get(key).map(|v| v.trim()) {
            Some(v) if v != "undefined" => v.to_string(),
            _ => String::new(),
        }
    }

    fn required<T: std::str::FromStr>(&self, key: &str) -> StateResult<T> {
        let raw = self.required_str(key)?;
        raw.parse()
            .map_err(|_| self.malformed(format!("field `{key}` has invalid value {raw:?}")))
    }

    fn optional<T: std::str::FromStr>(&self, key: &str, default: T) -> StateResult<T> {
        match self.fields.get(key).map(|v| v.trim()) {
            None | Some("") | Some("undefined") => Ok(default),
            Some(raw) => raw
                .parse()
                .map_err(|_| self.malformed(format!("field `{key}` has invalid value {raw:?}"))),
        }
    }
}

// ── Server record ─────────────────────────────────────────────────

/// Self-reported status of one game-server instance.
///
/// Field names keep the leading underscore the game-server plugin writes.
/// Timestamps arrive either as numbers or numeric strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerRecord {
    #[serde(rename = "_name")]
    pub name: String,
    /// Prefix of the owning group. `None` when the instance wrote null.
    #[serde(rename = "_group", default)]
    pub group: Option<String>,
    #[serde(rename = "_motd", default, deserialize_with = "nullable_string")]
    pub motd: String,
    #[serde(rename = "_playerCount", default)]
    pub player_count: u32,
    #[serde(rename = "_maxPlayerCount", default)]
    pub max_player_count: u32,
    #[serde(rename = "_tps", default)]
    pub tps: f64,
    #[serde(rename = "_ram", default)]
    pub ram: u64,
    #[serde(rename = "_maxRam", default)]
    pub max_ram: u64,
    #[serde(rename = "_publicAddress", default, deserialize_with = "nullable_string")]
    pub public_address: String,
    #[serde(rename = "_port", default)]
    pub port: u16,
    #[serde(rename = "_donorsOnline", default)]
    pub donors_online: u32,
    /// Boot time, unix seconds.
    #[serde(
        rename = "_startUpDate",
        default,
        deserialize_with = "lenient_u64",
        serialize_with = "u64_as_string"
    )]
    pub start_up_date: u64,
    /// Last heartbeat, unix milliseconds.
    #[serde(
        rename = "_currentTime",
        default,
        deserialize_with = "lenient_u64",
        serialize_with = "u64_as_string"
    )]
    pub current_time: u64,
}

impl ServerRecord {
    /// The record the controller writes when it provisions an instance.
    /// The instance overwrites it once it boots.
    pub fn placeholder(name: &str, group: &str, port: u16, now_ms: u64) -> Self {
        Self {
            name: name.to_string(),
            group: Some(group.to_string()),
            motd: "Starting".to_string(),
            player_count: 0,
            max_player_count: 0,
            tps: 20.0,
            ram: 0,
            max_ram: 0,
            public_address: String::new(),
            port,
            donors_online: 0,
            start_up_date: now_ms / 1000,
            current_time: now_ms,
        }
    }

    /// The group field, if present and non-blank.
    pub fn group(&self) -> Option<&str> {
        self.group.as_deref().map(str::trim).filter(|g| !g.is_empty())
    }
}

fn nullable_string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(d)?.unwrap_or_default())
}

fn lenient_u64<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
    use serde::de::Error;

    match serde_json::Value::deserialize(d)? {
        serde_json::Value::Null => Ok(0),
        serde_json::Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            .ok_or_else(|| D::Error::custom(format!("invalid timestamp {n}"))),
        serde_json::Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                return Ok(0);
            }
            s.parse::<u64>()
                .or_else(|_| s.parse::<f64>().map(|f| f.max(0.0) as u64))
                .map_err(|_| D::Error::custom(format!("invalid timestamp {s:?}")))
        }
        other => Err(D::Error::custom(format!("invalid timestamp {other}"))),
    }
}

fn u64_as_string<S: Serializer>(value: &u64, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&value.to_string())
}

/// Sort key that orders `Lobby-2` before `Lobby-10`.
pub fn instance_sort_key(name: &str) -> (String, u64, String) {
    match name.rsplit_once('-') {
        Some((prefix, n)) => match n.parse::<u64>() {
            Ok(n) => (prefix.to_ascii_lowercase(), n, name.to_string()),
            Err(_) => (name.to_ascii_lowercase(), 0, name.to_string()),
        },
        None => (name.to_ascii_lowercase(), 0, name.to_string()),
    }
}
