//! Per-tick classification of instance status records.
//!
//! One pass over the snapshot. Health verdicts (dead, laggy, finished,
//! orphaned, slow to start) are written straight into the
//! [`ActionRegistry`]; everything else is tallied per group for the policy
//! engine.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use fleet_state::{ServerRecord, StatusEntry};
use tracing::{debug, warn};

use crate::config::MonitorConfig;
use crate::registry::{ActionRegistry, KillReason, RestartReason};

/// Groups that are never killed for being finished or scaled.
pub const IGNORED_GROUPS: [&str; 2] = ["clans", "testing"];

/// Motds under which an instance accepts new players.
const JOINABLE_MOTDS: [&str; 5] = ["", "voting", "starting", "waiting", "always_open"];

/// Free slots an instance with an empty motd must have to count as joinable.
const OPEN_SLOT_MARGIN: u32 = 20;

pub fn is_ignored(group: &str) -> bool {
    IGNORED_GROUPS.iter().any(|g| g.eq_ignore_ascii_case(group))
}

pub fn is_starting(record: &ServerRecord) -> bool {
    record.motd.to_ascii_lowercase().contains("starting")
}

pub fn is_joinable(record: &ServerRecord) -> bool {
    let motd = record.motd.to_ascii_lowercase();
    JOINABLE_MOTDS.contains(&motd.as_str())
        && record.player_count < record.max_player_count
        && (!motd.is_empty()
            || record.max_player_count - record.player_count > OPEN_SLOT_MARGIN)
}

pub fn is_finished(record: &ServerRecord, group: &str) -> bool {
    let motd = record.motd.to_ascii_lowercase();
    motd.contains("finished")
        || (group.eq_ignore_ascii_case("ultrahardcore")
            && motd.contains("restarting")
            && record.player_count == 0)
}

/// Aggregate for one group, keyed by lower-cased `group` field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupTally {
    pub total: u32,
    pub joinable: u32,
    /// Empty, fully booted instances in snapshot order.
    pub empties: Vec<String>,
    pub players: u32,
}

/// Result of classifying one snapshot.
#[derive(Debug, Default)]
pub struct Classification {
    pub tallies: BTreeMap<String, GroupTally>,
    /// Every instance name in the snapshot, starting and pending included.
    pub live: BTreeSet<String>,
    /// Newly scheduled this pass.
    pub kills: Vec<(String, KillReason)>,
    pub restarts: Vec<(String, RestartReason)>,
    pub invalid: usize,
}

impl Classification {
    pub fn tally(&self, prefix: &str) -> GroupTally {
        self.tallies
            .get(&prefix.to_ascii_lowercase())
            .cloned()
            .unwrap_or_default()
    }
}

/// Classify a snapshot.
///
/// `known_prefixes` holds the lower-cased prefixes of every loaded group.
/// Pass `None` when some group failed to load; orphan detection is then
/// skipped for the tick.
pub fn classify(
    entries: &[StatusEntry],
    namespace: &str,
    registry: &mut ActionRegistry,
    config: &MonitorConfig,
    now_ms: u64,
    known_prefixes: Option<&HashSet<String>>,
) -> Classification {
    let mut out = Classification::default();
    let now_secs = now_ms / 1000;

    for entry in entries {
        let key_name = entry.key.strip_prefix(namespace).unwrap_or(&entry.key);
        out.live.insert(key_name.to_string());

        let record = match &entry.record {
            Ok(record) => record,
            Err(e) => {
                if !registry.is_pending(key_name) {
                    warn!(key = %entry.key, error = %e, "skipping unreadable status record");
                }
                out.invalid += 1;
                continue;
            }
        };
        let name = record.name.as_str();
        if name != key_name {
            // Actions target `_name`; acting on a foreign name would hit
            // another instance's container and record.
            warn!(key = %entry.key, server = %name, "status record name does not match its key");
            out.invalid += 1;
            continue;
        }

        if registry.is_pending(name) {
            continue;
        }

        let Some(group) = record.group() else {
            warn!(server = %name, "status record has no group");
            out.invalid += 1;
            continue;
        };

        let starting = is_starting(record);
        registry.observe(name, starting, record.current_time);

        if starting {
            if record.start_up_date != 0
                && now_secs.saturating_sub(record.start_up_date) > config.startup_timeout_secs
            {
                schedule_kill(&mut out, registry, name, KillReason::SlowStartup);
                continue;
            }
            // Booting instances count toward capacity but are never picked
            // as excess.
            let tally = out.tallies.entry(group.to_ascii_lowercase()).or_default();
            tally.total += 1;
            tally.players += record.player_count;
            if is_joinable(record) {
                tally.joinable += 1;
            }
            continue;
        }

        if now_ms.saturating_sub(record.current_time) > config.stale_timeout_ms {
            schedule_kill(&mut out, registry, name, KillReason::Dead);
            continue;
        }

        let ignored = is_ignored(group);
        if !ignored && is_finished(record, group) {
            schedule_kill(&mut out, registry, name, KillReason::Finished);
            continue;
        }

        if record.tps <= config.restart_tps {
            if registry.schedule_restart(name, RestartReason::Laggy, record.current_time) {
                warn!(server = %name, tps = record.tps, "restarting laggy instance");
                out.restarts.push((name.to_string(), RestartReason::Laggy));
            }
            continue;
        } else if record.tps <= config.warn_tps {
            warn!(server = %name, tps = record.tps, "running poorly");
        }

        if let Some(prefixes) = known_prefixes
            && !ignored
            && !prefixes.contains(&group.to_ascii_lowercase())
        {
            warn!(server = %name, group = %group, "instance belongs to no known group");
            schedule_kill(&mut out, registry, name, KillReason::Cleanup);
            continue;
        }

        let tally = out.tallies.entry(group.to_ascii_lowercase()).or_default();
        tally.total += 1;
        tally.players += record.player_count;
        if is_joinable(record) {
            tally.joinable += 1;
        }
        if record.player_count == 0 {
            tally.empties.push(name.to_string());
        }
    }

    debug!(
        records = entries.len(),
        groups = out.tallies.len(),
        kills = out.kills.len(),
        restarts = out.restarts.len(),
        "snapshot classified"
    );
    out
}

fn schedule_kill(out: &mut Classification, registry: &mut ActionRegistry, name: &str, reason: KillReason) {
    if registry.schedule_kill(name, reason) {
        debug!(server = %name, %reason, "kill scheduled");
        out.kills.push((name.to_string(), reason));
    }
}
