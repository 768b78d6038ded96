//! Scaling policy: how many instances a group should gain or lose this tick.
//!
//! Pure functions over a [`GroupTally`]; the monitor applies the plan.

use std::collections::BTreeSet;

use fleet_state::ServerGroup;

use crate::classifier::GroupTally;
use crate::config::MonitorConfig;

/// Player slots one surplus lobby instance must leave free before it may
/// be retired.
const LOBBY_SLOTS_PER_KILL: i64 = 80;

/// What the policy wants for one group.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupPlan {
    pub to_add: u32,
    /// Empty instances to retire, tail of the empty list first.
    pub kills: Vec<String>,
    /// Kills that were wanted but had no empty instance to take.
    pub kill_shortfall: u32,
    pub hygiene_restart: Option<String>,
}

/// Inputs beyond the group and its tally.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlanContext {
    /// Creations issued but not yet visible in the snapshot.
    pub in_flight: u32,
    /// Whether the group's hygiene cooldown has elapsed.
    pub hygiene_ready: bool,
}

/// Surplus instances to retire under the default rule.
pub fn excess(group: &ServerGroup, tally: &GroupTally) -> u32 {
    if tally.total > group.required_total_servers
        && tally.joinable > group.required_joinable_servers
    {
        tally.joinable - group.required_joinable_servers
    } else {
        0
    }
}

/// Instances missing under the default rule.
pub fn shortfall(group: &ServerGroup, tally: &GroupTally) -> u32 {
    let total = group.required_total_servers.saturating_sub(tally.total);
    let joinable = group
        .required_joinable_servers
        .saturating_sub(tally.joinable);
    total.max(joinable)
}

/// Player slots the lobby can still absorb. Capacity is `maxPlayers` per
/// counted instance, so a lobby with no instances has none.
pub fn lobby_available_slots(group: &ServerGroup, tally: &GroupTally) -> i64 {
    i64::from(group.max_players) * i64::from(tally.total) - i64::from(tally.players)
}

pub fn plan_group(
    group: &ServerGroup,
    tally: &GroupTally,
    ctx: PlanContext,
    config: &MonitorConfig,
) -> GroupPlan {
    let mut to_kill = excess(group, tally);
    let mut to_add;
    let mut hygiene = false;

    if group.is_lobby() {
        to_add = 0;
        let available = lobby_available_slots(group, tally);
        let minimum = config.lobby_minimum_available_slots;
        let per_instance = i64::from(group.max_players.max(1));

        if available < minimum {
            to_add = ((minimum - available) / per_instance).max(1) as u32;
            to_kill = 0;
        } else {
            if to_kill > 0 {
                let allowed = ((available - minimum) / LOBBY_SLOTS_PER_KILL).max(0) as u32;
                to_kill = to_kill.min(allowed);
            }
            // Over target but the throttle leaves nothing to retire:
            // recycle one idle instance instead.
            if to_kill == 0
                && tally.joinable > group.required_joinable_servers
                && tally.total > group.required_total_servers
            {
                hygiene = ctx.hygiene_ready;
            }
        }
    } else {
        to_add = shortfall(group, tally);
    }

    to_add = to_add.saturating_sub(ctx.in_flight);

    let mut empties = tally.empties.clone();
    let mut kills = Vec::new();
    while to_kill > 0 {
        let Some(name) = empties.pop() else {
            break;
        };
        kills.push(name);
        to_kill -= 1;
    }

    let hygiene_restart = if hygiene { empties.pop() } else { None };

    GroupPlan {
        to_add,
        kills,
        kill_shortfall: to_kill,
        hygiene_restart,
    }
}

/// Smallest `N >= 1` such that `{prefix}-{N}` is not taken.
pub fn next_instance_number(prefix: &str, taken: &BTreeSet<String>) -> u32 {
    let lowered: BTreeSet<String> = taken.iter().map(|n| n.to_ascii_lowercase()).collect();
    let prefix = prefix.to_ascii_lowercase();
    (1..)
        .find(|n| !lowered.contains(&format!("{prefix}-{n}")))
        .unwrap_or(1)
}

/// Parse the trailing instance number from `Prefix-N`.
pub fn instance_number(name: &str) -> Option<u32> {
    name.rsplit_once('-')
        .and_then(|(_, n)| n.parse::<u32>().ok())
        .filter(|n| *n > 0)
}

/// Instance names double as container names and URI path segments.
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}
