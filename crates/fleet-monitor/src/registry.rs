//! Pending-action and lifecycle bookkeeping.
//!
//! The registry is owned by the control loop. Decisions insert entries
//! synchronously; dispatch tasks report back with an [`Outcome`] which the
//! loop applies with [`ActionRegistry::complete`].

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use tracing::{debug, info, warn};

/// Why an instance is being retired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum KillReason {
    Empty,
    Finished,
    Cleanup,
    SlowStartup,
    Duplicate,
    Excess,
    Dead,
}

impl fmt::Display for KillReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            KillReason::Empty => "Empty",
            KillReason::Finished => "Finished",
            KillReason::Cleanup => "Cleanup",
            KillReason::SlowStartup => "Slow Startup",
            KillReason::Duplicate => "Duplicate",
            KillReason::Excess => "Excess",
            KillReason::Dead => "Dead",
        };
        f.write_str(s)
    }
}

impl FromStr for KillReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "empty" => Ok(KillReason::Empty),
            "finished" => Ok(KillReason::Finished),
            "cleanup" => Ok(KillReason::Cleanup),
            "slowstartup" => Ok(KillReason::SlowStartup),
            "duplicate" => Ok(KillReason::Duplicate),
            "excess" => Ok(KillReason::Excess),
            "dead" => Ok(KillReason::Dead),
            _ => Err(format!("unknown kill reason {s:?}")),
        }
    }
}

/// Why an instance is being restarted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RestartReason {
    Laggy,
    /// Rolling recycle of an over-provisioned lobby.
    Hygiene,
    /// Requested from the console or API.
    Manual,
}

impl fmt::Display for RestartReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RestartReason::Laggy => "Laggy",
            RestartReason::Hygiene => "Hygiene",
            RestartReason::Manual => "Manual",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Lifecycle {
    Starting,
    Online,
    Restarting,
    Killed,
}

/// A pending action handed to the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Kill(KillReason),
    Restart(RestartReason),
}

/// Result of one dispatched action, sent back to the loop.
#[derive(Debug)]
pub enum Outcome {
    Killed {
        name: String,
        reason: KillReason,
        result: Result<(), String>,
    },
    Restarted {
        name: String,
        reason: RestartReason,
        result: Result<(), String>,
    },
    Created {
        name: String,
        result: Result<(), String>,
    },
}

/// Serializable view of the registry.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RegistrySnapshot {
    pub pending_kill: BTreeMap<String, KillReason>,
    pub pending_restart: BTreeMap<String, RestartReason>,
    pub lifecycle: BTreeMap<String, Lifecycle>,
    pub in_flight: BTreeSet<String>,
}

#[derive(Debug, Default)]
pub struct ActionRegistry {
    pending_kill: BTreeMap<String, KillReason>,
    pending_restart: BTreeMap<String, RestartReason>,
    lifecycle: BTreeMap<String, Lifecycle>,
    /// Names with a kill or restart dispatch outstanding.
    in_flight: BTreeSet<String>,
    /// Names with a create dispatch outstanding.
    creating: BTreeSet<String>,
    /// Last heartbeat seen before a restart was scheduled.
    restart_heartbeat: HashMap<String, u64>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule a kill. Supersedes a pending restart of the same name.
    /// Returns false if a kill was already pending.
    pub fn schedule_kill(&mut self, name: &str, reason: KillReason) -> bool {
        if self.pending_kill.contains_key(name) {
            return false;
        }
        if let Some(restart) = self.pending_restart.remove(name) {
            debug!(server = %name, %restart, "kill supersedes pending restart");
        }
        self.pending_kill.insert(name.to_string(), reason);
        self.lifecycle.insert(name.to_string(), Lifecycle::Killed);
        true
    }

    /// Schedule a restart. Refused while a kill or another restart is
    /// pending. `heartbeat` is the instance's last `currentTime`.
    pub fn schedule_restart(&mut self, name: &str, reason: RestartReason, heartbeat: u64) -> bool {
        if self.pending_kill.contains_key(name) || self.pending_restart.contains_key(name) {
            return false;
        }
        self.pending_restart.insert(name.to_string(), reason);
        self.restart_heartbeat.insert(name.to_string(), heartbeat);
        self.lifecycle.insert(name.to_string(), Lifecycle::Restarting);
        true
    }

    pub fn is_pending(&self, name: &str) -> bool {
        self.pending_kill.contains_key(name) || self.pending_restart.contains_key(name)
    }

    pub fn pending_kill(&self, name: &str) -> Option<KillReason> {
        self.pending_kill.get(name).copied()
    }

    pub fn pending_restart(&self, name: &str) -> Option<RestartReason> {
        self.pending_restart.get(name).copied()
    }

    pub fn lifecycle(&self, name: &str) -> Option<Lifecycle> {
        self.lifecycle.get(name).copied()
    }

    pub fn is_starting(&self, name: &str) -> bool {
        self.lifecycle(name) == Some(Lifecycle::Starting)
    }

    /// Record that a create is about to be issued for `name`.
    pub fn mark_starting(&mut self, name: &str) {
        self.lifecycle.insert(name.to_string(), Lifecycle::Starting);
        self.creating.insert(name.to_string());
    }

    /// Names in lifecycle `Starting` whose prefix matches `prefix`.
    pub fn starting_in_group<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.lifecycle
            .iter()
            .filter(|(_, state)| **state == Lifecycle::Starting)
            .map(|(name, _)| name.as_str())
            .filter(move |name| {
                name.rsplit_once('-')
                    .is_some_and(|(p, _)| p.eq_ignore_ascii_case(prefix))
            })
    }

    /// Note a fresh observation of an instance record.
    pub fn observe(&mut self, name: &str, starting: bool, heartbeat: u64) {
        match self.lifecycle.get(name).copied() {
            None if !starting => {
                self.lifecycle.insert(name.to_string(), Lifecycle::Online);
            }
            Some(Lifecycle::Starting) if !starting && !self.creating.contains(name) => {
                info!(server = %name, "instance online");
                self.lifecycle.insert(name.to_string(), Lifecycle::Online);
            }
            Some(Lifecycle::Restarting) if !starting && !self.pending_restart.contains_key(name) => {
                let before = self.restart_heartbeat.get(name).copied().unwrap_or(0);
                if heartbeat > before {
                    info!(server = %name, "instance back online after restart");
                    self.restart_heartbeat.remove(name);
                    self.lifecycle.insert(name.to_string(), Lifecycle::Online);
                }
            }
            _ => {}
        }
    }

    /// Drop lifecycle entries for names that are gone from the snapshot and
    /// have nothing outstanding.
    pub fn prune(&mut self, live: &BTreeSet<String>) {
        let stale: Vec<String> = self
            .lifecycle
            .iter()
            .filter(|(name, state)| {
                !live.contains(*name)
                    && **state != Lifecycle::Starting
                    && !self.is_pending(name)
                    && !self.in_flight.contains(*name)
            })
            .map(|(name, _)| name.clone())
            .collect();
        for name in stale {
            debug!(server = %name, "forgetting instance");
            self.lifecycle.remove(&name);
            self.restart_heartbeat.remove(&name);
        }
    }

    /// Pending actions without an outstanding dispatch. Each returned entry
    /// is marked in flight.
    pub fn take_dispatchable(&mut self) -> Vec<(String, Action)> {
        let mut actions = Vec::new();
        for (name, reason) in &self.pending_kill {
            if !self.in_flight.contains(name) {
                actions.push((name.clone(), Action::Kill(*reason)));
            }
        }
        for (name, reason) in &self.pending_restart {
            if !self.in_flight.contains(name) {
                actions.push((name.clone(), Action::Restart(*reason)));
            }
        }
        for (name, _) in &actions {
            self.in_flight.insert(name.clone());
        }
        actions
    }

    /// Whether any dispatch has not reported back yet.
    pub fn has_in_flight(&self) -> bool {
        !self.in_flight.is_empty() || !self.creating.is_empty()
    }

    /// Apply a dispatch outcome. Failed actions stay pending.
    pub fn complete(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Killed { name, reason, result } => {
                self.in_flight.remove(&name);
                match result {
                    Ok(()) => {
                        info!(server = %name, %reason, "killed");
                        self.pending_kill.remove(&name);
                        self.restart_heartbeat.remove(&name);
                        self.lifecycle.insert(name, Lifecycle::Killed);
                    }
                    Err(e) => {
                        warn!(server = %name, %reason, error = %e, "kill failed, will retry");
                    }
                }
            }
            Outcome::Restarted { name, reason, result } => {
                self.in_flight.remove(&name);
                match result {
                    Ok(()) => {
                        info!(server = %name, %reason, "restarted");
                        if self.pending_restart.remove(&name).is_some()
                            && !self.pending_kill.contains_key(&name)
                        {
                            self.lifecycle.insert(name, Lifecycle::Restarting);
                        }
                    }
                    Err(e) => {
                        warn!(server = %name, %reason, error = %e, "restart failed, will retry");
                    }
                }
            }
            Outcome::Created { name, result } => {
                self.creating.remove(&name);
                if let Err(e) = result {
                    warn!(server = %name, error = %e, "create failed");
                    if self.is_starting(&name) {
                        self.lifecycle.remove(&name);
                    }
                }
            }
        }
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            pending_kill: self.pending_kill.clone(),
            pending_restart: self.pending_restart.clone(),
            lifecycle: self.lifecycle.clone(),
            in_flight: self
                .in_flight
                .iter()
                .chain(self.creating.iter())
                .cloned()
                .collect(),
        }
    }

    /// True when no name is pending both a kill and a restart.
    pub fn is_exclusive(&self) -> bool {
        self.pending_kill
            .keys()
            .all(|name| !self.pending_restart.contains_key(name))
    }
}
