//! The control loop.
//!
//! A single task owns the [`ActionRegistry`]. Each tick takes one snapshot,
//! classifies it, plans every group and hands the resulting actions to the
//! [`Dispatcher`]. Console and API requests arrive as [`Command`]s through a
//! [`MonitorHandle`]; dispatch outcomes arrive on a second channel.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use fleet_executor::InstanceExecutor;
use fleet_state::{Fleet, FleetStore, ServerGroup, ServerRecord, StateError};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::classifier::{self, is_ignored};
use crate::config::MonitorConfig;
use crate::dispatcher::{Dispatcher, epoch_millis};
use crate::error::{MonitorError, MonitorResult};
use crate::policy::{self, PlanContext};
use crate::provision::Provisioner;
use crate::registry::{Action, ActionRegistry, KillReason, Outcome, RegistrySnapshot, RestartReason};

const COMMAND_QUEUE: usize = 64;

/// Requests from outside the loop.
#[derive(Debug)]
pub enum Command {
    CreateServer {
        group: String,
        name: String,
        reply: oneshot::Sender<MonitorResult<bool>>,
    },
    KillServer {
        name: String,
        reason: KillReason,
        reply: oneshot::Sender<MonitorResult<bool>>,
    },
    RestartServer {
        name: String,
        reply: oneshot::Sender<MonitorResult<bool>>,
    },
    Snapshot {
        reply: oneshot::Sender<RegistrySnapshot>,
    },
}

/// Cloneable sender side of the command channel.
#[derive(Debug, Clone)]
pub struct MonitorHandle {
    commands: mpsc::Sender<Command>,
}

impl MonitorHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> MonitorResult<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(build(tx))
            .await
            .map_err(|_| MonitorError::Unavailable)?;
        rx.await.map_err(|_| MonitorError::Unavailable)
    }

    /// Create `name` in `group`. Resolves once the executor has answered;
    /// `Ok(false)` means the instance already existed.
    pub async fn create_server(&self, group: &str, name: &str) -> MonitorResult<bool> {
        self.request(|reply| Command::CreateServer {
            group: group.to_string(),
            name: name.to_string(),
            reply,
        })
        .await?
    }

    /// Schedule a kill. `Ok(false)` means one was already pending.
    pub async fn kill_server(&self, name: &str, reason: KillReason) -> MonitorResult<bool> {
        self.request(|reply| Command::KillServer {
            name: name.to_string(),
            reason,
            reply,
        })
        .await?
    }

    /// Schedule a manual restart. `Ok(false)` means it was refused because
    /// another action is pending.
    pub async fn restart_server(&self, name: &str) -> MonitorResult<bool> {
        self.request(|reply| Command::RestartServer {
            name: name.to_string(),
            reply,
        })
        .await?
    }

    pub async fn snapshot(&self) -> MonitorResult<RegistrySnapshot> {
        self.request(|reply| Command::Snapshot { reply }).await
    }
}

/// Summary of one tick.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct TickReport {
    pub groups: usize,
    pub records: usize,
    pub kills: Vec<(String, KillReason)>,
    pub restarts: Vec<(String, RestartReason)>,
    pub creates: Vec<String>,
    /// Groups skipped because their policy could not be loaded.
    pub skipped_groups: Vec<String>,
}

pub struct FleetMonitor<S, E> {
    fleet: Fleet<S>,
    config: MonitorConfig,
    provisioner: Provisioner,
    dispatcher: Dispatcher<S, E>,
    registry: ActionRegistry,
    /// Unix seconds of each group's last hygiene restart.
    last_hygiene: HashMap<String, u64>,
    outcomes: mpsc::UnboundedReceiver<Outcome>,
    commands: mpsc::Receiver<Command>,
    command_tx: mpsc::Sender<Command>,
}

impl<S: FleetStore, E: InstanceExecutor> FleetMonitor<S, E> {
    pub fn new(
        fleet: Fleet<S>,
        executor: Arc<E>,
        config: MonitorConfig,
        provisioner: Provisioner,
    ) -> Self {
        let (outcome_tx, outcomes) = mpsc::unbounded_channel();
        let (command_tx, commands) = mpsc::channel(COMMAND_QUEUE);
        Self {
            dispatcher: Dispatcher::new(fleet.clone(), executor, outcome_tx),
            fleet,
            config,
            provisioner,
            registry: ActionRegistry::new(),
            last_hygiene: HashMap::new(),
            outcomes,
            commands,
            command_tx,
        }
    }

    pub fn handle(&self) -> MonitorHandle {
        MonitorHandle {
            commands: self.command_tx.clone(),
        }
    }

    pub fn registry(&self) -> &ActionRegistry {
        &self.registry
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Startup housekeeping: seed the default groups and drop groups whose
    /// server type is never autoscaled.
    pub async fn init(&self) -> MonitorResult<Vec<String>> {
        self.fleet.seed_default_groups().await?;

        let mut removed = Vec::new();
        for name in self.fleet.group_names().await? {
            let group = match self.fleet.server_group(&name).await {
                Ok(group) => group,
                Err(e) => {
                    warn!(group = %name, error = %e, "cannot inspect group during cleanup");
                    continue;
                }
            };
            let kind = group.server_type.to_ascii_lowercase();
            if kind == "player" || kind == "community" {
                self.fleet.remove_group(&name).await?;
                removed.push(name);
            }
        }
        if !removed.is_empty() {
            info!(count = removed.len(), "removed player and community groups");
        }
        Ok(removed)
    }

    /// One iteration at wall-clock `now_ms`.
    ///
    /// Only a failure to list groups or statuses fails the tick; everything
    /// else is isolated to the group or instance it concerns.
    pub async fn tick_at(&mut self, now_ms: u64) -> MonitorResult<TickReport> {
        self.drain_outcomes();

        let mut report = TickReport::default();

        let names = self.fleet.group_names().await?;
        let mut groups = Vec::with_capacity(names.len());
        for name in &names {
            match self.fleet.server_group(name).await {
                Ok(group) => groups.push(group),
                Err(e) => {
                    warn!(group = %name, error = %e, "skipping group");
                    report.skipped_groups.push(name.clone());
                }
            }
        }
        report.groups = groups.len();

        let entries = self.fleet.server_statuses().await?;
        report.records = entries.len();

        let prefixes: Option<HashSet<String>> = report
            .skipped_groups
            .is_empty()
            .then(|| groups.iter().map(|g| g.prefix.to_ascii_lowercase()).collect());

        let classification = classifier::classify(
            &entries,
            self.fleet.namespace(),
            &mut self.registry,
            &self.config,
            now_ms,
            prefixes.as_ref(),
        );
        self.registry.prune(&classification.live);
        report.kills.extend(classification.kills.iter().cloned());
        report.restarts.extend(classification.restarts.iter().cloned());

        let mut taken = classification.live.clone();
        for group in &groups {
            if is_ignored(&group.name) {
                continue;
            }
            self.apply_policy(group, &classification, &mut taken, now_ms, &mut report);
        }

        self.dispatch();

        debug!(
            groups = report.groups,
            records = report.records,
            kills = report.kills.len(),
            restarts = report.restarts.len(),
            creates = report.creates.len(),
            "tick complete"
        );
        Ok(report)
    }

    fn apply_policy(
        &mut self,
        group: &ServerGroup,
        classification: &classifier::Classification,
        taken: &mut BTreeSet<String>,
        now_ms: u64,
        report: &mut TickReport,
    ) {
        let tally = classification.tally(&group.prefix);
        let in_flight = self
            .registry
            .starting_in_group(&group.prefix)
            .filter(|name| !classification.live.contains(*name))
            .count() as u32;

        let now_secs = now_ms / 1000;
        let hygiene_ready = self
            .last_hygiene
            .get(&group.name)
            .is_none_or(|last| now_secs.saturating_sub(*last) >= self.config.hygiene_cooldown_secs);

        let plan = policy::plan_group(
            group,
            &tally,
            PlanContext {
                in_flight,
                hygiene_ready,
            },
            &self.config,
        );

        for name in plan.kills {
            if self.registry.schedule_kill(&name, KillReason::Excess) {
                info!(server = %name, group = %group.name, "retiring excess instance");
                report.kills.push((name, KillReason::Excess));
            }
        }
        if plan.kill_shortfall > 0 {
            warn!(group = %group.name, missing = plan.kill_shortfall, "no empty servers to kill");
        }

        if let Some(name) = plan.hygiene_restart
            && self.registry.schedule_restart(&name, RestartReason::Hygiene, now_ms)
        {
            info!(server = %name, group = %group.name, "hygiene restart");
            self.last_hygiene.insert(group.name.clone(), now_secs);
            report.restarts.push((name, RestartReason::Hygiene));
        }

        for _ in 0..plan.to_add {
            let mut reserved = taken.clone();
            reserved.extend(
                self.registry
                    .starting_in_group(&group.prefix)
                    .map(str::to_string),
            );
            let number = policy::next_instance_number(&group.prefix, &reserved);
            let name = format!("{}-{number}", group.prefix);
            taken.insert(name.clone());

            let port = match Provisioner::port_for(group, number) {
                Ok(port) => port,
                Err(e) => {
                    warn!(group = %group.name, server = %name, error = %e, "cannot provision");
                    break;
                }
            };
            self.start_creation(group, &name, port, None);
            report.creates.push(name);
        }
    }

    /// Mark `name` starting and spawn its creation.
    fn start_creation(
        &mut self,
        group: &ServerGroup,
        name: &str,
        port: u16,
        reply: Option<oneshot::Sender<MonitorResult<bool>>>,
    ) {
        let spec = self.provisioner.spec_for(group, name, port);
        info!(server = %name, group = %group.name, port, "creating instance");
        let mut placeholder = ServerRecord::placeholder(name, &group.prefix, port, epoch_millis());
        placeholder.max_player_count = group.max_players;

        self.registry.mark_starting(name);
        self.dispatcher.create(spec, placeholder, reply);
    }

    /// Hand every undispatched pending action to the dispatcher.
    fn dispatch(&mut self) {
        for (name, action) in self.registry.take_dispatchable() {
            match action {
                Action::Kill(reason) => self.dispatcher.kill(name, reason),
                Action::Restart(reason) => self.dispatcher.restart(name, reason),
            }
        }
    }

    fn drain_outcomes(&mut self) {
        while let Ok(outcome) = self.outcomes.try_recv() {
            self.registry.complete(outcome);
        }
    }

    /// Wait until every dispatched action has reported back.
    pub async fn settle(&mut self) {
        while self.registry.has_in_flight() {
            match self.outcomes.recv().await {
                Some(outcome) => self.registry.complete(outcome),
                None => break,
            }
        }
    }

    /// Apply one command. `run` calls this for everything received on the
    /// handle's channel.
    pub async fn handle_command(&mut self, command: Command) {
        match command {
            Command::CreateServer { group, name, reply } => {
                match self.prepare_create(&group, &name).await {
                    // The dispatch task answers once the executor has.
                    Ok((group, port)) => self.start_creation(&group, &name, port, Some(reply)),
                    Err(e) => {
                        debug!(server = %name, error = %e, "createserver rejected");
                        let _ = reply.send(Err(e));
                    }
                }
            }
            Command::KillServer { name, reason, reply } => {
                let result = self.kill_server(&name, reason).await;
                let _ = reply.send(result);
            }
            Command::RestartServer { name, reply } => {
                let result = self.restart_server(&name).await;
                let _ = reply.send(result);
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.registry.snapshot());
            }
        }
        self.dispatch();
    }

    /// Validate a manual create and resolve the instance port.
    async fn prepare_create(&self, group_name: &str, name: &str) -> MonitorResult<(ServerGroup, u16)> {
        if !self.fleet.group_exists(group_name).await? {
            return Err(MonitorError::NotFound(format!("server group {group_name}")));
        }
        if !policy::is_valid_name(name) {
            return Err(MonitorError::InvalidName(format!(
                "{name} may only contain letters, digits, '_', '.' and '-'"
            )));
        }
        let number = policy::instance_number(name)
            .ok_or_else(|| MonitorError::InvalidName(format!("{name} has no instance number")))?;
        if self.fleet.server_exists(name).await?
            || self.registry.is_starting(name)
            || self.registry.is_pending(name)
        {
            return Err(MonitorError::AlreadyExists(name.to_string()));
        }
        let group = self.fleet.server_group(group_name).await?;
        let port = Provisioner::port_for(&group, number)?;
        Ok((group, port))
    }

    async fn kill_server(&mut self, name: &str, reason: KillReason) -> MonitorResult<bool> {
        if !self.fleet.server_exists(name).await? && !self.registry.is_starting(name) {
            return Err(MonitorError::NotFound(format!("server {name}")));
        }
        let scheduled = self.registry.schedule_kill(name, reason);
        if scheduled {
            info!(server = %name, %reason, "kill requested");
        }
        Ok(scheduled)
    }

    async fn restart_server(&mut self, name: &str) -> MonitorResult<bool> {
        let heartbeat = match self.fleet.server_status(name).await {
            Ok(Some(record)) => record.current_time,
            Ok(None) => return Err(MonitorError::NotFound(format!("server {name}"))),
            Err(StateError::InvalidRecord { .. }) => 0,
            Err(e) => return Err(e.into()),
        };
        let scheduled = self
            .registry
            .schedule_restart(name, RestartReason::Manual, heartbeat);
        if scheduled {
            info!(server = %name, "restart requested");
        }
        Ok(scheduled)
    }

    /// Run until `shutdown` flips. Ticks are spaced by the configured delay
    /// measured from the end of the previous tick.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        let interval = self.config.tick_interval();
        info!(interval_ms = self.config.tick_ms, "fleet monitor started");

        let sleep = tokio::time::sleep(interval);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut sleep => {
                    if let Err(e) = self.tick_at(epoch_millis()).await {
                        error!(error = %e, "monitor tick failed");
                    }
                    sleep.as_mut().reset(Instant::now() + interval);
                }
                Some(command) = self.commands.recv() => {
                    self.handle_command(command).await;
                }
                Some(outcome) = self.outcomes.recv() => {
                    self.registry.complete(outcome);
                }
                _ = shutdown.changed() => {
                    info!("fleet monitor shutting down");
                    break;
                }
            }
        }
    }
}
