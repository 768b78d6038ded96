//! Operator console on stdin.
//!
//! One command per line; output and errors go to the log.

use anyhow::{anyhow, bail};
use fleet_monitor::{KillReason, MonitorHandle};
use fleet_state::{Fleet, FleetStore};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

const HELP: &str = "\
commands:
  createserver <servergroup> <name>   create an instance in a group
  killserver <name> [reason]          retire an instance (default reason Cleanup)
  restartserver <name>                restart an instance
  groups                              list server groups
  status                              pending kills, restarts and lifecycle
  help                                this text";

pub struct Console<S> {
    fleet: Fleet<S>,
    monitor: MonitorHandle,
}

impl<S: FleetStore> Console<S> {
    pub fn new(fleet: Fleet<S>, monitor: MonitorHandle) -> Self {
        Self { fleet, monitor }
    }

    /// Run one command line. Blank lines yield `Ok(None)`.
    pub async fn execute(&self, line: &str) -> anyhow::Result<Option<String>> {
        let mut args = line.split_whitespace();
        let Some(command) = args.next() else {
            return Ok(None);
        };
        let args: Vec<&str> = args.collect();

        let output = match command {
            "createserver" => self.create_server(&args).await?,
            "killserver" => self.kill_server(&args).await?,
            "restartserver" => self.restart_server(&args).await?,
            "groups" => self.groups().await?,
            "status" => self.status().await?,
            "help" => HELP.to_string(),
            other => bail!("Can't find command \"{other}\""),
        };
        Ok(Some(output))
    }

    async fn create_server(&self, args: &[&str]) -> anyhow::Result<String> {
        let [group, name, ..] = args else {
            bail!("createserver <servergroup> <name>");
        };
        if !self.fleet.group_exists(group).await? {
            bail!("Server group not found.");
        }
        if self.fleet.server_exists(name).await? {
            bail!("Server already exists with name: {name}");
        }

        let created = self.monitor.create_server(group, name).await?;
        Ok(if created {
            format!("Created server {group}: {name}")
        } else {
            format!("Server {name} already had an instance, registered it in {group}")
        })
    }

    async fn kill_server(&self, args: &[&str]) -> anyhow::Result<String> {
        let [name, rest @ ..] = args else {
            bail!("killserver <name> [reason]");
        };
        let reason = match rest {
            [] => KillReason::Cleanup,
            words => words.join(" ").parse::<KillReason>().map_err(|e| anyhow!(e))?,
        };

        Ok(if self.monitor.kill_server(name, reason).await? {
            format!("Killing {name} ({reason})")
        } else {
            format!("Kill of {name} already pending")
        })
    }

    async fn restart_server(&self, args: &[&str]) -> anyhow::Result<String> {
        let [name, ..] = args else {
            bail!("restartserver <name>");
        };
        Ok(if self.monitor.restart_server(name).await? {
            format!("Restarting {name}")
        } else {
            format!("Restart of {name} refused, another action is pending")
        })
    }

    async fn groups(&self) -> anyhow::Result<String> {
        let mut names = self.fleet.group_names().await?;
        if names.is_empty() {
            return Ok("no server groups".to_string());
        }
        names.sort();

        let mut lines = Vec::with_capacity(names.len());
        for name in names {
            match self.fleet.server_group(&name).await {
                Ok(group) => lines.push(format!(
                    "{} prefix={} total={} joinable={} ports={}+",
                    group.name,
                    group.prefix,
                    group.required_total_servers,
                    group.required_joinable_servers,
                    group.port_section
                )),
                Err(e) => lines.push(format!("{name} unusable: {e}")),
            }
        }
        Ok(lines.join("\n"))
    }

    async fn status(&self) -> anyhow::Result<String> {
        let snapshot = self.monitor.snapshot().await?;
        let mut lines = vec![format!(
            "{} pending kills, {} pending restarts, {} in flight, {} tracked",
            snapshot.pending_kill.len(),
            snapshot.pending_restart.len(),
            snapshot.in_flight.len(),
            snapshot.lifecycle.len()
        )];
        for (name, reason) in &snapshot.pending_kill {
            lines.push(format!("  kill {name} ({reason})"));
        }
        for (name, reason) in &snapshot.pending_restart {
            lines.push(format!("  restart {name} ({reason})"));
        }
        Ok(lines.join("\n"))
    }
}

/// Read commands from stdin until it closes.
pub async fn run<S: FleetStore>(console: Console<S>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    info!("console ready, type help for commands");
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => match console.execute(&line).await {
                Ok(Some(output)) => info!(target: "console", "{output}"),
                Ok(None) => {}
                Err(e) => error!(target: "console", "{e}"),
            },
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "console read failed");
                break;
            }
        }
    }
    info!("console closed");
}
