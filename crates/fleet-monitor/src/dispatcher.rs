//! Executes registry actions against the executor and the store.
//!
//! Every call spawns a task that reports its [`Outcome`] on the loop's
//! channel. The dispatcher never touches the registry itself.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use fleet_executor::{InstanceExecutor, InstanceSpec};
use fleet_state::{Fleet, FleetStore, ServerRecord};
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};

use crate::error::MonitorResult;
use crate::registry::{KillReason, Outcome, RestartReason};

pub struct Dispatcher<S, E> {
    fleet: Fleet<S>,
    executor: Arc<E>,
    outcomes: mpsc::UnboundedSender<Outcome>,
}

impl<S, E> Clone for Dispatcher<S, E>
where
    S: Clone,
{
    fn clone(&self) -> Self {
        Self {
            fleet: self.fleet.clone(),
            executor: self.executor.clone(),
            outcomes: self.outcomes.clone(),
        }
    }
}

impl<S: FleetStore, E: InstanceExecutor> Dispatcher<S, E> {
    pub fn new(fleet: Fleet<S>, executor: Arc<E>, outcomes: mpsc::UnboundedSender<Outcome>) -> Self {
        Self {
            fleet,
            executor,
            outcomes,
        }
    }

    /// Stop (if running) and remove the instance, then drop its status
    /// record.
    pub fn kill(&self, name: String, reason: KillReason) {
        let this = self.clone();
        tokio::spawn(async move {
            let result = this.run_kill(&name).await.map_err(|e| e.to_string());
            if let Err(e) = &result {
                error!(server = %name, %reason, error = %e, "kill failed");
            }
            this.report(Outcome::Killed { name, reason, result });
        });
    }

    pub fn restart(&self, name: String, reason: RestartReason) {
        let this = self.clone();
        tokio::spawn(async move {
            let result = this
                .executor
                .restart(&name)
                .await
                .map_err(|e| e.to_string());
            if let Err(e) = &result {
                error!(server = %name, %reason, error = %e, "restart failed");
            }
            this.report(Outcome::Restarted { name, reason, result });
        });
    }

    /// Create and start the instance, then write `placeholder` unless the
    /// instance has already reported.
    ///
    /// `reply` receives `true` when a new instance was created and `false`
    /// when the name already existed.
    pub fn create(
        &self,
        spec: InstanceSpec,
        placeholder: ServerRecord,
        reply: Option<oneshot::Sender<MonitorResult<bool>>>,
    ) {
        let this = self.clone();
        tokio::spawn(async move {
            let name = spec.name.clone();
            let result = this.run_create(&spec, &placeholder).await;
            if let Err(e) = &result {
                error!(server = %name, error = %e, "create failed");
            }
            let outcome = result.as_ref().map(|_| ()).map_err(|e| e.to_string());
            this.report(Outcome::Created {
                name,
                result: outcome,
            });
            if let Some(reply) = reply {
                let _ = reply.send(result);
            }
        });
    }

    async fn run_kill(&self, name: &str) -> MonitorResult<()> {
        if self.executor.is_running(name).await? {
            self.executor.stop(name).await?;
        }
        self.executor.remove(name).await?;
        self.fleet.remove_server(name).await?;
        Ok(())
    }

    async fn run_create(&self, spec: &InstanceSpec, placeholder: &ServerRecord) -> MonitorResult<bool> {
        let handle = self.executor.create(spec).await?;
        if handle.created {
            self.executor.start(&handle).await?;
            info!(server = %spec.name, port = placeholder.port, "instance created");
        } else if !self.executor.is_running(&spec.name).await? {
            self.executor.start(&handle).await?;
            info!(server = %spec.name, "existing instance was stopped, started it");
        } else {
            info!(server = %spec.name, "instance already exists");
        }

        if !self.fleet.register_server(placeholder).await? {
            warn!(server = %spec.name, "status record already present, leaving it");
        }
        Ok(handle.created)
    }

    fn report(&self, outcome: Outcome) {
        if self.outcomes.send(outcome).is_err() {
            warn!("monitor gone, dropping dispatch outcome");
        }
    }
}

pub(crate) fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
