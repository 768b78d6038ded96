//! fleet-monitor: the autoscaling control loop for game-server groups.
//!
//! Reads every instance status record once per tick, retires unhealthy or
//! surplus instances, restarts laggy ones and provisions new instances until
//! each group meets its `totalServers` / `joinableServers` targets.
//!
//! # Tick
//!
//! ```text
//! apply dispatch outcomes
//! load group policies           (malformed group -> skipped, warned)
//! snapshot status records
//! for record not pending:
//!     no group / unreadable     -> skip
//!     motd ~ "starting"         -> count; kill SlowStartup past timeout
//!     heartbeat older than 35s  -> kill Dead
//!     tps <= 10                 -> restart Laggy    (tps <= 17 warns)
//!     motd ~ "finished"         -> kill Finished    (not clans/testing)
//!     group matches no prefix   -> kill Cleanup     (full group view only)
//!     otherwise                 -> tally total / joinable / empty / players
//! for group not ignored:
//!     excess  = joinable - reqJoinable   if total > reqTotal and joinable > reqJoinable
//!     missing = max(reqTotal - total, reqJoinable - joinable)
//!     lobby: capacity-driven adds, throttled kills, one hygiene restart
//!            per cooldown when over target with nothing to retire
//!     kill excess from the tail of the empty list, never a busy instance
//!     add missing - (creations not yet visible), naming {prefix}-{N}
//! dispatch pending actions not already in flight
//! ```
//!
//! The registry has a single writer: the loop. Dispatch tasks and the
//! console talk to it through channels.

pub mod classifier;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod monitor;
pub mod policy;
pub mod provision;
pub mod registry;

pub use classifier::{Classification, GroupTally, IGNORED_GROUPS};
pub use config::{MonitorConfig, ProvisionConfig};
pub use error::{MonitorError, MonitorResult};
pub use monitor::{Command, FleetMonitor, MonitorHandle, TickReport};
pub use policy::GroupPlan;
pub use provision::Provisioner;
pub use registry::{
    Action, ActionRegistry, KillReason, Lifecycle, Outcome, RegistrySnapshot, RestartReason,
};
