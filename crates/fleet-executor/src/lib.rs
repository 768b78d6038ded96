//! fleet-executor: lifecycle control for named game-server instances.
//!
//! # Architecture
//!
//! ```text
//! InstanceExecutor (trait)
//!   └── DockerExecutor
//!       ├── hyper http1 over the Docker Engine Unix socket
//!       └── one short-lived connection per call
//! ```
//!
//! Every operation is safe on a missing or already-stopped instance: the
//! Docker backend maps `404`/`304`/`409 Conflict on create` to success so
//! callers can retry blindly.

pub mod docker;
pub mod error;
pub mod executor;
pub mod spec;

pub use docker::DockerExecutor;
pub use error::{ExecError, ExecResult};
pub use executor::InstanceExecutor;
pub use spec::{InstanceHandle, InstanceSpec, NetworkMode, VolumeMount};
