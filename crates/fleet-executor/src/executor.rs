//! The executor capability consumed by the monitor.

use std::future::Future;

use crate::error::ExecResult;
use crate::spec::{InstanceHandle, InstanceSpec};

/// Create, start, stop, remove and inspect named instances.
///
/// Implementations must treat a missing or already-stopped target as a
/// no-op rather than an error, and `create` on an existing name must return
/// a handle with `created == false` instead of failing.
pub trait InstanceExecutor: Send + Sync + 'static {
    fn exists(&self, name: &str) -> impl Future<Output = ExecResult<bool>> + Send;

    fn is_running(&self, name: &str) -> impl Future<Output = ExecResult<bool>> + Send;

    fn is_healthy(&self, name: &str) -> impl Future<Output = ExecResult<bool>> + Send;

    fn create(&self, spec: &InstanceSpec) -> impl Future<Output = ExecResult<InstanceHandle>> + Send;

    fn start(&self, handle: &InstanceHandle) -> impl Future<Output = ExecResult<()>> + Send;

    fn stop(&self, name: &str) -> impl Future<Output = ExecResult<()>> + Send;

    fn remove(&self, name: &str) -> impl Future<Output = ExecResult<()>> + Send;

    fn restart(&self, name: &str) -> impl Future<Output = ExecResult<()>> + Send;
}
