//! Executor error types.

use thiserror::Error;

/// Errors that can occur while driving an instance.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("cannot reach executor: {0}")]
    Connect(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("executor returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("invalid response: {0}")]
    Decode(String),

    #[error("invalid instance spec: {0}")]
    InvalidSpec(String),
}

pub type ExecResult<T> = Result<T, ExecError>;
