//! Monitor error taxonomy.

use fleet_executor::ExecError;
use fleet_state::StateError;
use thiserror::Error;

pub type MonitorResult<T> = Result<T, MonitorError>;

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("not found: {0}")]
    NotFound(String),

    /// Store or executor failure.
    #[error("i/o error: {0}")]
    Io(String),

    #[error("malformed policy for group {group}: {reason}")]
    MalformedPolicy { group: String, reason: String },

    #[error("invalid status record {key}: {reason}")]
    InvalidRecord { key: String, reason: String },

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid server name: {0}")]
    InvalidName(String),

    #[error("monitor is not running")]
    Unavailable,
}

impl From<StateError> for MonitorError {
    fn from(err: StateError) -> Self {
        match err {
            StateError::NotFound(what) => MonitorError::NotFound(what),
            StateError::MalformedPolicy { group, reason } => {
                MonitorError::MalformedPolicy { group, reason }
            }
            StateError::InvalidRecord { key, reason } => MonitorError::InvalidRecord { key, reason },
            other => MonitorError::Io(other.to_string()),
        }
    }
}

impl From<ExecError> for MonitorError {
    fn from(err: ExecError) -> Self {
        MonitorError::Io(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_errors_keep_their_kind() {
        let err: MonitorError = StateError::NotFound("group Ghost".into()).into();
        assert!(matches!(err, MonitorError::NotFound(_)));

        let err: MonitorError = StateError::Connection("refused".into()).into();
        assert!(matches!(err, MonitorError::Io(ref m) if m.contains("refused")));

        let err: MonitorError = StateError::MalformedPolicy {
            group: "MIN".into(),
            reason: "missing field `prefix`".into(),
        }
        .into();
        assert!(matches!(err, MonitorError::MalformedPolicy { ref group, .. } if group == "MIN"));
    }

    #[test]
    fn executor_errors_are_io() {
        let err: MonitorError = ExecError::Connect("/var/run/docker.sock".into()).into();
        assert!(matches!(err, MonitorError::Io(_)));
    }
}
