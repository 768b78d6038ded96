//! Fleet store errors.
//!
//! Backend faults (`Open` .. `Serialize`) come from redb or Redis. The last two
//! describe the stored data itself and are isolated per record.

use thiserror::Error;

pub type StateResult<T> = Result<T, StateError>;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("cannot open fleet store: {0}")]
    Open(String),

    #[error("fleet store unreachable: {0}")]
    Connection(String),

    #[error("store transaction failed: {0}")]
    Transaction(String),

    #[error("store table unavailable: {0}")]
    Table(String),

    #[error("store read failed: {0}")]
    Read(String),

    #[error("store write failed: {0}")]
    Write(String),

    #[error("cannot encode record: {0}")]
    Serialize(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("malformed policy for group {group}: {reason}")]
    MalformedPolicy { group: String, reason: String },

    #[error("invalid status record {key}: {reason}")]
    InvalidRecord { key: String, reason: String },
}

impl StateError {
    /// True for faults in the stored data rather than in the store itself.
    pub fn is_data_fault(&self) -> bool {
        matches!(
            self,
            StateError::MalformedPolicy { .. } | StateError::InvalidRecord { .. }
        )
    }
}

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| $crate::error::StateError::$variant(e.to_string())
    };
}

pub(crate) use map_err;
