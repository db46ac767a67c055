use ulid::Ulid;

use crate::engine::{EngineError, SourceError};
use crate::time::TimeError;

#[derive(Debug)]
pub enum StoreError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    Invalid(String),
    LimitExceeded(&'static str),
    /// The re-check under the salon lock failed; carries the reason text.
    SlotUnavailable(String),
    WalError(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::NotFound(id) => write!(f, "not found: {id}"),
            StoreError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            StoreError::Invalid(msg) => write!(f, "invalid input: {msg}"),
            StoreError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            StoreError::SlotUnavailable(reason) => write!(f, "slot unavailable: {reason}"),
            StoreError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<TimeError> for StoreError {
    fn from(e: TimeError) -> Self {
        StoreError::Invalid(e.to_string())
    }
}

impl From<SourceError> for StoreError {
    fn from(e: SourceError) -> Self {
        match e {
            SourceError::SalonNotFound(id) => StoreError::NotFound(id),
            other => StoreError::Invalid(other.to_string()),
        }
    }
}

impl From<EngineError> for StoreError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::Validation(msg) => StoreError::Invalid(msg),
            EngineError::Source(s) => s.into(),
        }
    }
}
