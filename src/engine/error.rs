use ulid::Ulid;

use crate::time::TimeError;

/// Failure reported by a schedule collaborator. Passed through untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    SalonNotFound(Ulid),
    InvalidTimeZone(String),
    Backend(String),
}

impl std::fmt::Display for SourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceError::SalonNotFound(id) => write!(f, "salon not found: {id}"),
            SourceError::InvalidTimeZone(tz) => write!(f, "invalid time zone: {tz}"),
            SourceError::Backend(e) => write!(f, "schedule source error: {e}"),
        }
    }
}

impl std::error::Error for SourceError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Malformed date/time/duration input. Never coerced into "unavailable".
    Validation(String),
    Source(SourceError),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Validation(msg) => write!(f, "invalid input: {msg}"),
            EngineError::Source(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::Source(e) => Some(e),
            EngineError::Validation(_) => None,
        }
    }
}

impl From<SourceError> for EngineError {
    fn from(e: SourceError) -> Self {
        EngineError::Source(e)
    }
}

impl From<TimeError> for EngineError {
    fn from(e: TimeError) -> Self {
        EngineError::Validation(e.to_string())
    }
}
