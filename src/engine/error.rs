use thiserror::Error;
use ulid::Ulid;

use crate::model::{Plate, SpaceCode, VehicleCategory};

use super::locks::LockTimeout;
use super::registry::RegistryError;

/// Coarse failure classes handed to the request layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Caller's fault; do not retry unchanged.
    InvalidInput,
    /// Collided with a concurrent mutation; retry with backoff.
    Conflict,
    NotFound,
    /// Not valid in the entity's current lifecycle state.
    InvalidState,
    /// Lock scope not acquired before the deadline.
    Busy,
    /// An occupancy invariant was found false. Surface and investigate.
    InternalInvariantViolation,
    /// A collaborator (journal, directory) could not answer.
    Unavailable,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("no available space for {0}")]
    NoSpaceAvailable(VehicleCategory),
    #[error("vehicle {plate} is already parked (session {session})")]
    VehicleAlreadyParked { plate: Plate, session: Ulid },
    #[error("space {0} is not available")]
    SpaceConflict(SpaceCode),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("session {0} is already closed")]
    AlreadyClosed(Ulid),
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("busy: {scope} {key} is locked")]
    Busy { scope: &'static str, key: String },
    #[error("internal invariant violation: {0}")]
    InternalInvariantViolation(String),
    #[error("journal error: {0}")]
    Journal(String),
    #[error("directory unavailable: {0}")]
    Directory(String),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::InvalidInput(_) => ErrorKind::InvalidInput,
            EngineError::NoSpaceAvailable(_)
            | EngineError::VehicleAlreadyParked { .. }
            | EngineError::SpaceConflict(_) => ErrorKind::Conflict,
            EngineError::NotFound(_) => ErrorKind::NotFound,
            EngineError::AlreadyClosed(_) | EngineError::InvalidState(_) => ErrorKind::InvalidState,
            EngineError::Busy { .. } => ErrorKind::Busy,
            EngineError::InternalInvariantViolation(_) => ErrorKind::InternalInvariantViolation,
            EngineError::Journal(_) | EngineError::Directory(_) => ErrorKind::Unavailable,
        }
    }

    /// Whether the same request may succeed later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Conflict | ErrorKind::Busy | ErrorKind::Unavailable
        )
    }

    /// Short label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            EngineError::InvalidInput(_) => "invalid_input",
            EngineError::NoSpaceAvailable(_) => "no_space_available",
            EngineError::VehicleAlreadyParked { .. } => "vehicle_already_parked",
            EngineError::SpaceConflict(_) => "space_conflict",
            EngineError::NotFound(_) => "not_found",
            EngineError::AlreadyClosed(_) => "already_closed",
            EngineError::InvalidState(_) => "invalid_state",
            EngineError::Busy { .. } => "busy",
            EngineError::InternalInvariantViolation(_) => "invariant_violation",
            EngineError::Journal(_) => "journal",
            EngineError::Directory(_) => "directory",
        }
    }
}

impl From<LockTimeout> for EngineError {
    fn from(t: LockTimeout) -> Self {
        EngineError::Busy {
            scope: t.scope.as_str(),
            key: t.key,
        }
    }
}

impl From<RegistryError> for EngineError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::NotFound(code) => EngineError::NotFound(format!("space {code}")),
            RegistryError::Conflict { code, .. } => EngineError::SpaceConflict(code),
            e @ (RegistryError::AlreadyExists(_) | RegistryError::InvalidState { .. }) => {
                EngineError::InvalidState(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy() {
        assert_eq!(EngineError::InvalidInput("x".into()).kind(), ErrorKind::InvalidInput);
        assert_eq!(EngineError::SpaceConflict("A-01".into()).kind(), ErrorKind::Conflict);
        assert_eq!(EngineError::AlreadyClosed(Ulid::nil()).kind(), ErrorKind::InvalidState);
        assert_eq!(
            EngineError::InternalInvariantViolation("x".into()).kind(),
            ErrorKind::InternalInvariantViolation
        );
    }

    #[test]
    fn retry_policy() {
        assert!(EngineError::Busy { scope: "space", key: "A-01".into() }.is_retryable());
        assert!(EngineError::SpaceConflict("A-01".into()).is_retryable());
        assert!(!EngineError::InvalidInput("x".into()).is_retryable());
        assert!(!EngineError::AlreadyClosed(Ulid::nil()).is_retryable());
        assert!(!EngineError::InternalInvariantViolation("x".into()).is_retryable());
    }
}
