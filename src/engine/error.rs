use ulid::Ulid;

use crate::model::SlotRejection;

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// Rejected by the validator before the insert was attempted.
    SlotUnavailable(SlotRejection),
    /// The insert-time re-check found a booking that was not there when the
    /// caller last looked — a lost race.
    Conflict(Ulid),
    CapacityExceeded(u32),
    InvalidTransition {
        from: &'static str,
        to: &'static str,
    },
    Validation(String),
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::SlotUnavailable(reason) => {
                write!(f, "slot no longer available: {}", reason.as_str())
            }
            EngineError::Conflict(id) => {
                write!(f, "time slot was just booked by someone else (booking {id})")
            }
            EngineError::CapacityExceeded(cap) => {
                write!(f, "capacity {cap} reached: all seats taken for this slot")
            }
            EngineError::InvalidTransition { from, to } => {
                write!(f, "invalid status transition: {from} -> {to}")
            }
            EngineError::Validation(msg) => write!(f, "validation: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
