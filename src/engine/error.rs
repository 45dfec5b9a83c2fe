use ulid::Ulid;

use crate::model::{Ms, ReservationStatus};

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// The requested slot did not resolve to `available` at write time,
    /// or a concurrent writer took it first.
    SlotUnavailable(Ms),
    /// The stylist mandates a service selection that was omitted or unknown.
    ServiceRequired(Ulid),
    /// Confirm/decline attempted on a reservation no longer pending.
    AlreadyProcessed(Ulid),
    /// A status change the reservation state machine does not permit.
    InvalidTransition {
        from: ReservationStatus,
        to: ReservationStatus,
    },
    PermissionDenied(&'static str),
    LimitExceeded(&'static str),
    /// The backing store failed or timed out. For a timed-out write the
    /// outcome is unknown; re-fetch before retrying.
    StoreUnreachable(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::SlotUnavailable(at) => {
                write!(f, "slot at {at} is not available")
            }
            EngineError::ServiceRequired(stylist_id) => {
                write!(f, "stylist {stylist_id} requires a service selection")
            }
            EngineError::AlreadyProcessed(id) => {
                write!(f, "reservation {id} has already been decided")
            }
            EngineError::InvalidTransition { from, to } => {
                write!(f, "reservation cannot move from {from} to {to}")
            }
            EngineError::PermissionDenied(msg) => write!(f, "permission denied: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::StoreUnreachable(e) => write!(f, "store unreachable: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
