use crate::model::*;

use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as Ms
}

pub(crate) fn validate_instant(t: Ms) -> Result<(), EngineError> {
    use crate::limits::*;
    if !(MIN_VALID_TIMESTAMP_MS..=MAX_VALID_TIMESTAMP_MS).contains(&t) {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    Ok(())
}

pub(crate) fn validate_span(span: &Span) -> Result<(), EngineError> {
    use crate::limits::*;
    if span.start >= span.end {
        return Err(EngineError::LimitExceeded("span must end after it starts"));
    }
    validate_instant(span.start)?;
    validate_instant(span.end)?;
    if span.duration_ms() > MAX_SPAN_DURATION_MS {
        return Err(EngineError::LimitExceeded("span too wide"));
    }
    Ok(())
}

/// The load-bearing double-booking guard: exactly one pending/confirmed
/// reservation may sit on a slot start. Runs under the stylist's write lock,
/// which makes check-then-insert atomic; the resolver's `available` pre-check
/// is UX, this is the guarantee.
pub(crate) fn check_slot_free(rs: &StylistState, at: Ms) -> Result<(), EngineError> {
    match rs.active_reservation_at(at) {
        Some(_) => Err(EngineError::SlotUnavailable(at)),
        None => Ok(()),
    }
}

/// Reservation lifecycle:
/// pending → confirmed | declined   (stylist, one-shot)
/// pending | confirmed → cancelled  (client, only while the slot is future)
/// confirmed → completed            (system, once the start time has passed)
/// declined, cancelled, completed are terminal.
pub(crate) fn check_transition(
    reservation: &Reservation,
    to: ReservationStatus,
    now: Ms,
) -> Result<(), EngineError> {
    use ReservationStatus::*;
    let from = reservation.status;
    match (from, to) {
        (Pending, Confirmed) | (Pending, Declined) => Ok(()),
        // A repeat decision on an already-decided reservation is its own
        // error so the UI can say "refresh" instead of "bug".
        (_, Confirmed) | (_, Declined) => Err(EngineError::AlreadyProcessed(reservation.id)),
        (Pending, Cancelled) | (Confirmed, Cancelled) => {
            if reservation.scheduled_at > now {
                Ok(())
            } else {
                Err(EngineError::InvalidTransition { from, to })
            }
        }
        (Confirmed, Completed) => {
            if reservation.scheduled_at <= now {
                Ok(())
            } else {
                Err(EngineError::InvalidTransition { from, to })
            }
        }
        (from, to) => Err(EngineError::InvalidTransition { from, to }),
    }
}
