use std::sync::Arc;

use tokio::sync::{RwLock, oneshot};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;
use crate::schedule::{self, WeekSchedule};

use super::conflict::{check_slot_free, check_transition, now_ms, validate_instant, validate_span};
use super::queries::day_schedule_for;
use super::resolver::DEFAULT_BUFFER_MS;
use super::{Engine, EngineError, WalCommand};

/// Stylists manage their own calendar; admins bypass.
fn require_calendar_owner(actor: &Actor, stylist_id: Ulid) -> Result<(), EngineError> {
    match actor.role {
        Role::Admin => Ok(()),
        Role::Stylist if actor.user_id == stylist_id => Ok(()),
        _ => Err(EngineError::PermissionDenied("calendar is owner-managed")),
    }
}

impl Engine {
    pub async fn create_stylist(
        &self,
        actor: &Actor,
        id: Ulid,
        name: Option<String>,
    ) -> Result<(), EngineError> {
        require_calendar_owner(actor, id)?;
        if self.state.len() >= MAX_STYLISTS {
            return Err(EngineError::LimitExceeded("too many stylists"));
        }
        if let Some(ref n) = name
            && n.len() > MAX_NAME_LEN
        {
            return Err(EngineError::LimitExceeded("stylist name too long"));
        }
        if self.state.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::StylistCreated { id, name: name.clone() };
        self.wal_append(&event).await?;
        self.state
            .insert(id, Arc::new(RwLock::new(StylistState::new(id, name))));
        metrics::gauge!(observability::STYLISTS_ACTIVE).increment(1.0);
        self.notify.send(id, &event);
        Ok(())
    }

    pub async fn delete_stylist(&self, actor: &Actor, id: Ulid) -> Result<(), EngineError> {
        require_calendar_owner(actor, id)?;
        if !self.state.contains_key(&id) {
            return Err(EngineError::NotFound(id));
        }

        let event = Event::StylistDeleted { id };
        self.wal_append(&event).await?;
        self.state.remove(&id);
        self.entity_to_stylist.retain(|_, sid| sid != &id);
        metrics::gauge!(observability::STYLISTS_ACTIVE).decrement(1.0);
        self.notify.send(id, &event);
        self.notify.remove(&id);
        Ok(())
    }

    pub async fn set_working_hours(
        &self,
        actor: &Actor,
        stylist_id: Ulid,
        hours: WeekSchedule,
    ) -> Result<(), EngineError> {
        require_calendar_owner(actor, stylist_id)?;
        if !hours.is_valid() {
            return Err(EngineError::LimitExceeded("open day must close after it opens"));
        }
        let rs = self
            .get_stylist(&stylist_id)
            .ok_or(EngineError::NotFound(stylist_id))?;
        let mut guard = rs.write().await;

        let event = Event::HoursSet { stylist_id, hours };
        self.persist_and_apply(stylist_id, &mut guard, &event).await
    }

    pub async fn add_service(
        &self,
        actor: &Actor,
        id: Ulid,
        stylist_id: Ulid,
        name: String,
    ) -> Result<(), EngineError> {
        require_calendar_owner(actor, stylist_id)?;
        if name.is_empty() || name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("service name length"));
        }
        let rs = self
            .get_stylist(&stylist_id)
            .ok_or(EngineError::NotFound(stylist_id))?;
        let mut guard = rs.write().await;
        if guard.services.len() >= MAX_SERVICES_PER_STYLIST {
            return Err(EngineError::LimitExceeded("too many services"));
        }
        if guard.service(&id).is_some() {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::ServiceAdded { id, stylist_id, name };
        self.persist_and_apply(stylist_id, &mut guard, &event).await
    }

    pub async fn remove_service(&self, actor: &Actor, id: Ulid) -> Result<Ulid, EngineError> {
        let (stylist_id, mut guard) = self.resolve_entity_write(&id).await?;
        require_calendar_owner(actor, stylist_id)?;
        if guard.service(&id).is_none() {
            return Err(EngineError::NotFound(id));
        }
        let event = Event::ServiceRemoved { id, stylist_id };
        self.persist_and_apply(stylist_id, &mut guard, &event).await?;
        Ok(stylist_id)
    }

    // ── Availability blocks ──────────────────────────────

    /// Insert an explicit availability override. Overlapping blocks are
    /// legal (the resolver tie-breaks at read time), so no conflict check
    /// happens here, only shape validation.
    pub async fn add_block(
        &self,
        actor: &Actor,
        id: Ulid,
        stylist_id: Ulid,
        span: Span,
        status: BlockStatus,
    ) -> Result<(), EngineError> {
        require_calendar_owner(actor, stylist_id)?;
        validate_span(&span)?;
        let rs = self
            .get_stylist(&stylist_id)
            .ok_or(EngineError::NotFound(stylist_id))?;
        let mut guard = rs.write().await;
        if guard.blocks.len() >= MAX_BLOCKS_PER_STYLIST {
            return Err(EngineError::LimitExceeded("too many blocks"));
        }

        let event = Event::BlockInserted { id, stylist_id, span, status };
        self.persist_and_apply(stylist_id, &mut guard, &event).await
    }

    pub async fn update_block(
        &self,
        actor: &Actor,
        id: Ulid,
        status: BlockStatus,
    ) -> Result<Ulid, EngineError> {
        let (stylist_id, mut guard) = self.resolve_entity_write(&id).await?;
        require_calendar_owner(actor, stylist_id)?;
        let span = guard.block(&id).ok_or(EngineError::NotFound(id))?.span;

        let event = Event::BlockUpdated { id, stylist_id, span, status };
        self.persist_and_apply(stylist_id, &mut guard, &event).await?;
        Ok(stylist_id)
    }

    pub async fn delete_block(&self, actor: &Actor, id: Ulid) -> Result<Ulid, EngineError> {
        let (stylist_id, mut guard) = self.resolve_entity_write(&id).await?;
        require_calendar_owner(actor, stylist_id)?;
        let span = guard.block(&id).ok_or(EngineError::NotFound(id))?.span;

        let event = Event::BlockDeleted { id, stylist_id, span };
        self.persist_and_apply(stylist_id, &mut guard, &event).await?;
        Ok(stylist_id)
    }

    // ── Booking writer ───────────────────────────────────

    /// Create a pending reservation for one slot.
    ///
    /// Order of checks: slot must currently resolve `available` (fresh
    /// resolution under the write lock, never a caller-cached verdict), then
    /// the service gate, then the exact-slot uniqueness check. The write
    /// lock held across check-and-insert is what makes two concurrent
    /// requests for the same slot serialize into one success and one
    /// `SlotUnavailable`.
    pub async fn request_booking(
        &self,
        actor: &Actor,
        id: Ulid,
        stylist_id: Ulid,
        service_id: Option<Ulid>,
        scheduled_at: Ms,
        notes: Option<String>,
    ) -> Result<Reservation, EngineError> {
        if !matches!(actor.role, Role::Client | Role::Admin) {
            return Err(EngineError::PermissionDenied("only clients request bookings"));
        }
        validate_instant(scheduled_at)?;
        if let Some(ref n) = notes
            && n.len() > MAX_NOTES_LEN
        {
            return Err(EngineError::LimitExceeded("notes too long"));
        }

        let rs = self
            .get_stylist(&stylist_id)
            .ok_or(EngineError::NotFound(stylist_id))?;
        let mut guard = rs.clone().write_owned().await;
        if guard.reservations.len() >= MAX_RESERVATIONS_PER_STYLIST {
            return Err(EngineError::LimitExceeded("too many reservations"));
        }

        let now = now_ms();
        let day = day_schedule_for(&guard, schedule::date_of(scheduled_at), now, DEFAULT_BUFFER_MS);
        let verdict = day.slots.iter().find(|s| s.start == scheduled_at);
        if !matches!(verdict, Some(slot) if slot.status == SlotStatus::Available) {
            metrics::counter!(observability::BOOKING_CONFLICTS_TOTAL).increment(1);
            return Err(EngineError::SlotUnavailable(scheduled_at));
        }

        match service_id {
            Some(sid) if guard.service(&sid).is_none() => {
                return Err(EngineError::ServiceRequired(stylist_id));
            }
            None if !guard.services.is_empty() => {
                return Err(EngineError::ServiceRequired(stylist_id));
            }
            _ => {}
        }

        check_slot_free(&guard, scheduled_at)?;

        let event = Event::ReservationCreated {
            id,
            stylist_id,
            client_id: actor.user_id,
            service_id,
            scheduled_at,
            notes: notes.clone(),
        };
        self.persist_and_apply_timed(stylist_id, &rs, &mut guard, &event)
            .await?;

        metrics::counter!(observability::BOOKINGS_TOTAL).increment(1);
        Ok(Reservation {
            id,
            stylist_id,
            client_id: actor.user_id,
            service_id,
            scheduled_at,
            status: ReservationStatus::Pending,
            notes,
        })
    }

    /// Drive the reservation state machine: confirm/decline (stylist),
    /// cancel (client). Completion is system-managed; see the sweeper.
    pub async fn update_reservation_status(
        &self,
        actor: &Actor,
        id: Ulid,
        status: ReservationStatus,
    ) -> Result<Ulid, EngineError> {
        let (stylist_id, mut guard) = self.resolve_entity_write(&id).await?;
        let reservation = guard.reservation(&id).ok_or(EngineError::NotFound(id))?.clone();

        match status {
            ReservationStatus::Confirmed | ReservationStatus::Declined => {
                require_calendar_owner(actor, stylist_id)?;
            }
            ReservationStatus::Cancelled => {
                let own = actor.role == Role::Client && actor.user_id == reservation.client_id;
                if !(own || actor.role == Role::Admin) {
                    return Err(EngineError::PermissionDenied("cancellation is client-owned"));
                }
            }
            ReservationStatus::Completed => {
                return Err(EngineError::PermissionDenied("completion is system-managed"));
            }
            // no transition re-enters pending; let the state machine say so
            ReservationStatus::Pending => {}
        }
        check_transition(&reservation, status, now_ms())?;

        let event = Event::ReservationStatusChanged {
            id,
            stylist_id,
            scheduled_at: reservation.scheduled_at,
            status,
        };
        self.persist_and_apply(stylist_id, &mut guard, &event).await?;
        Ok(stylist_id)
    }

    /// Confirmed reservations whose appointment is over (start + slot
    /// length behind `now`). Skips stylists with a contended lock; the
    /// sweeper retries on its next tick anyway.
    pub fn collect_elapsed(&self, now: Ms) -> Vec<Ulid> {
        let mut elapsed = Vec::new();
        for entry in self.state.iter() {
            let rs = entry.value().clone();
            if let Ok(guard) = rs.try_read() {
                for r in &guard.reservations {
                    if r.scheduled_at + schedule::SLOT_MS > now {
                        break;
                    }
                    if r.status == ReservationStatus::Confirmed {
                        elapsed.push(r.id);
                    }
                }
            }
        }
        elapsed
    }

    /// System transition confirmed → completed, used by the sweeper.
    pub async fn complete_reservation(&self, id: Ulid) -> Result<(), EngineError> {
        let (stylist_id, mut guard) = self.resolve_entity_write(&id).await?;
        let reservation = guard.reservation(&id).ok_or(EngineError::NotFound(id))?.clone();
        check_transition(&reservation, ReservationStatus::Completed, now_ms())?;

        let event = Event::ReservationStatusChanged {
            id,
            stylist_id,
            scheduled_at: reservation.scheduled_at,
            status: ReservationStatus::Completed,
        };
        self.persist_and_apply(stylist_id, &mut guard, &event).await?;
        metrics::counter!(observability::RESERVATIONS_COMPLETED_TOTAL).increment(1);
        Ok(())
    }

    // ── WAL maintenance ──────────────────────────────────

    /// Rewrite the WAL with only the events needed to recreate current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();
        for entry in self.state.iter() {
            let rs = entry.value().clone();
            let guard = rs.try_read().expect("compact: uncontended read");

            events.push(Event::StylistCreated {
                id: guard.id,
                name: guard.name.clone(),
            });
            if let Some(hours) = guard.hours {
                events.push(Event::HoursSet { stylist_id: guard.id, hours });
            }
            for s in &guard.services {
                events.push(Event::ServiceAdded {
                    id: s.id,
                    stylist_id: guard.id,
                    name: s.name.clone(),
                });
            }
            for b in &guard.blocks {
                events.push(Event::BlockInserted {
                    id: b.id,
                    stylist_id: guard.id,
                    span: b.span,
                    status: b.status,
                });
            }
            for r in &guard.reservations {
                events.push(Event::ReservationCreated {
                    id: r.id,
                    stylist_id: guard.id,
                    client_id: r.client_id,
                    service_id: r.service_id,
                    scheduled_at: r.scheduled_at,
                    notes: r.notes.clone(),
                });
                // creation events always replay as pending
                if r.status != ReservationStatus::Pending {
                    events.push(Event::ReservationStatusChanged {
                        id: r.id,
                        stylist_id: guard.id,
                        scheduled_at: r.scheduled_at,
                        status: r.status,
                    });
                }
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, ack: tx })
            .await
            .map_err(|_| EngineError::StoreUnreachable("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::StoreUnreachable("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::StoreUnreachable(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { ack: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
