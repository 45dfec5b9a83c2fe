use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::MAX_QUERY_WINDOW_MS;
use crate::model::*;
use crate::observability;
use crate::schedule;

use super::conflict::now_ms;
use super::resolver::{DEFAULT_BUFFER_MS, resolve_slots};
use super::{Engine, EngineError};

/// Resolve one stylist's day from an already-locked state.
///
/// This is the only place slot verdicts are computed from stylist state:
/// the public read path, the booking writer's re-check, and the sync layer
/// all funnel through here, so every caller sees identical rules.
pub(super) fn day_schedule_for(
    rs: &StylistState,
    date: NaiveDate,
    now: Ms,
    buffer: Ms,
) -> DaySchedule {
    let hours = rs.hours.unwrap_or_default();
    let starts = schedule::day_slot_starts(&hours, date);
    let window = schedule::day_span(date);
    let blocks: Vec<AvailabilityBlock> = rs.blocks_overlapping(&window).cloned().collect();
    let reservations: Vec<Reservation> = rs.reservations_in(&window).cloned().collect();
    let slots = resolve_slots(&starts, &blocks, &reservations, now, buffer);
    DaySchedule { stylist_id: rs.id, date, slots }
}

impl Engine {
    /// The authoritative bookable-slot view for one stylist and date,
    /// resolved against the wall clock and the default booking buffer.
    pub async fn day_schedule(
        &self,
        stylist_id: Ulid,
        date: NaiveDate,
    ) -> Result<DaySchedule, EngineError> {
        self.day_schedule_at(stylist_id, date, now_ms(), DEFAULT_BUFFER_MS)
            .await
    }

    /// Same as `day_schedule` with an explicit clock and buffer.
    pub async fn day_schedule_at(
        &self,
        stylist_id: Ulid,
        date: NaiveDate,
        now: Ms,
        buffer: Ms,
    ) -> Result<DaySchedule, EngineError> {
        let rs = self
            .get_stylist(&stylist_id)
            .ok_or(EngineError::NotFound(stylist_id))?;
        let guard = rs.read().await;

        let started = std::time::Instant::now();
        let day = day_schedule_for(&guard, date, now, buffer);
        metrics::histogram!(observability::RESOLVE_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());
        Ok(day)
    }

    pub async fn list_blocks(
        &self,
        stylist_id: Ulid,
        range: Span,
    ) -> Result<Vec<AvailabilityBlock>, EngineError> {
        if range.duration_ms() > MAX_QUERY_WINDOW_MS {
            return Err(EngineError::LimitExceeded("query window too wide"));
        }
        let rs = match self.get_stylist(&stylist_id) {
            Some(rs) => rs,
            None => return Ok(Vec::new()),
        };
        let guard = rs.read().await;
        Ok(guard.blocks_overlapping(&range).cloned().collect())
    }

    /// Reservations scheduled inside `range`. An empty `statuses` filter
    /// means any status.
    pub async fn list_reservations(
        &self,
        stylist_id: Ulid,
        range: Span,
        statuses: &[ReservationStatus],
    ) -> Result<Vec<Reservation>, EngineError> {
        if range.duration_ms() > MAX_QUERY_WINDOW_MS {
            return Err(EngineError::LimitExceeded("query window too wide"));
        }
        let rs = match self.get_stylist(&stylist_id) {
            Some(rs) => rs,
            None => return Ok(Vec::new()),
        };
        let guard = rs.read().await;
        Ok(guard
            .reservations_in(&range)
            .filter(|r| statuses.is_empty() || statuses.contains(&r.status))
            .cloned()
            .collect())
    }

    pub async fn working_hours(
        &self,
        stylist_id: Ulid,
    ) -> Option<crate::schedule::WeekSchedule> {
        let rs = self.get_stylist(&stylist_id)?;
        let guard = rs.read().await;
        guard.hours
    }

    pub async fn services(&self, stylist_id: Ulid) -> Vec<Service> {
        match self.get_stylist(&stylist_id) {
            Some(rs) => rs.read().await.services.clone(),
            None => Vec::new(),
        }
    }

    pub fn list_stylists(&self) -> Vec<StylistInfo> {
        self.state
            .iter()
            .map(|entry| {
                let rs = entry.value().clone();
                let guard = rs.try_read().expect("list_stylists: uncontended read");
                StylistInfo {
                    id: guard.id,
                    name: guard.name.clone(),
                }
            })
            .collect()
    }
}
