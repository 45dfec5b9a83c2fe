use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, the only time type.
pub type Ms = i64;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }
}

/// What a stylist-set block does to the time range it covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockStatus {
    /// Explicitly open for booking (same effect as no block at all).
    Available,
    /// Soft-blocked: walk-ins, admin time.
    Busy,
    /// Hard-blocked: vacation, sick leave.
    Unavailable,
}

/// An explicit override a stylist places on a contiguous time range.
/// Blocks for one stylist may overlap or contradict each other; the
/// resolver tie-breaks, storage never deduplicates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityBlock {
    pub id: Ulid,
    pub stylist_id: Ulid,
    pub span: Span,
    pub status: BlockStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReservationStatus {
    Pending,
    Confirmed,
    Declined,
    Completed,
    Cancelled,
}

impl ReservationStatus {
    /// Pending and confirmed both commit the slot: a request still awaiting
    /// the stylist's decision must already block competing bookings.
    pub fn is_active(&self) -> bool {
        matches!(self, ReservationStatus::Pending | ReservationStatus::Confirmed)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ReservationStatus::Declined | ReservationStatus::Completed | ReservationStatus::Cancelled
        )
    }
}

impl std::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ReservationStatus::Pending => "pending",
            ReservationStatus::Confirmed => "confirmed",
            ReservationStatus::Declined => "declined",
            ReservationStatus::Completed => "completed",
            ReservationStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// A client's request to occupy exactly one slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub stylist_id: Ulid,
    pub client_id: Ulid,
    pub service_id: Option<Ulid>,
    pub scheduled_at: Ms,
    pub status: ReservationStatus,
    pub notes: Option<String>,
}

/// A bookable offering configured by a stylist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: Ulid,
    pub name: String,
}

/// The single authoritative verdict for one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotStatus {
    Available,
    Busy,
    Unavailable,
    Booked,
    Past,
    /// Inputs could not be fetched. Never collapsed into `Available`.
    Unknown,
}

/// Ephemeral: recomputed on every resolution, never mutated in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub start: Ms,
    /// Wall-clock label ("09:30") for display, derived from `start`.
    pub label: String,
    pub status: SlotStatus,
}

impl Slot {
    pub fn new(start: Ms, status: SlotStatus) -> Self {
        let label = DateTime::<Utc>::from_timestamp_millis(start)
            .map(|dt| dt.format("%H:%M").to_string())
            .unwrap_or_default();
        Self { start, label, status }
    }
}

/// One resolver invocation's output for a stylist and date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaySchedule {
    pub stylist_id: Ulid,
    pub date: NaiveDate,
    pub slots: Vec<Slot>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Stylist,
    Admin,
}

/// The current actor, supplied by the embedding service's identity layer.
/// Passed explicitly to every mutation; the engine holds no ambient
/// current-user context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub user_id: Ulid,
    pub role: Role,
}

impl Actor {
    pub fn client(user_id: Ulid) -> Self {
        Self { user_id, role: Role::Client }
    }

    pub fn stylist(user_id: Ulid) -> Self {
        Self { user_id, role: Role::Stylist }
    }

    pub fn admin(user_id: Ulid) -> Self {
        Self { user_id, role: Role::Admin }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StylistInfo {
    pub id: Ulid,
    pub name: Option<String>,
}

/// Everything the engine keeps per stylist.
#[derive(Debug, Clone)]
pub struct StylistState {
    pub id: Ulid,
    pub name: Option<String>,
    /// None falls back to the default 09:00–18:00 week.
    pub hours: Option<crate::schedule::WeekSchedule>,
    pub services: Vec<Service>,
    /// Sorted by `span.start`.
    pub blocks: Vec<AvailabilityBlock>,
    /// Sorted by `scheduled_at`. Terminal reservations stay as history.
    pub reservations: Vec<Reservation>,
}

impl StylistState {
    pub fn new(id: Ulid, name: Option<String>) -> Self {
        Self {
            id,
            name,
            hours: None,
            services: Vec::new(),
            blocks: Vec::new(),
            reservations: Vec::new(),
        }
    }

    /// Insert a block maintaining sort order by span.start.
    pub fn insert_block(&mut self, block: AvailabilityBlock) {
        let pos = self
            .blocks
            .binary_search_by_key(&block.span.start, |b| b.span.start)
            .unwrap_or_else(|e| e);
        self.blocks.insert(pos, block);
    }

    pub fn remove_block(&mut self, id: Ulid) -> Option<AvailabilityBlock> {
        let pos = self.blocks.iter().position(|b| b.id == id)?;
        Some(self.blocks.remove(pos))
    }

    pub fn block(&self, id: &Ulid) -> Option<&AvailabilityBlock> {
        self.blocks.iter().find(|b| b.id == *id)
    }

    pub fn block_mut(&mut self, id: &Ulid) -> Option<&mut AvailabilityBlock> {
        self.blocks.iter_mut().find(|b| b.id == *id)
    }

    /// Blocks whose span overlaps the query window. Binary search skips
    /// everything starting at or after `query.end`.
    pub fn blocks_overlapping(&self, query: &Span) -> impl Iterator<Item = &AvailabilityBlock> {
        let right = self.blocks.partition_point(|b| b.span.start < query.end);
        self.blocks[..right]
            .iter()
            .filter(move |b| b.span.end > query.start)
    }

    /// Insert a reservation maintaining sort order by scheduled_at.
    pub fn insert_reservation(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .binary_search_by_key(&reservation.scheduled_at, |r| r.scheduled_at)
            .unwrap_or_else(|e| e);
        self.reservations.insert(pos, reservation);
    }

    pub fn reservation(&self, id: &Ulid) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == *id)
    }

    pub fn reservation_mut(&mut self, id: &Ulid) -> Option<&mut Reservation> {
        self.reservations.iter_mut().find(|r| r.id == *id)
    }

    /// Reservations scheduled inside `[window.start, window.end)`, any status.
    pub fn reservations_in(&self, window: &Span) -> impl Iterator<Item = &Reservation> {
        let lo = self.reservations.partition_point(|r| r.scheduled_at < window.start);
        let hi = self.reservations.partition_point(|r| r.scheduled_at < window.end);
        self.reservations[lo..hi].iter()
    }

    /// The pending/confirmed reservation occupying the exact slot start, if
    /// any. Terminal reservations at the same instant (a cancelled one, say)
    /// are skipped, since a freed slot is bookable again.
    pub fn active_reservation_at(&self, t: Ms) -> Option<&Reservation> {
        let lo = self.reservations.partition_point(|r| r.scheduled_at < t);
        self.reservations[lo..]
            .iter()
            .take_while(|r| r.scheduled_at == t)
            .find(|r| r.status.is_active())
    }

    pub fn service(&self, id: &Ulid) -> Option<&Service> {
        self.services.iter().find(|s| s.id == *id)
    }
}

/// The event types, flat with no nesting. This is the WAL record format and the
/// payload pushed to change subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    StylistCreated {
        id: Ulid,
        name: Option<String>,
    },
    StylistDeleted {
        id: Ulid,
    },
    HoursSet {
        stylist_id: Ulid,
        hours: crate::schedule::WeekSchedule,
    },
    ServiceAdded {
        id: Ulid,
        stylist_id: Ulid,
        name: String,
    },
    ServiceRemoved {
        id: Ulid,
        stylist_id: Ulid,
    },
    BlockInserted {
        id: Ulid,
        stylist_id: Ulid,
        span: Span,
        status: BlockStatus,
    },
    BlockUpdated {
        id: Ulid,
        stylist_id: Ulid,
        span: Span,
        status: BlockStatus,
    },
    BlockDeleted {
        id: Ulid,
        stylist_id: Ulid,
        span: Span,
    },
    ReservationCreated {
        id: Ulid,
        stylist_id: Ulid,
        client_id: Ulid,
        service_id: Option<Ulid>,
        scheduled_at: Ms,
        notes: Option<String>,
    },
    ReservationStatusChanged {
        id: Ulid,
        stylist_id: Ulid,
        scheduled_at: Ms,
        status: ReservationStatus,
    },
}
