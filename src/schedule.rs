use chrono::{Datelike, NaiveDate, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};

use crate::model::{Ms, Span};

/// Fixed slot granularity. Every bookable interval is exactly this long.
pub const SLOT_MS: Ms = 30 * 60_000;

const DAY_MS: Ms = 86_400_000;

fn default_open() -> NaiveTime {
    NaiveTime::from_hms_opt(9, 0, 0).expect("static time")
}

fn default_close() -> NaiveTime {
    NaiveTime::from_hms_opt(18, 0, 0).expect("static time")
}

/// Opening hours for one weekday.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayHours {
    pub is_open: bool,
    pub open: NaiveTime,
    pub close: NaiveTime,
}

impl DayHours {
    pub fn open_between(open: NaiveTime, close: NaiveTime) -> Self {
        Self { is_open: true, open, close }
    }

    pub fn closed() -> Self {
        Self {
            is_open: false,
            open: default_open(),
            close: default_close(),
        }
    }
}

impl Default for DayHours {
    fn default() -> Self {
        Self::open_between(default_open(), default_close())
    }
}

/// A stylist's weekly opening hours, Monday first.
/// The default, used whenever a stylist has not configured hours,
/// is 09:00-18:00, open all seven days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeekSchedule([DayHours; 7]);

impl Default for WeekSchedule {
    fn default() -> Self {
        Self([DayHours::default(); 7])
    }
}

impl WeekSchedule {
    pub fn day(&self, weekday: Weekday) -> &DayHours {
        &self.0[weekday.num_days_from_monday() as usize]
    }

    pub fn set_day(&mut self, weekday: Weekday, hours: DayHours) {
        self.0[weekday.num_days_from_monday() as usize] = hours;
    }

    /// True when every open day has `open < close`.
    pub fn is_valid(&self) -> bool {
        self.0.iter().all(|d| !d.is_open || d.open < d.close)
    }
}

/// The canonical ordered slot start times for one calendar date.
///
/// Starts at `open` and steps by 30 minutes; a slot starting at or after
/// `close` is never generated (close 18:00 → last slot 17:30). Closed day →
/// empty. Pure: whether a slot is in the past is the resolver's concern,
/// never decided here.
pub fn day_slot_starts(hours: &WeekSchedule, date: NaiveDate) -> Vec<Ms> {
    let day = hours.day(date.weekday());
    if !day.is_open {
        return Vec::new();
    }
    let open = date.and_time(day.open).and_utc().timestamp_millis();
    let close = date.and_time(day.close).and_utc().timestamp_millis();

    let mut starts = Vec::new();
    let mut t = open;
    while t < close {
        starts.push(t);
        t += SLOT_MS;
    }
    starts
}

/// The UTC day `[midnight, midnight)` containing the given date.
pub fn day_span(date: NaiveDate) -> Span {
    let start = date.and_time(NaiveTime::MIN).and_utc().timestamp_millis();
    Span::new(start, start + DAY_MS)
}

/// Calendar date a timestamp falls on.
pub fn date_of(t: Ms) -> NaiveDate {
    chrono::DateTime::from_timestamp_millis(t)
        .map(|dt| dt.date_naive())
        .unwrap_or_default()
}
