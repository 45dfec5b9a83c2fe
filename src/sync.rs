use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use ulid::Ulid;

use crate::engine::Engine;
use crate::model::*;
use crate::observability;
use crate::schedule;

/// Quiet window after the first change event before re-resolving, so a burst
/// (a batch of block edits, say) costs one refresh instead of many.
const DEBOUNCE: Duration = Duration::from_millis(75);

/// Wait before re-subscribing after the stylist's channel closed.
const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(1);

/// A live view of one stylist's day.
///
/// Subscribes to the stylist's change feed and keeps a resolved
/// `DaySchedule` published through a watch channel: any relevant insert/
/// update/delete triggers a debounced re-resolution. The watched date can be
/// switched at any time; a refresh that finishes after the date moved on is
/// discarded rather than published (latest state wins). Dropping the watcher
/// aborts its task, cancelling any in-flight refresh for a view that no
/// longer exists.
pub struct DayWatcher {
    schedule_rx: watch::Receiver<DaySchedule>,
    date_tx: watch::Sender<NaiveDate>,
    task: JoinHandle<()>,
}

impl DayWatcher {
    pub fn spawn(engine: Arc<Engine>, stylist_id: Ulid, date: NaiveDate) -> Self {
        let initial = DaySchedule {
            stylist_id,
            date,
            slots: Vec::new(),
        };
        let (schedule_tx, schedule_rx) = watch::channel(initial);
        let (date_tx, date_rx) = watch::channel(date);
        let task = tokio::spawn(watch_loop(engine, stylist_id, date_rx, schedule_tx));
        Self {
            schedule_rx,
            date_tx,
            task,
        }
    }

    /// The most recently published schedule.
    pub fn schedule(&self) -> DaySchedule {
        self.schedule_rx.borrow().clone()
    }

    /// Wait until a new schedule is published.
    pub async fn changed(&mut self) -> Result<(), watch::error::RecvError> {
        self.schedule_rx.changed().await
    }

    /// Switch the watched date. The next published schedule is for the new
    /// date; anything in flight for the old one is dropped.
    pub fn set_date(&self, date: NaiveDate) {
        let _ = self.date_tx.send(date);
    }
}

impl Drop for DayWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Does this change event touch the given day at all? Hours, service, and
/// lifecycle events always count, since they can reshape the whole grid.
fn event_touches(event: &Event, window: &Span) -> bool {
    match event {
        Event::BlockInserted { span, .. }
        | Event::BlockUpdated { span, .. }
        | Event::BlockDeleted { span, .. } => span.overlaps(window),
        Event::ReservationCreated { scheduled_at, .. }
        | Event::ReservationStatusChanged { scheduled_at, .. } => {
            window.contains_instant(*scheduled_at)
        }
        _ => true,
    }
}

async fn watch_loop(
    engine: Arc<Engine>,
    stylist_id: Ulid,
    mut date_rx: watch::Receiver<NaiveDate>,
    schedule_tx: watch::Sender<DaySchedule>,
) {
    let mut events = engine.notify.subscribe(stylist_id);
    refresh(&engine, stylist_id, &date_rx, &schedule_tx).await;

    loop {
        tokio::select! {
            changed = date_rx.changed() => {
                if changed.is_err() {
                    break; // watcher dropped
                }
                refresh(&engine, stylist_id, &date_rx, &schedule_tx).await;
            }
            received = events.recv() => match received {
                Ok(event) => {
                    let window = schedule::day_span(*date_rx.borrow());
                    if !event_touches(&event, &window) {
                        continue;
                    }
                    // Let the burst settle, then drain whatever queued up;
                    // each drained event is covered by the single refresh.
                    tokio::time::sleep(DEBOUNCE).await;
                    while events.try_recv().is_ok() {}
                    refresh(&engine, stylist_id, &date_rx, &schedule_tx).await;
                }
                Err(broadcast::error::RecvError::Lagged(_)) => {
                    // missed events; the full re-resolution covers them
                    refresh(&engine, stylist_id, &date_rx, &schedule_tx).await;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    // Channel gone (stylist removed or hub reset). Live
                    // updates degrade to nothing; keep trying to come back.
                    tokio::time::sleep(RESUBSCRIBE_DELAY).await;
                    events = engine.notify.subscribe(stylist_id);
                    refresh(&engine, stylist_id, &date_rx, &schedule_tx).await;
                }
            },
        }
    }
}

async fn refresh(
    engine: &Engine,
    stylist_id: Ulid,
    date_rx: &watch::Receiver<NaiveDate>,
    schedule_tx: &watch::Sender<DaySchedule>,
) {
    let date = *date_rx.borrow();
    let day = match engine.day_schedule(stylist_id, date).await {
        Ok(day) => day,
        Err(_) => {
            // Store not readable: publish the grid as unknown, never as
            // bookable. The default grid stands in when hours are unknown.
            let starts = schedule::day_slot_starts(&schedule::WeekSchedule::default(), date);
            DaySchedule {
                stylist_id,
                date,
                slots: crate::engine::unknown_slots(&starts),
            }
        }
    };
    // The date may have moved while we resolved; a stale day must not
    // overwrite the current one.
    if *date_rx.borrow() != date {
        return;
    }
    metrics::counter!(observability::WATCH_REFRESHES_TOTAL).increment(1);
    let _ = schedule_tx.send(day);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::NotifyHub;
    use crate::schedule::SLOT_MS;
    use std::path::PathBuf;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("chairtime_test_sync");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    async fn engine_with_stylist(name: &str) -> (Arc<Engine>, Ulid) {
        let engine = Arc::new(Engine::new(test_wal_path(name), Arc::new(NotifyHub::new())).unwrap());
        let stylist = Ulid::new();
        engine
            .create_stylist(&Actor::stylist(stylist), stylist, None)
            .await
            .unwrap();
        (engine, stylist)
    }

    /// Tomorrow, so every slot is comfortably beyond the booking buffer.
    fn tomorrow() -> NaiveDate {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_millis() as Ms;
        schedule::date_of(now + 86_400_000)
    }

    fn slot_on(date: NaiveDate, hour: u32) -> Ms {
        date.and_hms_opt(hour, 0, 0).unwrap().and_utc().timestamp_millis()
    }

    #[tokio::test]
    async fn initial_schedule_published() {
        let (engine, stylist) = engine_with_stylist("initial.wal").await;
        let mut watcher = DayWatcher::spawn(engine, stylist, tomorrow());

        watcher.changed().await.unwrap();
        let day = watcher.schedule();
        assert_eq!(day.slots.len(), 18);
        assert!(day.slots.iter().all(|s| s.status == SlotStatus::Available));
    }

    #[tokio::test]
    async fn booking_shows_up_in_watched_day() {
        let (engine, stylist) = engine_with_stylist("booking_visible.wal").await;
        let date = tomorrow();
        let mut watcher = DayWatcher::spawn(engine.clone(), stylist, date);
        watcher.changed().await.unwrap();

        let at = slot_on(date, 11);
        engine
            .request_booking(&Actor::client(Ulid::new()), Ulid::new(), stylist, None, at, None)
            .await
            .unwrap();

        watcher.changed().await.unwrap();
        let day = watcher.schedule();
        let slot = day.slots.iter().find(|s| s.start == at).unwrap();
        assert_eq!(slot.status, SlotStatus::Booked);
    }

    #[tokio::test]
    async fn burst_of_edits_collapses_to_one_refresh() {
        let (engine, stylist) = engine_with_stylist("burst.wal").await;
        let date = tomorrow();
        let mut watcher = DayWatcher::spawn(engine.clone(), stylist, date);
        watcher.changed().await.unwrap();

        let actor = Actor::stylist(stylist);
        for hour in [10, 12, 14] {
            let span = Span::new(slot_on(date, hour), slot_on(date, hour + 1));
            engine
                .add_block(&actor, Ulid::new(), stylist, span, BlockStatus::Unavailable)
                .await
                .unwrap();
        }

        // give the debounce room to fire
        tokio::time::sleep(Duration::from_millis(300)).await;
        let day = watcher.schedule();
        for hour in [10, 12, 14] {
            let slot = day.slots.iter().find(|s| s.start == slot_on(date, hour)).unwrap();
            assert_eq!(slot.status, SlotStatus::Unavailable);
        }
    }

    #[tokio::test]
    async fn events_outside_watched_day_ignored() {
        let (engine, stylist) = engine_with_stylist("other_day.wal").await;
        let date = tomorrow();
        let other = date.succ_opt().unwrap();
        let mut watcher = DayWatcher::spawn(engine.clone(), stylist, date);
        watcher.changed().await.unwrap();
        let before = watcher.schedule();

        let span = Span::new(slot_on(other, 10), slot_on(other, 11));
        engine
            .add_block(&Actor::stylist(stylist), Ulid::new(), stylist, span, BlockStatus::Busy)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(watcher.schedule(), before);
    }

    #[tokio::test]
    async fn date_switch_republishes() {
        let (engine, stylist) = engine_with_stylist("date_switch.wal").await;
        let date = tomorrow();
        let next = date.succ_opt().unwrap();

        // only the second day carries a block
        let span = Span::new(slot_on(next, 10), slot_on(next, 11));
        engine
            .add_block(&Actor::stylist(stylist), Ulid::new(), stylist, span, BlockStatus::Busy)
            .await
            .unwrap();

        let mut watcher = DayWatcher::spawn(engine.clone(), stylist, date);
        watcher.changed().await.unwrap();
        assert!(watcher.schedule().slots.iter().all(|s| s.status == SlotStatus::Available));

        watcher.set_date(next);
        watcher.changed().await.unwrap();
        let day = watcher.schedule();
        assert_eq!(day.date, next);
        let busy = day.slots.iter().find(|s| s.start == slot_on(next, 10)).unwrap();
        assert_eq!(busy.status, SlotStatus::Busy);
    }

    #[tokio::test]
    async fn unknown_published_for_missing_stylist() {
        let engine = Arc::new(
            Engine::new(test_wal_path("missing_stylist.wal"), Arc::new(NotifyHub::new())).unwrap(),
        );
        let mut watcher = DayWatcher::spawn(engine, Ulid::new(), tomorrow());
        watcher.changed().await.unwrap();
        let day = watcher.schedule();
        assert!(!day.slots.is_empty());
        assert!(day.slots.iter().all(|s| s.status == SlotStatus::Unknown));
    }

    #[tokio::test]
    async fn slot_math_sanity() {
        // watcher tests lean on hour-aligned slots; keep the constant honest
        assert_eq!(SLOT_MS, 1_800_000);
    }
}
