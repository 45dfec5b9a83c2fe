mod conflict;
mod error;
mod mutations;
mod queries;
pub mod resolver;

pub use error::EngineError;
pub use resolver::{DEFAULT_BUFFER_MS, resolve_slots, unknown_slots};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::limits::WAL_WRITE_TIMEOUT;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::observability;
use crate::wal::Wal;

pub type SharedStylistState = Arc<RwLock<StylistState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        ack: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        ack: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        ack: oneshot::Sender<u64>,
    },
}

/// Background task owning the WAL. Appends are batched: the first Append
/// blocks, everything already queued behind it is drained, the whole batch
/// gets one fsync, then every sender is acked. Control commands queued behind
/// a batch run after its flush.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let WalCommand::Append { event, ack } = cmd else {
            handle_control(&mut wal, cmd);
            continue;
        };

        let mut batch = vec![(event, ack)];
        let mut control = Vec::new();
        while let Ok(next) = rx.try_recv() {
            match next {
                WalCommand::Append { event, ack } => batch.push((event, ack)),
                other => control.push(other),
            }
        }

        metrics::histogram!(observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let started = std::time::Instant::now();
        let result = flush_batch(&mut wal, &batch);
        metrics::histogram!(observability::WAL_FLUSH_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());

        for (_, ack) in batch {
            let r = match &result {
                Ok(()) => Ok(()),
                Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
            };
            let _ = ack.send(r);
        }
        for cmd in control {
            handle_control(&mut wal, cmd);
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even after an append error so partially buffered bytes don't
    // leak into the next batch (its callers are told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn handle_control(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, ack } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = ack.send(result);
        }
        WalCommand::AppendsSinceCompact { ack } => {
            let _ = ack.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the caller"),
    }
}

// ── Event application ────────────────────────────────────

/// Apply an event to a StylistState (no locking; caller holds the lock).
fn apply_event(rs: &mut StylistState, event: &Event, index: &DashMap<Ulid, Ulid>) {
    match event {
        Event::HoursSet { hours, .. } => {
            rs.hours = Some(*hours);
        }
        Event::ServiceAdded { id, stylist_id, name } => {
            rs.services.push(Service { id: *id, name: name.clone() });
            index.insert(*id, *stylist_id);
        }
        Event::ServiceRemoved { id, .. } => {
            rs.services.retain(|s| s.id != *id);
            index.remove(id);
        }
        Event::BlockInserted { id, stylist_id, span, status } => {
            rs.insert_block(AvailabilityBlock {
                id: *id,
                stylist_id: *stylist_id,
                span: *span,
                status: *status,
            });
            index.insert(*id, *stylist_id);
        }
        Event::BlockUpdated { id, status, .. } => {
            if let Some(block) = rs.block_mut(id) {
                block.status = *status;
            }
        }
        Event::BlockDeleted { id, .. } => {
            rs.remove_block(*id);
            index.remove(id);
        }
        Event::ReservationCreated {
            id,
            stylist_id,
            client_id,
            service_id,
            scheduled_at,
            notes,
        } => {
            rs.insert_reservation(Reservation {
                id: *id,
                stylist_id: *stylist_id,
                client_id: *client_id,
                service_id: *service_id,
                scheduled_at: *scheduled_at,
                status: ReservationStatus::Pending,
                notes: notes.clone(),
            });
            index.insert(*id, *stylist_id);
        }
        Event::ReservationStatusChanged { id, status, .. } => {
            if let Some(r) = rs.reservation_mut(id) {
                r.status = *status;
            }
        }
        // handled at the map level, not per-stylist
        Event::StylistCreated { .. } | Event::StylistDeleted { .. } => {}
    }
}

fn event_stylist_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::HoursSet { stylist_id, .. }
        | Event::ServiceAdded { stylist_id, .. }
        | Event::ServiceRemoved { stylist_id, .. }
        | Event::BlockInserted { stylist_id, .. }
        | Event::BlockUpdated { stylist_id, .. }
        | Event::BlockDeleted { stylist_id, .. }
        | Event::ReservationCreated { stylist_id, .. }
        | Event::ReservationStatusChanged { stylist_id, .. } => Some(*stylist_id),
        Event::StylistCreated { .. } | Event::StylistDeleted { .. } => None,
    }
}

// ── Engine ───────────────────────────────────────────────

pub struct Engine {
    pub(super) state: DashMap<Ulid, SharedStylistState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    /// Reverse lookup: entity (block/reservation/service) id → stylist id.
    pub(super) entity_to_stylist: Arc<DashMap<Ulid, Ulid>>,
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            state: DashMap::new(),
            wal_tx,
            notify,
            entity_to_stylist: Arc::new(DashMap::new()),
        };

        // Replay: we're the sole owner of these Arcs, so try_write always
        // succeeds instantly. Never blocking_write here: this may run inside
        // an async context.
        for event in &events {
            match event {
                Event::StylistCreated { id, name } => {
                    let rs = StylistState::new(*id, name.clone());
                    engine.state.insert(*id, Arc::new(RwLock::new(rs)));
                }
                Event::StylistDeleted { id } => {
                    engine.state.remove(id);
                    engine.entity_to_stylist.retain(|_, sid| sid != id);
                }
                other => {
                    if let Some(stylist_id) = event_stylist_id(other)
                        && let Some(entry) = engine.state.get(&stylist_id)
                    {
                        let rs = entry.value().clone();
                        let mut guard = rs.try_write().expect("replay: uncontended write");
                        apply_event(&mut guard, other, &engine.entity_to_stylist);
                    }
                }
            }
        }

        metrics::gauge!(observability::STYLISTS_ACTIVE).set(engine.state.len() as f64);
        Ok(engine)
    }

    pub fn get_stylist(&self, id: &Ulid) -> Option<SharedStylistState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    pub fn get_stylist_for_entity(&self, entity_id: &Ulid) -> Option<Ulid> {
        self.entity_to_stylist.get(entity_id).map(|e| *e.value())
    }

    /// Write event to the WAL via the background group-commit writer and
    /// wait for its ack, unbounded.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append { event: event.clone(), ack: tx })
            .await
            .map_err(|_| EngineError::StoreUnreachable("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::StoreUnreachable("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::StoreUnreachable(e.to_string()))
    }

    /// WAL-append + apply + notify in one call.
    pub(super) async fn persist_and_apply(
        &self,
        stylist_id: Ulid,
        rs: &mut StylistState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_event(rs, event, &self.entity_to_stylist);
        self.notify.send(stylist_id, event);
        Ok(())
    }

    /// Like `persist_and_apply`, but with a bounded wait on the WAL ack.
    ///
    /// If the ack does not arrive in time the outcome is unknown: the append
    /// may still land once the writer catches up. We report
    /// `StoreUnreachable` to the caller (who must re-fetch rather than retry
    /// blindly) and leave a background task behind that applies the event if
    /// the late ack turns out to be a success, so a re-fetch observes what
    /// actually happened.
    pub(super) async fn persist_and_apply_timed(
        &self,
        stylist_id: Ulid,
        state: &SharedStylistState,
        guard: &mut StylistState,
        event: &Event,
    ) -> Result<(), EngineError> {
        let (tx, mut rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append { event: event.clone(), ack: tx })
            .await
            .map_err(|_| EngineError::StoreUnreachable("WAL writer shut down".into()))?;

        tokio::select! {
            ack = &mut rx => match ack {
                Ok(Ok(())) => {
                    apply_event(guard, event, &self.entity_to_stylist);
                    self.notify.send(stylist_id, event);
                    Ok(())
                }
                Ok(Err(e)) => Err(EngineError::StoreUnreachable(e.to_string())),
                Err(_) => Err(EngineError::StoreUnreachable("WAL writer dropped response".into())),
            },
            _ = tokio::time::sleep(WAL_WRITE_TIMEOUT) => {
                let state = state.clone();
                let index = self.entity_to_stylist.clone();
                let notify = self.notify.clone();
                let event = event.clone();
                tokio::spawn(async move {
                    if let Ok(Ok(())) = rx.await {
                        let mut guard = state.write().await;
                        apply_event(&mut guard, &event, &index);
                        notify.send(stylist_id, &event);
                    }
                });
                Err(EngineError::StoreUnreachable(
                    "write timed out; outcome unknown, re-fetch before retrying".into(),
                ))
            }
        }
    }

    /// Lookup entity → stylist, fetch the stylist, acquire the write lock.
    pub(super) async fn resolve_entity_write(
        &self,
        entity_id: &Ulid,
    ) -> Result<(Ulid, tokio::sync::OwnedRwLockWriteGuard<StylistState>), EngineError> {
        let stylist_id = self
            .get_stylist_for_entity(entity_id)
            .ok_or(EngineError::NotFound(*entity_id))?;
        let rs = self
            .get_stylist(&stylist_id)
            .ok_or(EngineError::NotFound(stylist_id))?;
        let guard = rs.write_owned().await;
        Ok((stylist_id, guard))
    }
}
