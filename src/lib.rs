//! Booking and availability engine for a salon: clients book appointments
//! into fixed 30-minute slots, stylists shape their calendar with working
//! hours and availability blocks, and every view of a day's slots goes
//! through one resolution function so client, stylist, and admin screens can
//! never disagree about what is bookable.
//!
//! The engine keeps all state in memory behind per-stylist locks, made
//! durable by an append-only event WAL, and pushes change events to
//! subscribers so open views refresh without polling. Embed it in a service,
//! hand each call the current actor from your identity layer, and spawn
//! [`sweeper::run_sweeper`] / [`sweeper::run_compactor`] alongside it.

pub mod engine;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod schedule;
pub mod sweeper;
pub mod sync;
pub mod wal;

pub use engine::{DEFAULT_BUFFER_MS, Engine, EngineError};
pub use model::{Actor, Role};
pub use sync::DayWatcher;
