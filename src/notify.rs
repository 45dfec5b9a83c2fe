use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for change subscriptions, one channel per stylist.
/// Subscribers that fall behind see `Lagged` and should do a full refresh;
/// the engine never blocks on slow listeners.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to changes touching one stylist's calendar. Creates the
    /// channel on first use.
    pub fn subscribe(&self, stylist_id: Ulid) -> broadcast::Receiver<Event> {
        self.channels
            .entry(stylist_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Push a change event. No-op if nobody is listening.
    pub fn send(&self, stylist_id: Ulid, event: &Event) {
        if let Some(sender) = self.channels.get(&stylist_id) {
            let _ = sender.send(event.clone());
        }
    }

    /// Drop a stylist's channel (stylist deleted). Live receivers observe
    /// `Closed` on their next recv.
    pub fn remove(&self, stylist_id: &Ulid) {
        self.channels.remove(stylist_id);
    }
}
