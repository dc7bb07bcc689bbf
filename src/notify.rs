use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for engine events, one channel per floor. Booking flows and
/// occupancy dashboards subscribe to the floors they care about; a slow
/// subscriber only loses its own backlog.
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

    /// Subscribe to events for a floor. Creates the channel if needed.
    pub fn subscribe(&self, floor_id: Ulid) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(floor_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send an event. No-op if nobody is listening on that floor.
    pub fn send(&self, floor_id: Ulid, event: &Event) {
        if let Some(sender) = self.channels.get(&floor_id) {
            let _ = sender.send(event.clone());
        }
    }

    /// Drop a floor's channel.
    #[allow(dead_code)]
    pub fn remove(&self, floor_id: &Ulid) {
        self.channels.remove(floor_id);
    }
}
