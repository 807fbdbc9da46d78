use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::model::{Event, SpaceCode};

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for committed events, per space and facility-wide.
/// Subscribers re-query `snapshot()`/`report()` on receipt; they never keep
/// their own copy of the state.
pub struct NotifyHub {
    channels: DashMap<SpaceCode, broadcast::Sender<Event>>,
    all: broadcast::Sender<Event>,
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
            all: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }

    /// Subscribe to one space. Creates the channel if needed.
    pub fn subscribe(&self, code: &str) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(code.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    pub fn subscribe_all(&self) -> broadcast::Receiver<Event> {
        self.all.subscribe()
    }

    /// Send a notification. No-op if nobody is listening.
    pub fn send(&self, event: &Event) {
        if let Some(sender) = self.channels.get(event.space()) {
            let _ = sender.send(event.clone());
        }
        let _ = self.all.send(event.clone());
    }

    /// Drop a space's channel once the space is gone.
    pub fn remove(&self, code: &str) {
        self.channels.remove(code);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let mut space_rx = hub.subscribe("A-01");
        let mut all_rx = hub.subscribe_all();

        let event = Event::SpaceRemoved { code: "A-01".into() };
        hub.send(&event);

        assert_eq!(space_rx.recv().await.unwrap(), event);
        assert_eq!(all_rx.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn other_space_not_delivered() {
        let hub = NotifyHub::new();
        let mut rx = hub.subscribe("A-01");
        hub.send(&Event::SpaceRemoved { code: "B-07".into() });
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        hub.send(&Event::SpaceRemoved { code: "A-01".into() });
    }
}
