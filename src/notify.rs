use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::model::{Event, UnitId};

const CHANNEL_CAPACITY: usize = 256;

/// Per-unit broadcast of committed events. The payment collaborator subscribes
/// here to learn new reservation ids.
#[derive(Default)]
pub struct NotifyHub {
    channels: DashMap<UnitId, broadcast::Sender<Event>>,
}

impl NotifyHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to a unit's commits. Creates the channel if needed.
    pub fn subscribe(&self, unit_id: UnitId) -> broadcast::Receiver<Event> {
        self.channels
            .entry(unit_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// No-op if nobody is listening.
    pub fn send(&self, event: &Event) {
        if let Some(sender) = self.channels.get(&event.unit_id()) {
            let _ = sender.send(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use ulid::Ulid;

    use super::*;

    #[tokio::test]
    async fn subscriber_sees_only_its_unit() {
        let hub = NotifyHub::new();
        let mine = Ulid::new();
        let other = Ulid::new();
        let mut rx = hub.subscribe(mine);
        let _other_rx = hub.subscribe(other);

        hub.send(&Event::UnitRegistered { id: other, name: None });
        let event = Event::UnitRegistered { id: mine, name: None };
        hub.send(&event);

        assert_eq!(rx.recv().await.unwrap(), event);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        hub.send(&Event::UnitRegistered {
            id: Ulid::new(),
            name: None,
        });
    }
}
