//! Event system for gadget state notifications
//!
//! The monitor publishes link and pull-up transitions here; the controller's
//! speed watcher and any other subscriber consume them.

pub mod types;

pub use types::GadgetEvent;

use tokio::sync::broadcast;

/// Event channel capacity (ring buffer size)
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Event bus for broadcasting gadget events
///
/// # Example
///
/// ```no_run
/// use usb_gadgetd::events::{EventBus, GadgetEvent};
///
/// let bus = EventBus::new();
/// let mut rx = bus.subscribe();
///
/// bus.publish(GadgetEvent::PullUpChanged { pulled_up: true });
/// ```
pub struct EventBus {
    tx: broadcast::Sender<GadgetEvent>,
}

impl EventBus {
    /// Create a new event bus
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Publish an event to all subscribers
    ///
    /// Events published with no subscribers are dropped.
    pub fn publish(&self, event: GadgetEvent) {
        let _ = self.tx.send(event);
    }

    /// Subscribe to future events
    ///
    /// A subscriber that falls too far behind receives `Lagged` and misses
    /// events.
    pub fn subscribe(&self) -> broadcast::Receiver<GadgetEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_subscribers() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.publish(GadgetEvent::PullUpChanged { pulled_up: true });
        match rx.recv().await.unwrap() {
            GadgetEvent::PullUpChanged { pulled_up } => assert!(pulled_up),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::new();
        bus.publish(GadgetEvent::PullUpChanged { pulled_up: false });

        // Late subscribers only see later events
        let mut rx = bus.subscribe();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_event_serialization() {
        let json = serde_json::to_value(GadgetEvent::PullUpChanged { pulled_up: true }).unwrap();
        assert_eq!(json["event"], "gadget.pullup_changed");
        assert_eq!(json["data"]["pulled_up"], true);
    }
}
