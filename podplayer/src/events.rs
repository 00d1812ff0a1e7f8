use std::sync::{Arc, Mutex};

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

/// Receiving end handed to each subscriber.
pub type EventReceiver<E> = UnboundedReceiver<E>;

/// Fan-out of component events to any number of observers.
///
/// Every subscriber owns an unbounded channel, so a slow consumer never makes
/// another one miss an event and all of them see the same order. Senders whose
/// receiver was dropped are pruned on the next broadcast.
#[derive(Clone)]
pub struct EventBus<E> {
    subscribers: Arc<Mutex<Vec<UnboundedSender<E>>>>,
}

impl<E: Clone> EventBus<E> {
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn subscribe(&self) -> EventReceiver<E> {
        let (tx, rx) = unbounded_channel::<E>();
        {
            let mut subscribers = self
                .subscribers
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            subscribers.push(tx);
        }
        rx
    }

    pub fn broadcast(&self, event: E) {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

impl<E: Clone> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Drains every event already delivered to `rx`.
pub fn drain<E>(rx: &mut EventReceiver<E>) -> Vec<E> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribers_receive_events_in_order() {
        let bus = EventBus::<u32>::new();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        for i in 0..5 {
            bus.broadcast(i);
        }

        assert_eq!(drain(&mut a), vec![0, 1, 2, 3, 4]);
        assert_eq!(drain(&mut b), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let bus = EventBus::<u32>::new();
        let rx = bus.subscribe();
        let _kept = bus.subscribe();
        drop(rx);

        bus.broadcast(1);
        assert_eq!(bus.subscriber_count(), 1);
    }
}
