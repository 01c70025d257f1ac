//! Per-record completion events.
//!
//! Deferred durable writes complete (or fail) after the originating call
//! has returned; observers subscribe through an explicit channel rather
//! than a global event bus.

use crate::error::TandemError;
use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::Mutex;

/// Outcome of a durable write delivered through the "updated" channel.
#[derive(Debug, Clone)]
pub struct UpdateEvent {
    /// Model name of the record.
    pub model: String,
    /// `Ok` when the write was applied, the terminal error otherwise.
    pub result: Result<(), TandemError>,
}

impl UpdateEvent {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Broadcast list of "updated" subscribers for one record.
#[derive(Debug, Default)]
pub struct UpdateListeners {
    senders: Mutex<Vec<Sender<UpdateEvent>>>,
}

impl UpdateListeners {
    pub fn subscribe(&self) -> Receiver<UpdateEvent> {
        let (tx, rx) = unbounded();
        self.senders.lock().push(tx);
        rx
    }

    /// Delivers an event to every live subscriber, dropping closed ones.
    pub fn emit(&self, event: UpdateEvent) {
        let mut senders = self.senders.lock();
        senders.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.senders.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscribe_and_emit() {
        let listeners = UpdateListeners::default();
        let rx = listeners.subscribe();
        listeners.emit(UpdateEvent {
            model: "Item".to_string(),
            result: Ok(()),
        });
        let event = rx.try_recv().unwrap();
        assert!(event.is_success());
        assert_eq!(event.model, "Item");
    }

    #[test]
    fn test_closed_subscribers_are_dropped() {
        let listeners = UpdateListeners::default();
        let rx = listeners.subscribe();
        drop(rx);
        listeners.emit(UpdateEvent {
            model: "Item".to_string(),
            result: Ok(()),
        });
        assert_eq!(listeners.subscriber_count(), 0);
    }
}
