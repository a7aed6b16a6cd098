//! Live side-channel state shared by the browser SPA and the `wm` CLI:
//! scratch pad, marked files, clipboard, and UI layout. Each substore is a
//! lock-guarded value plus a set of bounded subscriber channels.

pub mod clipboard;
pub mod marked;
pub mod scratch;
pub mod ui_state;

use parking_lot::Mutex;
use tokio::sync::mpsc;

/// Capacity of each subscriber channel. A full channel means the subscriber
/// is slow; the message is dropped and the subscriber resynchronizes from
/// the next event or by polling the corresponding GET endpoint.
pub const SUBSCRIBER_CAPACITY: usize = 10;

/// Fan-out of events to event-stream subscribers.
///
/// Publishers never block: `publish` snapshots the sender list under the
/// lock, releases it, then `try_send`s to each channel. Subscribers own
/// their receiver; when it drops, the dead sender is pruned on the next
/// publish.
pub struct Publisher<T> {
    subscribers: Mutex<Vec<mpsc::Sender<T>>>,
}

impl<T: Clone> Publisher<T> {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Register a new subscriber and return its receiving end.
    pub fn subscribe(&self) -> mpsc::Receiver<T> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CAPACITY);
        self.subscribers.lock().push(tx);
        rx
    }

    /// Send `event` to every live subscriber without blocking. Slow
    /// subscribers miss the event; disconnected ones are removed.
    pub fn publish(&self, event: T) {
        let snapshot: Vec<mpsc::Sender<T>> = self.subscribers.lock().clone();
        let mut saw_closed = false;
        for tx in &snapshot {
            match tx.try_send(event.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    // Subscriber is lagging; it will resync via GET.
                }
                Err(mpsc::error::TrySendError::Closed(_)) => saw_closed = true,
            }
        }
        if saw_closed {
            self.subscribers.lock().retain(|tx| !tx.is_closed());
        }
    }

    #[cfg(test)]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

impl<T: Clone> Default for Publisher<T> {
    fn default() -> Self {
        Self::new()
    }
}
