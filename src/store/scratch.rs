//! Shared scratch pad: a single text value the browser and `wm` both edit.
//! Survives all session churn; lives only as long as the daemon.

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;

use super::Publisher;

/// Event delivered to scratch pad subscribers. Serializes as
/// `{"type":"init"|"text"|"toggle"|"clear","text":...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ScratchEvent {
    /// Sent once on subscribe, carrying the current text.
    Init { text: String },
    /// The text was replaced.
    Text { text: String },
    /// Show/hide signal; carries the current text, which is unchanged.
    Toggle { text: String },
    /// The pad was cleared.
    Clear { text: String },
}

pub struct ScratchPad {
    text: Mutex<String>,
    events: Publisher<ScratchEvent>,
}

impl ScratchPad {
    pub fn new() -> Self {
        Self {
            text: Mutex::new(String::new()),
            events: Publisher::new(),
        }
    }

    pub fn get(&self) -> String {
        self.text.lock().clone()
    }

    /// Replace the text and notify subscribers.
    pub fn set(&self, text: String) {
        *self.text.lock() = text.clone();
        self.events.publish(ScratchEvent::Text { text });
    }

    /// Publish a toggle event carrying the current text without modifying it.
    /// Returns the current text for the HTTP response.
    pub fn toggle(&self) -> String {
        let text = self.text.lock().clone();
        self.events.publish(ScratchEvent::Toggle { text: text.clone() });
        text
    }

    /// Clear the pad and notify subscribers.
    pub fn clear(&self) {
        self.text.lock().clear();
        self.events.publish(ScratchEvent::Clear {
            text: String::new(),
        });
    }

    /// Register a subscriber. The snapshot for the `init` event is taken
    /// under the text lock, so no mutation can slip between the snapshot and
    /// the registration.
    pub fn subscribe(&self) -> (ScratchEvent, mpsc::Receiver<ScratchEvent>) {
        let text = self.text.lock();
        let rx = self.events.subscribe();
        (ScratchEvent::Init { text: text.clone() }, rx)
    }
}

impl Default for ScratchPad {
    fn default() -> Self {
        Self::new()
    }
}
