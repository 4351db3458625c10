//! Notification bus for whatever sits on top of a [`ReconnectingClient`].
//!
//! The client emits via [`EventBus::emit`]; renderers subscribe via
//! [`EventBus::subscribe`]. Built on [`tokio::sync::broadcast`] so several
//! listeners can follow the same client independently.
//!
//! [`ReconnectingClient`]: crate::client::ReconnectingClient

use tokio::sync::broadcast;

use crate::client::ConnectionState;
use crate::consts::CLIENT_EVENT_CAPACITY;
use crate::hook::HookEvent;

/// Things a client observer may want to react to.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    StateChanged(ConnectionState),
    /// An `initial` batch replaced the window (carries the retained count).
    Baseline { count: usize },
    /// A live event was appended to the window.
    Received(HookEvent),
    /// The server answered with an `error` frame.
    ServerError(String),
}

#[derive(Debug)]
pub struct EventBus {
    tx: broadcast::Sender<ClientEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Emit to all current subscribers. Returns how many will see it.
    pub fn emit(&self, event: ClientEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    /// Future events only; nothing is replayed.
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(CLIENT_EVENT_CAPACITY)
    }
}
