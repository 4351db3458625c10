//! Per-connection subscribe handshake.
//!
//! `AwaitingSubscribe` → `Active`. A `subscribe` frame (in either state)
//! answers with `initial` then `subscribed`. Bad frames get an `error`
//! reply and leave the state untouched; they never close the connection.

use crate::consts::{DEFAULT_SUBSCRIBE_LIMIT, saturate_limit};
use crate::protocol::{ClientMessage, ServerMessage};

use super::buffer::EventBuffer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    AwaitingSubscribe,
    /// Holds the clamped limit of the most recent handshake.
    Active { limit: usize },
}

#[derive(Debug)]
pub struct Subscription {
    state: SubscriptionState,
}

impl Default for Subscription {
    fn default() -> Self {
        Self::new()
    }
}

impl Subscription {
    /// A fresh handshake in `AwaitingSubscribe`.
    pub fn new() -> Self {
        Self {
            state: SubscriptionState::AwaitingSubscribe,
        }
    }

    pub fn state(&self) -> SubscriptionState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, SubscriptionState::Active { .. })
    }

    /// Process one inbound text frame. Returns the replies, in send order.
    pub fn handle(&mut self, text: &str, buffer: &EventBuffer) -> Vec<ServerMessage> {
        match ClientMessage::parse(text) {
            Ok(ClientMessage::Subscribe { limit }) => {
                let requested = limit.as_ref().map(|n| n.to_string());
                let limit = limit
                    .as_ref()
                    .map(saturate_limit)
                    .unwrap_or(DEFAULT_SUBSCRIBE_LIMIT);
                let data = buffer.most_recent(limit);
                tracing::info!(?requested, limit, sent = data.len(), "serving initial batch");
                self.state = SubscriptionState::Active { limit };
                vec![ServerMessage::Initial { data }, ServerMessage::Subscribed]
            }
            Err(e) => {
                tracing::warn!(error = %e, state = ?self.state, "rejecting client frame");
                vec![ServerMessage::error(e.to_string())]
            }
        }
    }
}
