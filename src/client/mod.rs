//! Client half: the local window and the reconnecting connection that feeds it.

pub mod reconnect;
pub mod window;
pub mod ws;

use std::time::Duration;

use crate::consts::DEFAULT_RECONNECT_DELAY;

pub use reconnect::{ConnectionState, Connector, Link, ReconnectingClient};
pub use window::ClientWindow;
pub use ws::WsConnector;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Constant delay before every reconnect attempt. No jitter, no growth.
    pub reconnect_delay: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }
}
