//! Server half: in-memory history, the live connection registry, the
//! subscribe handshake, and the HTTP/WebSocket surface around them.

pub mod buffer;
pub mod http;
pub mod hub;
pub mod registry;
pub mod subscription;

use std::net::SocketAddr;
use std::time::Duration;

use crate::consts::{
    DEFAULT_BIND, DEFAULT_BUFFER_CAPACITY, DEFAULT_OUTBOUND_QUEUE, DEFAULT_SEND_TIMEOUT,
};

pub use buffer::EventBuffer;
pub use hub::Hub;
pub use registry::{BroadcastReport, ChannelConnection, Connection, ConnectionId, ConnectionRegistry};
pub use subscription::{Subscription, SubscriptionState};

/// Knobs for `hookstream serve`.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    pub buffer_capacity: usize,
    pub send_timeout: Duration,
    pub outbound_queue: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND
                .parse()
                .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], 4000))),
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            send_timeout: DEFAULT_SEND_TIMEOUT,
            outbound_queue: DEFAULT_OUTBOUND_QUEUE,
        }
    }
}
