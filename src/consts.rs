//! Project-wide constants.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::Number;

pub const AUTHOR: &str = env!("CARGO_PKG_AUTHORS");
pub const HOMEPAGE: &str = env!("CARGO_PKG_HOMEPAGE");
pub const REPO: &str = env!("CARGO_PKG_REPOSITORY");

/// Default listen address for `hookstream serve`.
pub const DEFAULT_BIND: &str = "0.0.0.0:4000";

/// Path of the upgrade endpoint.
pub const STREAM_PATH: &str = "/stream";

/// Default WebSocket URL for `hookstream watch`.
pub const DEFAULT_STREAM_URL: &str = "ws://localhost:4000/stream";

/// Default HTTP base URL for `hookstream emit`.
pub const DEFAULT_SERVER_URL: &str = "http://localhost:4000";

/// How many events the server keeps in memory, independent of any client window.
pub const DEFAULT_BUFFER_CAPACITY: usize = 5000;

/// Hard ceiling on a `subscribe` limit, regardless of what the client asks for.
pub const MAX_SUBSCRIBE_LIMIT: usize = 5000;

/// Limit used when a `subscribe` message carries none.
pub const DEFAULT_SUBSCRIBE_LIMIT: usize = 1000;

/// Default `limit` for `GET /events/recent`.
pub const DEFAULT_RECENT_LIMIT: usize = 100;

/// Client window size when no preference has been stored.
pub const DEFAULT_MAX_EVENTS: usize = 1000;

/// Fixed delay between a close and the next connection attempt.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Per-connection send deadline during a broadcast.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(1);

/// Outbound frames queued per connection before sends start failing.
pub const DEFAULT_OUTBOUND_QUEUE: usize = 256;

/// Capacity of the client-side notification bus.
pub const CLIENT_EVENT_CAPACITY: usize = 256;

/// Default database path: `~/.hookstream/hookstream.db`.
/// Holds stored events on the server and preferences on the client.
pub fn default_db_path() -> Result<PathBuf> {
    let home = dirs::home_dir().context("cannot determine home directory")?;
    Ok(home.join(".hookstream").join("hookstream.db"))
}

/// Clamp a requested batch size into `[1, MAX_SUBSCRIBE_LIMIT]`.
pub fn clamp_limit(requested: i64) -> usize {
    requested.clamp(1, MAX_SUBSCRIBE_LIMIT as i64) as usize
}

/// [`clamp_limit`] for a raw JSON number. Floats and values outside `i64`
/// saturate instead of failing; fractions round down.
pub fn saturate_limit(requested: &Number) -> usize {
    if let Some(n) = requested.as_i64() {
        return clamp_limit(n);
    }
    if requested.as_u64().is_some() {
        return MAX_SUBSCRIBE_LIMIT;
    }
    match requested.as_f64() {
        Some(f) if f >= MAX_SUBSCRIBE_LIMIT as f64 => MAX_SUBSCRIBE_LIMIT,
        Some(f) if f >= 1.0 => f as usize,
        _ => 1,
    }
}

/// Format a number with comma separators (e.g. 1,234,567).
pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().enumerate() {
        if i > 0 && (s.len() - i).is_multiple_of(3) {
            result.push(',');
        }
        result.push(c);
    }
    result
}
