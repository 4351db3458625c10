//! Wire messages exchanged over the `/stream` socket.
//!
//! Every frame is a JSON object with a `type` discriminator. Parsing produces
//! either a known variant or a [`ProtocolError`], never a half-typed value.

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use thiserror::Error;

use crate::hook::HookEvent;

/// Frames a client sends to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// `limit` is any JSON number; the server saturates it into range.
    Subscribe {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        limit: Option<Number>,
    },
}

/// Frames the server sends to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Subscribed,
    Initial { data: Vec<HookEvent> },
    Event { data: HookEvent },
    Error { message: String },
}

const CLIENT_TYPES: &[&str] = &["subscribe"];
const SERVER_TYPES: &[&str] = &["subscribed", "initial", "event", "error"];

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Invalid JSON")]
    InvalidJson,

    #[error("message has no `type` field")]
    MissingType,

    #[error("unknown message type: {0}")]
    UnknownType(String),

    #[error("malformed `{kind}` message: {reason}")]
    InvalidMessage { kind: String, reason: String },

    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}

impl ClientMessage {
    /// A `subscribe` carrying the client's window size.
    pub fn subscribe(limit: usize) -> Self {
        ClientMessage::Subscribe {
            limit: Some(Number::from(limit as u64)),
        }
    }

    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        parse_tagged(text, CLIENT_TYPES)
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }

    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        parse_tagged(text, SERVER_TYPES)
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    /// The `type` tag, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::Subscribed => "subscribed",
            ServerMessage::Initial { .. } => "initial",
            ServerMessage::Event { .. } => "event",
            ServerMessage::Error { .. } => "error",
        }
    }
}

fn parse_tagged<T: serde::de::DeserializeOwned>(
    text: &str,
    known: &[&str],
) -> Result<T, ProtocolError> {
    let value: Value = serde_json::from_str(text).map_err(|_| ProtocolError::InvalidJson)?;
    let kind = match value.get("type") {
        Some(Value::String(kind)) => kind.clone(),
        _ => return Err(ProtocolError::MissingType),
    };
    if !known.contains(&kind.as_str()) {
        return Err(ProtocolError::UnknownType(kind));
    }
    serde_json::from_value(value).map_err(|e| ProtocolError::InvalidMessage {
        kind,
        reason: e.to_string(),
    })
}
