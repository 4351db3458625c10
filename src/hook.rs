//! The records that flow from agent hooks to observers.
//!
//! The distribution core only moves whole [`HookEvent`] values around.
//! Everything beyond the identifying fields is carried as opaque JSON.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One observed action from an agent session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HookEvent {
    /// Assigned by the store on ingestion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub source_app: String,
    pub session_id: String,
    pub hook_event_type: String,
    #[serde(default)]
    pub payload: Value,
    /// Epoch millis. Filled in by the store when the hook omits it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    /// Chat transcript, summary, human-in-the-loop question, and anything else.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl HookEvent {
    pub fn new(
        source_app: impl Into<String>,
        session_id: impl Into<String>,
        hook_event_type: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            id: None,
            source_app: source_app.into(),
            session_id: session_id.into(),
            hook_event_type: hook_event_type.into(),
            payload,
            timestamp: None,
            extra: Map::new(),
        }
    }

    /// Attach an extra top-level field (e.g. `summary`).
    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

/// A human's answer to a human-in-the-loop question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HumanInTheLoopResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permission: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub choice: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub responded_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub responded_by: Option<String>,
}

/// Lifecycle of a human-in-the-loop question, stored next to the event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HumanInTheLoopStatus {
    pub status: HitlState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub responded_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<HumanInTheLoopResponse>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HitlState {
    Pending,
    Responded,
    Timeout,
    Error,
}

/// Distinct values observed in the store, for client-side filter menus.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterOptions {
    pub source_apps: Vec<String>,
    pub session_ids: Vec<String>,
    pub hook_event_types: Vec<String>,
}
