// Event and action payload type definitions.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config;

/// An opaque, immutable message on an entity's queue. Ordering matters only
/// within one entity's queue (FIFO); there is no cross-entity guarantee.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub name: String,
    pub payload: Value,
}

impl Event {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            payload: Value::Null,
        }
    }

    pub fn with_payload(name: impl Into<String>, payload: Value) -> Self {
        Self {
            name: name.into(),
            payload,
        }
    }

    /// Internal event queued when an entity enters a state with a body.
    pub(crate) fn state_entry(symbol: &str) -> Self {
        Self::new(format!("{}{}", config::events::STATE_EVENT_PREFIX, symbol))
    }

    /// The state symbol if this is a state-entry event.
    pub(crate) fn state_symbol(&self) -> Option<&str> {
        self.name.strip_prefix(config::events::STATE_EVENT_PREFIX)
    }
}

/// Payload the external action system delivers when an action fires.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionInfo {
    pub action: String,
    pub value: f64,
    pub time: f64,
}

impl ActionInfo {
    pub fn new(action: impl Into<String>, value: f64, time: f64) -> Self {
        Self {
            action: action.into(),
            value,
            time,
        }
    }

    /// Converts the invocation into the queue message handlers receive.
    pub fn into_event(self) -> Event {
        let payload = json!({ "value": self.value, "time": self.time });
        Event::with_payload(self.action, payload)
    }
}
