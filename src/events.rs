//! Probe-service protocol events
//!
//! The probe service streams one JSON message per event over the session,
//! tagged by a `type` field. This module turns those messages into a closed
//! [`ProbeEvent`] enum and normalizes per-node payloads.

use crate::error::ProbeError;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

/// Timestamp type for consistent time handling across the application
pub type Timestamp = DateTime<Utc>;

/// One node's result as received from the vendor, field names untouched
pub type RawNode = Map<String, Value>;

/// Event received from the probe service while a task is running
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeEvent {
    /// The service accepted the task
    TaskAccept,
    /// One vantage point finished; carries the raw `data` payload
    NewData(Value),
    /// All nodes reported, the task is finished
    TaskEnd,
    /// The service gave up on the task
    TaskErr(String),
    /// Any tag this client does not know about
    Unknown(String),
}

impl ProbeEvent {
    /// Parse a text frame into an event
    ///
    /// # Errors
    ///
    /// Returns `ProbeError::Protocol` if the frame is not a JSON object.
    pub fn parse(text: &str) -> Result<Self, ProbeError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| ProbeError::Protocol(e.to_string()))?;

        let Value::Object(mut message) = value else {
            return Err(ProbeError::Protocol(format!(
                "expected a JSON object, got: {}",
                truncate(text, 120)
            )));
        };

        let tag = match message.get("type") {
            Some(Value::String(tag)) => tag.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        };

        let event = match tag.as_str() {
            "TaskAccept" => ProbeEvent::TaskAccept,
            "NewData" => ProbeEvent::NewData(message.remove("data").unwrap_or(Value::Null)),
            "TaskEnd" => ProbeEvent::TaskEnd,
            "TaskErr" => {
                let reason = ["error", "msg", "message"]
                    .iter()
                    .find_map(|key| message.get(*key).filter(|v| !v.is_null()))
                    .map(|v| match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .unwrap_or_else(|| "unknown error".to_string());
                ProbeEvent::TaskErr(reason)
            }
            _ => ProbeEvent::Unknown(tag),
        };

        Ok(event)
    }
}

/// Normalize a `NewData` payload into a raw node
///
/// Copies the vendor's `HttpCode` and `Loss` into `status` and `loss` when
/// present. Returns `None` when the payload is not an object.
pub fn normalize_node(data: Value) -> Option<RawNode> {
    let Value::Object(mut node) = data else {
        return None;
    };

    if let Some(code) = node.get("HttpCode").cloned() {
        node.insert("status".to_string(), code);
    }
    if let Some(loss) = node.get("Loss").cloned() {
        node.insert("loss".to_string(), loss);
    }

    Some(node)
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let head: String = text.chars().take(max_chars).collect();
        format!("{}...", head)
    }
}
