//! Tasks dispatched by the hub, decisions, and the results reported back.

use crate::{Action, ActionOutcome, ProtocolError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;

/// The hub's correlation id for a task.
///
/// Kept as the raw JSON value so it is echoed back exactly as received,
/// whatever its type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Value);

impl SessionId {
    pub fn as_str(&self) -> Option<&str> {
        self.0.as_str()
    }

    /// A string that is distinct for distinct ids (`"42"` and `42` differ).
    pub fn key(&self) -> String {
        self.0.to_string()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Value::String(s) => f.write_str(s),
            other => write!(f, "{}", other),
        }
    }
}

impl From<Value> for SessionId {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(Value::String(value.to_string()))
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(Value::String(value))
    }
}

impl PartialEq<str> for SessionId {
    fn eq(&self, other: &str) -> bool {
        self.as_str() == Some(other)
    }
}

impl PartialEq<&str> for SessionId {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == Some(*other)
    }
}

/// One unit of requested work.
///
/// `messages` are opaque conversation turns. The agent never looks inside
/// them; it only forwards a trailing window to the decision service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub session_id: SessionId,
    #[serde(default, deserialize_with = "null_as_default")]
    pub messages: Vec<Value>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub instructions: String,
}

impl Task {
    /// Extracts a task from an `agent.chat.continue` payload.
    pub fn from_payload(payload: Value) -> Result<Self, ProtocolError> {
        serde_json::from_value(payload).map_err(ProtocolError::InvalidTask)
    }

    /// The last `window` messages, oldest first.
    pub fn recent_messages(&self, window: usize) -> &[Value] {
        let start = self.messages.len().saturating_sub(window);
        &self.messages[start..]
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// The reasoning service's answer for one task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    /// Narrative text, possibly empty.
    #[serde(default)]
    pub text: String,
    /// Actions to perform, in order.
    #[serde(default)]
    pub actions: Vec<Action>,
}

/// The single result reported for a task.
///
/// Completed results carry `response` and `actionsTaken`; failed ones carry
/// `error`. Both carry the originating `sessionId`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    pub success: bool,
    pub session_id: SessionId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actions_taken: Option<Vec<ActionOutcome>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl TaskResult {
    pub fn completed(
        session_id: impl Into<SessionId>,
        response: impl Into<String>,
        actions_taken: Vec<ActionOutcome>,
    ) -> Self {
        Self {
            success: true,
            session_id: session_id.into(),
            response: Some(response.into()),
            actions_taken: Some(actions_taken),
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn failed(session_id: impl Into<SessionId>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            session_id: session_id.into(),
            response: None,
            actions_taken: None,
            error: Some(error.into()),
            timestamp: Utc::now(),
        }
    }
}
