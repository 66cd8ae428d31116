//! The message envelope and handshake credentials.

use crate::{message_type, ProtocolError, TaskResult};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};
use std::fmt;
use uuid::Uuid;

/// One typed, timestamped message exchanged with the hub.
///
/// Inbound decoding is lenient about everything except `type`: a missing
/// payload becomes `null`, a missing or unreadable timestamp becomes the time
/// of receipt, and a numeric `messageId` is kept as its decimal string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default)]
    pub payload: Value,

    #[serde(default = "Utc::now", deserialize_with = "lenient_timestamp")]
    pub timestamp: DateTime<Utc>,

    /// Traceability only, never used for deduplication.
    #[serde(rename = "messageId", default, deserialize_with = "lenient_message_id")]
    pub message_id: String,
}

impl Envelope {
    /// Builds an outbound envelope stamped with the current time.
    ///
    /// The message id is `<suffix>-<uuid>`, where the suffix is the last
    /// dot-separated segment of `kind` (`auth-…`, `pong-…`, `result-…`).
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        let kind = kind.into();
        let prefix = kind.rsplit('.').next().unwrap_or("msg").to_string();
        Self {
            kind,
            payload,
            timestamp: Utc::now(),
            message_id: format!("{}-{}", prefix, Uuid::new_v4()),
        }
    }

    /// The handshake request for one connection.
    pub fn auth(credentials: &Credentials) -> Result<Self, ProtocolError> {
        let payload = serde_json::to_value(credentials).map_err(ProtocolError::Encode)?;
        Ok(Self::new(message_type::AUTH, payload))
    }

    pub fn pong() -> Self {
        Self::new(message_type::PONG, json!({}))
    }

    /// Wraps a task result for delivery to the hub.
    pub fn task_result(result: &TaskResult) -> Result<Self, ProtocolError> {
        let payload = serde_json::to_value(result).map_err(ProtocolError::Encode)?;
        Ok(Self::new(message_type::CHAT_CONTINUE_RESULT, payload))
    }

    /// Decodes one text frame.
    pub fn from_json(frame: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(frame).map_err(ProtocolError::MalformedEnvelope)
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }

    /// Returns `true` if this envelope carries the given `type` tag.
    pub fn is(&self, kind: &str) -> bool {
        self.kind == kind
    }
}

fn lenient_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    let parsed = match value {
        Some(Value::String(s)) => DateTime::parse_from_rfc3339(&s)
            .ok()
            .map(|t| t.with_timezone(&Utc)),
        Some(Value::Number(n)) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        _ => None,
    };
    Ok(parsed.unwrap_or_else(Utc::now))
}

fn lenient_message_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => s,
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    })
}

/// The identity presented once per connection during the handshake.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub tool: String,
    pub platform: String,
    #[serde(rename = "apiKey")]
    pub api_key: String,
}

impl Credentials {
    pub fn new(
        tool: impl Into<String>,
        platform: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            tool: tool.into(),
            platform: platform.into(),
            api_key: api_key.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("tool", &self.tool)
            .field("platform", &self.platform)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outbound_envelope_uses_wire_field_names() {
        let envelope = Envelope::pong();
        let json: Value = serde_json::from_str(&envelope.to_json().unwrap()).unwrap();

        assert_eq!(json["type"], "pong");
        assert!(json["messageId"].as_str().unwrap().starts_with("pong-"));
        assert!(json["timestamp"].is_string());
        assert!(json["payload"].is_object());
    }

    #[test]
    fn result_envelope_id_uses_last_segment() {
        let envelope = Envelope::new(message_type::CHAT_CONTINUE_RESULT, Value::Null);
        assert!(envelope.message_id.starts_with("result-"));
    }

    #[test]
    fn auth_envelope_carries_credentials() {
        let creds = Credentials::new("computer-use-agent", "docker", "secret");
        let envelope = Envelope::auth(&creds).unwrap();

        assert!(envelope.is(message_type::AUTH));
        assert_eq!(envelope.payload["tool"], "computer-use-agent");
        assert_eq!(envelope.payload["platform"], "docker");
        assert_eq!(envelope.payload["apiKey"], "secret");
    }

    #[test]
    fn credentials_debug_redacts_api_key() {
        let creds = Credentials::new("tool", "platform", "super-secret");
        let debug = format!("{:?}", creds);
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn inbound_envelope_tolerates_missing_fields() {
        let envelope = Envelope::from_json(r#"{"type":"ping"}"#).unwrap();
        assert!(envelope.is(message_type::PING));
        assert_eq!(envelope.payload, Value::Null);
        assert_eq!(envelope.message_id, "");
    }

    #[test]
    fn inbound_envelope_accepts_numeric_message_id() {
        let envelope = Envelope::from_json(
            r#"{"type":"authenticated","payload":{},"timestamp":"2025-01-02T03:04:05.000Z","messageId":42}"#,
        )
        .unwrap();
        assert_eq!(envelope.message_id, "42");
        assert_eq!(envelope.timestamp.to_rfc3339(), "2025-01-02T03:04:05+00:00");
    }

    #[test]
    fn inbound_envelope_with_garbage_timestamp_is_kept() {
        let envelope =
            Envelope::from_json(r#"{"type":"ping","timestamp":"yesterday-ish"}"#).unwrap();
        assert!(envelope.is(message_type::PING));
    }

    #[test]
    fn frame_without_type_is_malformed() {
        let err = Envelope::from_json(r#"{"payload":{}}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedEnvelope(_)));

        let err = Envelope::from_json("not json at all").unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedEnvelope(_)));
    }
}
