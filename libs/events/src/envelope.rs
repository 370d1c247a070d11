//! Event envelope - the common wrapper for all inbound queue messages.

use std::io::Read;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, NaiveDateTime, Utc};
use flate2::read::GzDecoder;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};

use crate::EventError;

/// Header keys that never belong to an inline payload.
const HEADER_KEYS: &[&str] = &[
    "eventType",
    "event_type",
    "timestamp",
    "payload",
    "payload_version",
    "compression",
];

/// Largest decompressed payload [`EventEnvelope::decode`] accepts.
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 1024 * 1024;

/// A decoded queue message.
///
/// Constructed once per inbound message and never persisted; handlers
/// project the parts they need into their own records.
#[derive(Debug, Clone, PartialEq)]
pub struct EventEnvelope {
    /// The event type (e.g., "deployment.status_changed").
    pub event_type: String,

    /// When the event occurred.
    pub timestamp: DateTime<Utc>,

    /// Event-specific payload, always a JSON object.
    pub payload: Value,
}

impl EventEnvelope {
    /// Creates an envelope from already-decoded parts.
    pub fn new(event_type: impl Into<String>, timestamp: DateTime<Utc>, payload: Value) -> Self {
        Self {
            event_type: event_type.into(),
            timestamp,
            payload,
        }
    }

    /// Creates an envelope by serializing a typed payload.
    pub fn from_payload<P: Serialize>(
        event_type: impl Into<String>,
        timestamp: DateTime<Utc>,
        payload: &P,
    ) -> Result<Self, EventError> {
        Ok(Self::new(event_type, timestamp, serde_json::to_value(payload)?))
    }

    /// Decodes a raw message body.
    ///
    /// Accepts the camelCase wrapper (`eventType` + `payload`) and the
    /// snake_case document (`event_type` with inline fields, or `payload`
    /// compressed as announced by `compression`).
    pub fn decode(body: &[u8]) -> Result<Self, EventError> {
        Self::decode_with_limit(body, DEFAULT_MAX_PAYLOAD_BYTES)
    }

    /// Like [`decode`](Self::decode), rejecting compressed payloads that
    /// inflate past `max_payload_bytes`.
    pub fn decode_with_limit(body: &[u8], max_payload_bytes: usize) -> Result<Self, EventError> {
        let value: Value = serde_json::from_slice(body)?;
        let Value::Object(mut doc) = value else {
            return Err(EventError::InvalidPayload(
                "message body is not a JSON object".to_string(),
            ));
        };

        let event_type = match doc.remove("eventType").or_else(|| doc.remove("event_type")) {
            Some(Value::String(s)) if !s.trim().is_empty() => s,
            _ => return Err(EventError::MissingField("eventType")),
        };

        let timestamp = match doc.remove("timestamp") {
            Some(Value::String(s)) => parse_timestamp(&s)?,
            Some(other) => return Err(EventError::InvalidTimestamp(other.to_string())),
            None => return Err(EventError::MissingField("timestamp")),
        };

        let compression = match doc.remove("compression") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s),
            Some(other) => return Err(EventError::UnsupportedCompression(other.to_string())),
        };

        let payload = match doc.remove("payload") {
            Some(raw) => decode_payload(raw, compression.as_deref(), max_payload_bytes)?,
            None => {
                if let Some(scheme) = compression {
                    return Err(EventError::UnsupportedCompression(format!(
                        "{scheme} announced without a payload"
                    )));
                }
                let inline: Map<String, Value> = doc
                    .into_iter()
                    .filter(|(k, _)| !HEADER_KEYS.contains(&k.as_str()))
                    .collect();
                Value::Object(inline)
            }
        };

        Ok(Self {
            event_type,
            timestamp,
            payload,
        })
    }

    /// Encodes the envelope in the camelCase wrapper shape.
    pub fn encode(&self) -> Result<Vec<u8>, EventError> {
        let doc = serde_json::json!({
            "eventType": self.event_type,
            "timestamp": self.timestamp.to_rfc3339(),
            "payload": self.payload,
        });
        Ok(serde_json::to_vec(&doc)?)
    }

    /// Deserializes the payload into a typed struct.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, EventError> {
        serde_json::from_value(self.payload.clone())
            .map_err(|e| EventError::InvalidPayload(format!("{}: {e}", self.event_type)))
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, EventError> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    // Some producers omit the offset; those timestamps are UTC.
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|_| EventError::InvalidTimestamp(raw.to_string()))
}

fn decode_payload(
    raw: Value,
    compression: Option<&str>,
    max_bytes: usize,
) -> Result<Value, EventError> {
    let payload = match (compression, raw) {
        (None, Value::Object(map)) => Value::Object(map),
        (None, Value::String(s)) => serde_json::from_str(&s)?,
        (Some(scheme), Value::String(s)) if scheme.eq_ignore_ascii_case("gzip") => {
            let compressed = STANDARD
                .decode(s.trim())
                .map_err(|e| EventError::InvalidPayload(format!("invalid base64: {e}")))?;
            let mut json = Vec::new();
            GzDecoder::new(compressed.as_slice())
                .take(max_bytes as u64 + 1)
                .read_to_end(&mut json)
                .map_err(|e| EventError::InvalidPayload(format!("invalid gzip: {e}")))?;
            if json.len() > max_bytes {
                return Err(EventError::InvalidPayload(format!(
                    "decompressed payload exceeds {max_bytes} bytes"
                )));
            }
            serde_json::from_slice(&json)?
        }
        (Some(scheme), Value::String(_)) => {
            return Err(EventError::UnsupportedCompression(scheme.to_string()))
        }
        (_, other) => other,
    };

    if !payload.is_object() {
        return Err(EventError::InvalidPayload(
            "payload must be a JSON object".to_string(),
        ));
    }
    Ok(payload)
}
