//! JSON codec for operator envelopes.
//!
//! ## Wire shape
//!
//! ```json
//! {
//!   "type": "COMMAND",
//!   "content": "CMD_OUTPUT",
//!   "source": "FRONTEND",
//!   "destination": "MAIN",
//!   "selectedClient": "cli1",
//!   "payload": "ls -la",
//!   "payload_size": 6,
//!   "client_size": 4
//! }
//! ```
//!
//! Only `type` is mandatory. Absent optional fields are omitted when
//! encoding, never written as `null`.

use serde_json::{Map, Value};
use tracing::warn;

use crate::models::envelope::{ContentKind, Envelope, MessageKind};
use crate::{AppError, Result};

const TYPE: &str = "type";
const CONTENT: &str = "content";
const SOURCE: &str = "source";
const DESTINATION: &str = "destination";
const SELECTED_CLIENT: &str = "selectedClient";
const PAYLOAD: &str = "payload";
const PAYLOAD_SIZE: &str = "payload_size";
const CLIENT_SIZE: &str = "client_size";

/// Decode and validate one envelope.
///
/// `max_payload` is the largest accepted payload, in bytes; longer
/// payloads are rejected, not truncated.
///
/// # Errors
///
/// Returns `AppError::Protocol` when the text is not a JSON object, when
/// `type` is missing or unknown, when `content` is unknown, when the
/// payload is too large, or when a `COMMAND` lacks `selectedClient` or
/// `payload`.
pub fn parse(wire: &str, max_payload: usize) -> Result<Envelope> {
    let value: Value =
        serde_json::from_str(wire).map_err(|e| AppError::Protocol(format!("malformed json: {e}")))?;
    let Value::Object(map) = value else {
        return Err(AppError::Protocol("envelope must be a json object".into()));
    };

    let kind = match map.get(TYPE) {
        Some(Value::String(s)) => s.parse::<MessageKind>()?,
        _ => return Err(AppError::Protocol("missing or invalid `type`".into())),
    };

    let content = match map.get(CONTENT) {
        Some(Value::String(s)) => Some(s.parse::<ContentKind>()?),
        _ => None,
    };

    let payload_size = int_field(&map, PAYLOAD_SIZE);
    if let Some(declared) = payload_size {
        if usize::try_from(declared).is_ok_and(|n| n > max_payload) {
            warn!(
                declared,
                max_payload, "declared payload_size exceeds the payload limit"
            );
        }
    }

    let payload = string_field(&map, PAYLOAD);
    if let Some(ref text) = payload {
        if text.len() > max_payload {
            return Err(AppError::Protocol(format!(
                "payload exceeds limit: {} > {max_payload} bytes",
                text.len()
            )));
        }
    }

    let envelope = Envelope {
        kind,
        content,
        source: string_field(&map, SOURCE),
        destination: string_field(&map, DESTINATION),
        payload,
        target_session: string_field(&map, SELECTED_CLIENT),
        payload_size,
        client_size: int_field(&map, CLIENT_SIZE),
    };

    validate(&envelope)?;
    Ok(envelope)
}

/// Encode an envelope as compact JSON.
///
/// # Errors
///
/// Returns `AppError::Protocol` if rendering fails.
pub fn serialize(envelope: &Envelope) -> Result<String> {
    let mut map = Map::new();
    map.insert(TYPE.into(), Value::from(envelope.kind.as_str()));
    if let Some(content) = envelope.content {
        map.insert(CONTENT.into(), Value::from(content.as_str()));
    }
    insert_str(&mut map, DESTINATION, envelope.destination.as_deref());
    insert_str(&mut map, SOURCE, envelope.source.as_deref());
    insert_str(&mut map, SELECTED_CLIENT, envelope.target_session.as_deref());
    insert_str(&mut map, PAYLOAD, envelope.payload.as_deref());
    if let Some(size) = envelope.payload_size {
        map.insert(PAYLOAD_SIZE.into(), Value::from(size));
    }
    if let Some(size) = envelope.client_size {
        map.insert(CLIENT_SIZE.into(), Value::from(size));
    }

    serde_json::to_string(&Value::Object(map))
        .map_err(|e| AppError::Protocol(format!("failed to encode envelope: {e}")))
}

/// Per-kind field requirements.
fn validate(envelope: &Envelope) -> Result<()> {
    if envelope.kind == MessageKind::Command {
        let has_target = envelope
            .target_session
            .as_deref()
            .is_some_and(|s| !s.is_empty());
        let has_payload = envelope.payload.as_deref().is_some_and(|s| !s.is_empty());
        if !has_target || !has_payload {
            return Err(AppError::Protocol(
                "COMMAND requires `selectedClient` and `payload`".into(),
            ));
        }
    }
    Ok(())
}

fn string_field(map: &Map<String, Value>, key: &str) -> Option<String> {
    map.get(key).and_then(Value::as_str).map(str::to_owned)
}

fn int_field(map: &Map<String, Value>, key: &str) -> Option<i64> {
    map.get(key).and_then(Value::as_i64)
}

fn insert_str(map: &mut Map<String, Value>, key: &str, value: Option<&str>) {
    if let Some(text) = value {
        map.insert(key.into(), Value::from(text));
    }
}
