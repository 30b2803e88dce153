//! Wire events delivered to SSE subscribers.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// One event on the session stream. Both backends emit the same shapes, so
/// clients never branch on connection type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireEvent {
    /// A raw streaming event, in the Messages API envelope.
    StreamEvent { event: Value },
    /// An error report. Terminal when it ends the turn; backend noise may
    /// also surface mid-stream without ending it.
    Error { error: String },
    /// Clean end of turn.
    Done,
}

impl WireEvent {
    /// Wrap a text fragment in the standard delta envelope.
    pub fn text_delta(text: &str) -> Self {
        WireEvent::StreamEvent {
            event: json!({
                "type": "content_block_delta",
                "delta": { "type": "text_delta", "text": text },
            }),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        WireEvent::Error {
            error: message.into(),
        }
    }

    pub fn into_value(self) -> Value {
        serde_json::to_value(self).expect("wire event serializes")
    }
}

/// Pull the text fragment out of a CLI stream event, if it carries one.
///
/// The CLI wraps Messages API events in a `stream_event` envelope; a bare
/// `content_block_delta` is accepted too.
pub fn extract_text_delta(event: &Map<String, Value>) -> Option<&str> {
    let inner = match event.get("type").and_then(Value::as_str) {
        Some("stream_event") => event.get("event")?.as_object()?,
        Some("content_block_delta") => event,
        _ => return None,
    };
    if inner.get("type").and_then(Value::as_str) != Some("content_block_delta") {
        return None;
    }
    let delta = inner.get("delta")?.as_object()?;
    if delta.get("type").and_then(Value::as_str) != Some("text_delta") {
        return None;
    }
    delta.get("text")?.as_str()
}

/// Pull the CLI's own session id out of an event, if present.
pub fn extract_cli_session_id(event: &Map<String, Value>) -> Option<&str> {
    event.get("session_id").and_then(Value::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obj(raw: &str) -> Map<String, Value> {
        serde_json::from_str(raw).unwrap()
    }

    #[test]
    fn test_text_delta_envelope() {
        let value = WireEvent::text_delta("hi").into_value();
        assert_eq!(value["type"], "stream_event");
        assert_eq!(value["event"]["type"], "content_block_delta");
        assert_eq!(value["event"]["delta"]["type"], "text_delta");
        assert_eq!(value["event"]["delta"]["text"], "hi");
    }

    #[test]
    fn test_terminal_events_serialize() {
        assert_eq!(WireEvent::Done.into_value(), json!({"type": "done"}));
        assert_eq!(
            WireEvent::error("boom").into_value(),
            json!({"type": "error", "error": "boom"})
        );
    }

    #[test]
    fn test_extract_delta_from_envelope() {
        let event = obj(
            r#"{"type":"stream_event","event":{"type":"content_block_delta","delta":{"type":"text_delta","text":"Hel"}}}"#,
        );
        assert_eq!(extract_text_delta(&event), Some("Hel"));
    }

    #[test]
    fn test_extract_delta_from_bare_event() {
        let event =
            obj(r#"{"type":"content_block_delta","delta":{"type":"text_delta","text":"lo"}}"#);
        assert_eq!(extract_text_delta(&event), Some("lo"));
    }

    #[test]
    fn test_non_text_events_yield_nothing() {
        assert!(extract_text_delta(&obj(r#"{"type":"system","session_id":"x"}"#)).is_none());
        assert!(
            extract_text_delta(&obj(
                r#"{"type":"stream_event","event":{"type":"content_block_start"}}"#
            ))
            .is_none()
        );
        assert!(
            extract_text_delta(&obj(
                r#"{"type":"content_block_delta","delta":{"type":"input_json_delta","partial_json":"{"}}"#
            ))
            .is_none()
        );
    }

    #[test]
    fn test_extract_session_id() {
        let event = obj(r#"{"type":"system","session_id":"cli-123"}"#);
        assert_eq!(extract_cli_session_id(&event), Some("cli-123"));
        assert!(extract_cli_session_id(&obj(r#"{"type":"done"}"#)).is_none());
    }
}
