//! Line-oriented parsing of the CLI's stream-json output.

use serde_json::{Map, Value};

/// Parse one line of stream-json output.
///
/// Returns the event object for well-formed JSON objects, `None` for blank
/// lines, invalid JSON, and JSON values that are not objects. The CLI
/// interleaves progress noise with real events; anything unparseable is
/// skipped rather than aborting the turn.
pub fn parse_stream_line(line: &str) -> Option<Map<String, Value>> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Object(map)) => Some(map),
        Ok(_) | Err(_) => None,
    }
}
