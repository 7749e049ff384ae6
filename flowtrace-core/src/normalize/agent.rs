//! Agent transaction field extraction.

use serde_json::{Map, Value};

use super::inspect::scalar_text;
use crate::types::Role;

const TEXT_FIELDS: &[&str] = &["content", "text", "message"];

/// Conversation fields of one agent transaction.
#[derive(Debug, Default)]
pub(crate) struct AgentEntry {
    pub role: Option<Role>,
    pub text: Option<String>,
    pub block_id: Option<String>,
    pub turn_id: Option<String>,
}

impl AgentEntry {
    pub(crate) fn read(entry: &Map<String, Value>) -> Self {
        let role = entry
            .get("role")
            .and_then(Value::as_str)
            .and_then(Role::from_raw);

        Self {
            role,
            text: text_of(entry),
            block_id: entry.get("block_id").and_then(scalar_text),
            turn_id: entry.get("turn_id").and_then(scalar_text),
        }
    }
}

/// Utterance text: the first of `content`/`text`/`message` that yields any.
///
/// Values may be plain strings, `{ "content": ... }` / `{ "text": ... }`
/// objects, or arrays of such parts (joined with newlines).
fn text_of(entry: &Map<String, Value>) -> Option<String> {
    TEXT_FIELDS
        .iter()
        .find_map(|field| entry.get(*field).and_then(flatten_text))
}

fn flatten_text(value: &Value) -> Option<String> {
    match value {
        Value::String(_) | Value::Number(_) => scalar_text(value),
        Value::Object(obj) => ["text", "content"]
            .iter()
            .find_map(|k| obj.get(*k).and_then(flatten_text)),
        Value::Array(parts) => {
            let pieces: Vec<String> = parts.iter().filter_map(flatten_text).collect();
            (!pieces.is_empty()).then(|| pieces.join("\n"))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn read(v: Value) -> AgentEntry {
        AgentEntry::read(v.as_object().unwrap())
    }

    #[test]
    fn test_reads_transaction_fields() {
        let entry = read(json!({
            "role": "assistant",
            "content": "How can I help?",
            "block_id": "blk-1",
            "turn_id": "turn-9"
        }));
        assert_eq!(entry.role, Some(Role::Assistant));
        assert_eq!(entry.text.as_deref(), Some("How can I help?"));
        assert_eq!(entry.block_id.as_deref(), Some("blk-1"));
        assert_eq!(entry.turn_id.as_deref(), Some("turn-9"));
    }

    #[test]
    fn test_text_fallbacks() {
        assert_eq!(read(json!({"text": "hi"})).text.as_deref(), Some("hi"));
        assert_eq!(
            read(json!({"message": {"content": "nested"}})).text.as_deref(),
            Some("nested")
        );
        assert_eq!(
            read(json!({"content": [{"type": "text", "text": "a"}, {"type": "text", "text": "b"}]}))
                .text
                .as_deref(),
            Some("a\nb")
        );
        assert_eq!(read(json!({"content": ""})).text, None);
    }
}
