//! Session id discovery.
//!
//! SmartFlow session ids look like
//! `1760633456-000000000001105328-SR-000-000000000000DEN140-2EBE8011`: a
//! ten-digit epoch, a numeric account, the `SR` marker, and one or two
//! alphanumeric suffix groups.

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

const ID_FIELDS: &[&str] = &["session_id", "sid", "SESSION_ID"];

fn session_id_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\d{10}-\d+-SR-\d+-[A-Z0-9]+(?:-[A-Z0-9]+)?").expect("valid regex")
    })
}

fn quoted_field_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#""(session_id|sid|SESSION_ID)":\s*"([^"]+)""#).expect("valid regex")
    })
}

/// Whether `candidate` is entirely a session id.
pub fn is_session_id(candidate: &str) -> bool {
    session_id_re()
        .find(candidate.trim())
        .map(|m| m.start() == 0 && m.end() == candidate.trim().len())
        .unwrap_or(false)
}

/// Find the session id in a plain-text log dump.
///
/// Checks, in order: the line two below a `SESSION ID` header, the line
/// below `FLOW ID:`, quoted `session_id`/`sid`/`SESSION_ID` fields, and
/// finally any id-shaped substring.
pub fn from_text(text: &str) -> Option<String> {
    let lines: Vec<&str> = text.trim().lines().collect();

    for (i, line) in lines.iter().enumerate() {
        if line.to_ascii_uppercase().contains("SESSION ID") {
            if let Some(id) = lines.get(i + 2).and_then(|l| leading_id(l)) {
                return Some(id);
            }
        }
        if line.contains("FLOW ID:") {
            if let Some(id) = lines.get(i + 1).and_then(|l| leading_id(l)) {
                return Some(id);
            }
        }
    }

    // Field order matters more than position in the text.
    for field in ID_FIELDS {
        let found = quoted_field_re()
            .captures_iter(text)
            .find(|c| &c[1] == *field)
            .map(|c| c[2].to_string());
        if found.is_some() {
            return found;
        }
    }

    session_id_re().find(text).map(|m| m.as_str().to_string())
}

/// Find the session id in raw SmartFlow entries.
///
/// Prefers explicit id fields, then ids embedded in (possibly nested)
/// message text.
pub fn from_entries(entries: &[Value]) -> Option<String> {
    entries.iter().find_map(from_entry)
}

fn from_entry(entry: &Value) -> Option<String> {
    let explicit = ID_FIELDS.iter().find_map(|f| {
        entry
            .get(*f)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty() && *s != "unknown")
            .map(str::to_string)
    });
    if explicit.is_some() {
        return explicit;
    }

    match entry.get("message")? {
        Value::String(message) => {
            let nested = serde_json::from_str::<Value>(message.trim())
                .ok()
                .and_then(|v| v.get("message").and_then(Value::as_str).and_then(search));
            nested.or_else(|| search(message))
        }
        Value::Object(message) => message
            .get("SESSION_ID")
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .map(str::to_string),
        _ => None,
    }
}

fn leading_id(line: &str) -> Option<String> {
    session_id_re()
        .find(line.trim())
        .filter(|m| m.start() == 0)
        .map(|m| m.as_str().to_string())
}

fn search(text: &str) -> Option<String> {
    session_id_re().find(text).map(|m| m.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const ID: &str = "1760633456-000000000001105328-SR-000-000000000000DEN140-2EBE8011";

    #[test]
    fn test_is_session_id() {
        assert!(is_session_id(ID));
        assert!(is_session_id("1760633456-1-SR-0-ABC"));
        assert!(!is_session_id("session 1760633456-1-SR-0-ABC"));
        assert!(!is_session_id(""));
    }

    #[test]
    fn test_from_header() {
        let text = format!("SESSION ID\n----------\n{ID}\nother");
        assert_eq!(from_text(&text).as_deref(), Some(ID));

        let text = format!("FLOW ID:\n  {ID}  \n");
        assert_eq!(from_text(&text).as_deref(), Some(ID));
    }

    #[test]
    fn test_from_quoted_fields_then_anywhere() {
        let text = r#"{"log": {"sid": "abc", "session_id": "xyz"}}"#;
        assert_eq!(from_text(text).as_deref(), Some("xyz"));

        let text = format!("started call {ID} on trunk 4");
        assert_eq!(from_text(&text).as_deref(), Some(ID));

        assert_eq!(from_text("nothing to see"), None);
    }

    #[test]
    fn test_from_entries() {
        let nested = json!({"message": json!({"message": format!("begin {ID}")}).to_string()});
        assert_eq!(from_entries(&[json!({"ts": 1}), nested]).as_deref(), Some(ID));

        let explicit = json!({"session_id": "S-1", "message": ID});
        assert_eq!(from_entries(&[explicit]).as_deref(), Some("S-1"));

        let dict = json!({"message": {"SESSION_ID": "S-2"}});
        assert_eq!(from_entries(&[dict]).as_deref(), Some("S-2"));

        assert_eq!(from_entries(&[]), None);
    }
}
