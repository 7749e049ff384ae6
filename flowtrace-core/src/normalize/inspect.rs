//! Payload inspection: recursive key search, wait_on and error detection.
//!
//! Variable dumps such as `SessionData` mention every variable the flow has
//! ever set, including stale `wait_on` values and old status codes, so the
//! configured skip keys are stripped before any search runs.

use regex::Regex;
use serde_json::{Map, Value};
use std::sync::OnceLock;

fn wait_on_quoted_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?i)"?wait_on"?\s*:\s*"([^"]+)""#).expect("valid regex"))
}

fn wait_on_variable_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?i)\$[^"]+\.wait_on"\s*:\s*"([^"]+)""#).expect("valid regex"))
}

fn wait_on_bare_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?i)wait_on[=:]\s*([^\s,}\]]+)"#).expect("valid regex"))
}

fn statuscode_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?i)"?statuscode"?\s*:\s*(\d+)"#).expect("valid regex"))
}

fn status_code_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?i)status[_\s]code\s*[:=]\s*(\d+)"#).expect("valid regex"))
}

fn status_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?i)status[:\s]+([4-5]\d{2})\b"#).expect("valid regex"))
}

/// Clone `value` with every object key in `skip` removed, at any depth.
pub(crate) fn strip_keys(value: &Value, skip: &[String]) -> Value {
    match value {
        Value::Object(map) => {
            let stripped: Map<String, Value> = map
                .iter()
                .filter(|(k, _)| !skip.iter().any(|s| s == *k))
                .map(|(k, v)| (k.clone(), strip_keys(v, skip)))
                .collect();
            Value::Object(stripped)
        }
        Value::Array(items) => Value::Array(items.iter().map(|v| strip_keys(v, skip)).collect()),
        other => other.clone(),
    }
}

/// Whether `value` carries information (non-null, non-empty, not `false`).
pub(crate) fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.trim().is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
        Value::Number(_) => true,
    }
}

/// Render a scalar for tags and display; strings are taken verbatim.
pub(crate) fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Depth-first search for the first truthy value whose key contains
/// `needle` (case-insensitive). Keys at a level are checked before
/// descending into that level's values.
pub(crate) fn find_key<'a>(value: &'a Value, needle: &str, max_depth: usize) -> Option<&'a Value> {
    find_key_at(value, needle, max_depth, 0)
}

fn find_key_at<'a>(value: &'a Value, needle: &str, max_depth: usize, depth: usize) -> Option<&'a Value> {
    if depth >= max_depth {
        return None;
    }
    match value {
        Value::Object(map) => map
            .iter()
            .find(|(k, v)| k.to_ascii_lowercase().contains(needle) && is_truthy(v))
            .map(|(_, v)| v)
            .or_else(|| {
                map.values()
                    .find_map(|v| find_key_at(v, needle, max_depth, depth + 1))
            }),
        Value::Array(items) => items
            .iter()
            .find_map(|v| find_key_at(v, needle, max_depth, depth + 1)),
        _ => None,
    }
}

/// Parse an integer from a JSON number or numeric string.
pub(crate) fn as_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Flatten stripped levels into one searchable string for the regex
/// fallbacks. Escaped quotes from embedded JSON strings are unescaped so the
/// patterns see `"key": value` shapes.
pub(crate) fn haystack(levels: &[Value]) -> String {
    levels
        .iter()
        .map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect::<Vec<_>>()
        .join(" ")
        .replace("\\\"", "\"")
}

/// Find a wait_on value in stripped levels.
pub(crate) fn detect_wait_on(levels: &[Value], text: &str, max_depth: usize) -> Option<String> {
    if !text.to_ascii_lowercase().contains("wait_on") {
        return None;
    }

    let structured = levels
        .iter()
        .find_map(|level| find_key(level, "wait_on", max_depth))
        .and_then(|v| match v {
            Value::String(s) => Some(s.trim().to_string()),
            Value::Object(_) | Value::Array(_) => Some(v.to_string()),
            other => scalar_text(other),
        })
        .filter(|s| !s.is_empty());
    if structured.is_some() {
        return structured;
    }

    [wait_on_quoted_re(), wait_on_variable_re()]
        .iter()
        .find_map(|re| re.captures(text).map(|c| c[1].to_string()))
        .or_else(|| {
            wait_on_bare_re()
                .captures(text)
                .map(|c| c[1].trim_matches(|ch| ch == '"' || ch == '\'').to_string())
        })
        .filter(|s| !s.is_empty())
}

/// Find an HTTP status code at or above `threshold`.
pub(crate) fn detect_status_error(
    levels: &[Value],
    text: &str,
    threshold: u16,
    max_depth: usize,
) -> Option<i64> {
    let threshold = i64::from(threshold);

    let structured = levels.iter().find_map(|level| {
        find_key(level, "statuscode", max_depth)
            .or_else(|| find_key(level, "status_code", max_depth))
            .and_then(as_integer)
    });
    if let Some(code) = structured {
        if code >= threshold {
            return Some(code);
        }
    }

    [statuscode_re(), status_code_re(), status_re()]
        .iter()
        .find_map(|re| re.captures(text).and_then(|c| c[1].parse::<i64>().ok()))
        .filter(|code| *code >= threshold)
}

/// Explicit error markers: an error-valued type/level field or a populated
/// `error` field. Returns the accompanying code, if any.
pub(crate) fn detect_explicit_error(levels: &[Value]) -> Option<Option<i64>> {
    const MARKER_FIELDS: &[&str] = &["type", "level", "levelname", "LogType", "logType"];
    const CODE_FIELDS: &[&str] = &["code", "status", "statusCode", "error_code"];

    levels.iter().find_map(|level| {
        let marked = MARKER_FIELDS.iter().any(|field| {
            level
                .get(*field)
                .and_then(Value::as_str)
                .map(|s| matches!(s.trim().to_ascii_lowercase().as_str(), "error" | "critical" | "fatal"))
                .unwrap_or(false)
        }) || level.get("error").map(is_truthy).unwrap_or(false);

        marked.then(|| {
            CODE_FIELDS
                .iter()
                .find_map(|field| level.get(*field).and_then(as_integer))
                .or_else(|| {
                    level
                        .get("error")
                        .and_then(|e| e.get("code").or_else(|| e.get("status")))
                        .and_then(as_integer)
                })
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn skip() -> Vec<String> {
        vec!["SessionData".to_string()]
    }

    #[test]
    fn test_strip_keys_removes_nested() {
        let v = json!({"a": 1, "SessionData": {"x": 1}, "b": [{"SessionData": 2, "c": 3}]});
        let stripped = strip_keys(&v, &skip());
        assert_eq!(stripped, json!({"a": 1, "b": [{"c": 3}]}));
    }

    #[test]
    fn test_find_key_checks_level_before_descending() {
        let v = json!({"deep": {"wait_on": "inner"}, "$PLAY_1.wait_on": "outer"});
        assert_eq!(find_key(&v, "wait_on", 10), Some(&json!("outer")));
    }

    #[test]
    fn test_find_key_skips_empty_values_and_respects_depth() {
        let v = json!({"wait_on": "", "next": {"wait_on": "dtmf"}});
        assert_eq!(find_key(&v, "wait_on", 10), Some(&json!("dtmf")));
        assert_eq!(find_key(&v, "wait_on", 1), None);
    }

    #[test]
    fn test_wait_on_structured_and_regex() {
        let levels = vec![json!({"params": {"wait_on": "speech"}})];
        let text = haystack(&levels);
        assert_eq!(detect_wait_on(&levels, &text, 10).as_deref(), Some("speech"));

        let levels = vec![json!({"message": "resume wait_on=dtmf, timeout=5"})];
        let text = haystack(&levels);
        assert_eq!(detect_wait_on(&levels, &text, 10).as_deref(), Some("dtmf"));

        let levels = vec![json!({"message": "nothing here"})];
        let text = haystack(&levels);
        assert_eq!(detect_wait_on(&levels, &text, 10), None);
    }

    #[test]
    fn test_wait_on_ignored_inside_session_data() {
        let raw = json!({"SessionData": {"$PLAY.wait_on": "speech"}, "msg": "ok"});
        let levels = vec![strip_keys(&raw, &skip())];
        let text = haystack(&levels);
        assert_eq!(detect_wait_on(&levels, &text, 10), None);
    }

    #[test]
    fn test_status_error_detection() {
        let levels = vec![json!({"response": {"statusCode": 503}})];
        let text = haystack(&levels);
        assert_eq!(detect_status_error(&levels, &text, 400, 10), Some(503));

        let levels = vec![json!({"response": {"status_code": "404"}})];
        let text = haystack(&levels);
        assert_eq!(detect_status_error(&levels, &text, 400, 10), Some(404));

        let levels = vec![json!({"response": {"statusCode": 200}})];
        let text = haystack(&levels);
        assert_eq!(detect_status_error(&levels, &text, 400, 10), None);

        let levels = vec![json!("upstream returned status: 502")];
        let text = haystack(&levels);
        assert_eq!(detect_status_error(&levels, &text, 400, 10), Some(502));
    }

    #[test]
    fn test_status_in_free_text_needs_whole_code() {
        let levels = vec![json!("queue status 5123 messages")];
        let text = haystack(&levels);
        assert_eq!(detect_status_error(&levels, &text, 400, 10), None);

        let levels = vec![json!("status 404, retrying")];
        let text = haystack(&levels);
        assert_eq!(detect_status_error(&levels, &text, 400, 10), Some(404));
    }

    #[test]
    fn test_explicit_error_markers() {
        assert_eq!(
            detect_explicit_error(&[json!({"type": "error", "code": 500})]),
            Some(Some(500))
        );
        assert_eq!(
            detect_explicit_error(&[json!({"levelname": "ERROR"})]),
            Some(None)
        );
        assert_eq!(
            detect_explicit_error(&[json!({"error": {"code": 42}})]),
            Some(Some(42))
        );
        assert_eq!(detect_explicit_error(&[json!({"error": null, "type": "info"})]), None);
    }
}
