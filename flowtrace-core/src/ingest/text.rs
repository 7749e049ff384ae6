//! SmartFlow plain-text dump parsing.
//!
//! The debug endpoint can also return a human-oriented dump instead of a
//! JSON array. Each record starts with a three-line header followed by either
//! a (possibly multi-line) JSON document or a few lines of free text:
//!
//! ```text
//! sf-worker-3.intelepeer.net
//! /var/log/smartflow/flow.log
//! 2025-10-16T14:30:56.123Z
//! {"log": {"message": "request: eyJ1c2VyIjoiYSJ9", "levelname": "INFO", ...}}
//! ```
//!
//! Records are converted into the same JSON entry shape the JSON endpoint
//! produces so they flow through normalization unchanged.

use base64::Engine;
use regex::Regex;
use serde_json::{json, Map, Value};
use std::sync::OnceLock;

use super::session_id;
use crate::config::IngestConfig;

fn payload_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?:request|response):\s*([A-Za-z0-9+/=]+)").expect("valid regex")
    })
}

fn ani_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\|Ani:\s*([^|]+)\|").expect("valid regex"))
}

fn dnis_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\|Dnis:\s*([^|]+)\|").expect("valid regex"))
}

/// Record header lines.
struct Header<'a> {
    host: &'a str,
    log_file_path: &'a str,
    timestamp: &'a str,
    /// Line index of the host line
    line: usize,
}

impl Header<'_> {
    fn id(&self) -> String {
        format!("{}_{}_{}", self.timestamp, self.host, self.line)
    }
}

/// Parse a plain-text SmartFlow dump into raw entries.
///
/// Unrecognized lines are skipped; JSON blocks that fail to parse or lack a
/// `log` object are dropped with a debug event.
pub fn parse_smartflow_text(text: &str, config: &IngestConfig) -> Vec<Value> {
    let lines: Vec<&str> = text.trim().lines().collect();
    let marker = config.host_marker.as_str();
    let mut entries = Vec::new();
    let mut skipped = 0usize;

    let mut i = 0;
    while i < lines.len() {
        let Some(header) = header_at(&lines, i, marker) else {
            i += 1;
            continue;
        };
        let start = i + 3;
        if start >= lines.len() {
            i += 1;
            continue;
        }

        if lines[start].trim_start().starts_with('{') {
            let end = json_block_end(&lines, start);
            let block = lines[start..=end].join("\n");
            match serde_json::from_str::<Value>(&block) {
                Ok(doc) => match doc.get("log").and_then(Value::as_object) {
                    Some(log) => entries.push(json_entry(&header, log)),
                    None => skipped += 1,
                },
                Err(err) => {
                    tracing::debug!(line = start, error = %err, "Skipping unparseable JSON block");
                    skipped += 1;
                }
            }
            i = end + 1;
        } else {
            let mut text_lines = Vec::new();
            let mut j = start;
            while j < lines.len() && text_lines.len() < config.max_text_lines {
                if lines[j].contains(marker) {
                    break;
                }
                let line = lines[j].trim();
                if !line.is_empty() {
                    text_lines.push(line);
                }
                j += 1;
            }
            if !text_lines.is_empty() {
                entries.push(text_entry(&header, &text_lines.join("\n")));
            }
            i = j.max(i + 1);
        }
    }

    tracing::debug!(
        entries = entries.len(),
        skipped,
        "Parsed SmartFlow text dump"
    );
    entries
}

fn header_at<'a>(lines: &[&'a str], i: usize, marker: &str) -> Option<Header<'a>> {
    if i + 2 >= lines.len() || !lines[i].contains(marker) {
        return None;
    }
    let timestamp = lines[i + 2].trim();
    if !(timestamp.contains('T') && timestamp.contains('Z')) {
        return None;
    }
    Some(Header {
        host: lines[i].trim(),
        log_file_path: lines[i + 1].trim(),
        timestamp,
        line: i,
    })
}

/// Index of the line that closes the JSON block opened at `start`.
fn json_block_end(lines: &[&str], start: usize) -> usize {
    let mut depth: i64 = 0;
    for (j, line) in lines.iter().enumerate().skip(start) {
        depth += line.matches('{').count() as i64;
        depth -= line.matches('}').count() as i64;
        if depth <= 0 {
            return j;
        }
    }
    lines.len() - 1
}

fn json_entry(header: &Header<'_>, log: &Map<String, Value>) -> Value {
    let raw_message = match log.get("message") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    };
    let (message, decoded_data) = match decode_payload(&raw_message) {
        Some((text, data)) => (text, data),
        None => (raw_message, Value::Object(Map::new())),
    };

    json!({
        "id": header.id(),
        "timestamp": header.timestamp,
        "host": header.host,
        "log_file_path": header.log_file_path,
        "message": message,
        "message_type": "smartflow_json",
        "levelname": field_text(log, &["levelname"]),
        "logger_name": field_text(log, &["name"]),
        "session_id": field_text(log, &["session_id", "sid", "SESSION_ID"]),
        "customer_id": field_text(log, &["customer_id", "cid"]),
        "command": field_text(log, &["command"]),
        "decoded_data": decoded_data,
    })
}

fn text_entry(header: &Header<'_>, message: &str) -> Value {
    let logger_name = header
        .log_file_path
        .rsplit('/')
        .next()
        .unwrap_or(header.log_file_path);
    let session_id = session_id::from_text(message)
        .filter(|id| session_id::is_session_id(id))
        .unwrap_or_default();

    let mut entry = json!({
        "id": header.id(),
        "timestamp": header.timestamp,
        "host": header.host,
        "log_file_path": header.log_file_path,
        "message": message,
        "message_type": "smartflow_text",
        "levelname": "INFO",
        "logger_name": logger_name,
        "session_id": session_id,
        "customer_id": "",
        "command": "",
    });
    if let Value::Object(map) = &mut entry {
        if let Some(ani) = capture(ani_re(), message) {
            map.insert("ANI".to_string(), Value::String(ani));
        }
        if let Some(dnis) = capture(dnis_re(), message) {
            map.insert("DNIS".to_string(), Value::String(dnis));
        }
    }
    entry
}

/// Decode a `request: <base64>` / `response: <base64>` JSON payload.
fn decode_payload(message: &str) -> Option<(String, Value)> {
    let encoded = payload_re().captures(message)?.get(1)?.as_str();
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .ok()?;
    let text = String::from_utf8(bytes).ok()?;
    let data = serde_json::from_str::<Value>(&text).ok()?;
    Some((text, data))
}

fn field_text(log: &Map<String, Value>, keys: &[&str]) -> String {
    keys.iter()
        .find_map(|k| match log.get(*k) {
            Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        })
        .unwrap_or_default()
}

fn capture(re: &Regex, text: &str) -> Option<String> {
    re.captures(text)
        .map(|c| c[1].trim().to_string())
        .filter(|s| !s.is_empty())
}
