//! Ingest helpers: turn fetched payloads into raw entry arrays.
//!
//! Fetching itself happens outside this crate. These helpers only reshape
//! what a fetcher hands over:
//!
//! ```text
//! agent log envelope ──► agent_log()              ──► Vec<RawLogEntry> + AgentInfo
//! SmartFlow text dump ──► text::parse_smartflow_text ──► Vec<RawLogEntry>
//! either              ──► session_id::*           ──► session id
//! ```

pub mod session_id;
pub mod text;

use serde_json::Value;

use crate::error::{Error, Result};
use crate::types::{AgentInfo, RawLogEntry};

/// Contents of an agent-log payload.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AgentLog {
    /// `session_id` declared by the envelope, if any
    pub session_id: Option<String>,
    /// The transactions, in payload order
    pub entries: Vec<RawLogEntry>,
    /// First agent listed in the envelope's `agents` object
    pub info: Option<AgentInfo>,
}

/// Unwrap an agent-log payload.
///
/// Accepts the service envelope
/// (`{"session_id": .., "transactions": [..], "agents": {..}}`) or a bare
/// array of transactions. An envelope without `transactions` yields no
/// entries.
pub fn agent_log(payload: &Value) -> Result<AgentLog> {
    match payload {
        Value::Array(items) => Ok(AgentLog {
            entries: items.clone(),
            ..Default::default()
        }),
        Value::Object(envelope) => {
            let entries = match envelope.get("transactions") {
                Some(Value::Array(items)) => items.clone(),
                None | Some(Value::Null) => {
                    tracing::warn!("Agent log envelope has no transactions");
                    Vec::new()
                }
                Some(other) => {
                    return Err(Error::Parse {
                        source_name: "agent log".to_string(),
                        message: format!("transactions must be an array, got {}", kind_of(other)),
                    })
                }
            };

            let session_id = envelope
                .get("session_id")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string);

            let info = envelope
                .get("agents")
                .and_then(Value::as_object)
                .and_then(|agents| agents.iter().next())
                .map(|(agent_id, agent)| AgentInfo {
                    agent_id: agent_id.clone(),
                    agent_name: string_field(agent, "agent_name"),
                    version: string_field(agent, "version"),
                });

            tracing::debug!(
                transactions = entries.len(),
                has_agent_info = info.is_some(),
                "Unwrapped agent log envelope"
            );
            Ok(AgentLog {
                session_id,
                entries,
                info,
            })
        }
        other => Err(Error::Parse {
            source_name: "agent log".to_string(),
            message: format!("expected an object or array, got {}", kind_of(other)),
        }),
    }
}

fn string_field(value: &Value, key: &str) -> String {
    match value.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

pub(crate) fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
