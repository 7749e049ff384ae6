//! Session summary extraction.
//!
//! One linear pass over the merged timeline collects the call parties, the
//! conversation, wait states, errors and per-kind counts.
//!
//! Utterances are picked by role, not by kind: a user or assistant turn that
//! also carries an error is both an utterance and an error.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

use crate::types::{EventKind, EventTime, NormalizedEvent, RawLogEntry, Role, Source, Tag};

/// Per-transaction metadata an agent log attaches to a turn.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct TurnDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_tokens: Option<u64>,
    /// Seconds, as reported by the agent service
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time: Option<f64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub citations: Vec<Value>,
}

impl TurnDetails {
    /// Read the known transaction fields; `None` when the record has none.
    pub fn from_payload(payload: &Value) -> Option<Self> {
        let text = |field: &str| {
            payload
                .get(field)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        let list = |field: &str| {
            payload
                .get(field)
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default()
        };

        let details = Self {
            transaction_id: text("transaction_id"),
            agent_id: text("agent_id"),
            model_name: text("model_name"),
            prompt_tokens: payload.get("prompt_tokens").and_then(Value::as_u64),
            completion_tokens: payload.get("completion_tokens").and_then(Value::as_u64),
            response_time: payload.get("response_time").and_then(Value::as_f64),
            tool_calls: list("tool_calls"),
            citations: list("citations"),
        };
        (details != Self::default()).then_some(details)
    }
}

/// One conversational turn.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Utterance {
    pub timestamp: EventTime,
    pub source: Source,
    pub sequence: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_id: Option<String>,
    /// Agent-log turns only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<TurnDetails>,
}

/// A point where the flow waited for external input.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WaitOnEvent {
    pub timestamp: EventTime,
    pub source: Source,
    pub sequence: usize,
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plugin_id: Option<String>,
}

/// An errored entry with its original record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorEvent {
    pub timestamp: EventTime,
    pub source: Source,
    pub sequence: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<i64>,
    pub payload: RawLogEntry,
}

/// Derived views over a session timeline.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Summary {
    pub caller: Option<String>,
    pub callee: Option<String>,
    /// Conflicting values and other non-fatal oddities
    pub warnings: Vec<String>,
    pub utterances: Vec<Utterance>,
    pub wait_ons: Vec<WaitOnEvent>,
    pub errors: Vec<ErrorEvent>,
    pub error_count: usize,
    pub kind_counts: BTreeMap<EventKind, usize>,
    pub total_entries: usize,
    pub smartflow_entries: usize,
    pub agent_entries: usize,
    pub malformed_entries: usize,
    /// Earliest parsed (non-synthetic) timestamp
    pub first_timestamp: Option<DateTime<Utc>>,
    pub last_timestamp: Option<DateTime<Utc>>,
    pub plugin_counts: BTreeMap<String, usize>,
}

impl Summary {
    /// Wall-clock span between the first and last parsed timestamps.
    pub fn duration(&self) -> Option<chrono::Duration> {
        Some(self.last_timestamp? - self.first_timestamp?)
    }
}

/// Build the [`Summary`] for a merged timeline.
pub fn summarize(timeline: &[NormalizedEvent]) -> Summary {
    let mut summary = Summary {
        total_entries: timeline.len(),
        ..Default::default()
    };

    for event in timeline {
        *summary.kind_counts.entry(event.kind).or_insert(0) += 1;
        match event.source {
            Source::SmartFlow => summary.smartflow_entries += 1,
            Source::Agent => summary.agent_entries += 1,
        }
        if event.is_malformed() {
            summary.malformed_entries += 1;
        }

        if let Some(at) = event.timestamp.instant() {
            summary.first_timestamp = Some(summary.first_timestamp.map_or(at, |t| t.min(at)));
            summary.last_timestamp = Some(summary.last_timestamp.map_or(at, |t| t.max(at)));
        }

        if let Some(plugin) = event.plugin_id() {
            *summary.plugin_counts.entry(plugin.to_string()).or_insert(0) += 1;
        }

        record_party("caller", event.caller(), &mut summary.caller, &mut summary.warnings);
        record_party("callee", event.callee(), &mut summary.callee, &mut summary.warnings);

        if is_utterance(event) {
            if let Some(text) = &event.content {
                summary.utterances.push(Utterance {
                    timestamp: event.timestamp,
                    source: event.source,
                    sequence: event.sequence,
                    role: event.role(),
                    text: text.clone(),
                    block_id: event.block_id().map(str::to_string),
                    turn_id: event.turn_id().map(str::to_string),
                    details: match event.source {
                        Source::Agent => TurnDetails::from_payload(&event.payload),
                        Source::SmartFlow => None,
                    },
                });
            }
        }

        if let Some(value) = event.wait_on() {
            summary.wait_ons.push(WaitOnEvent {
                timestamp: event.timestamp,
                source: event.source,
                sequence: event.sequence,
                value: value.to_string(),
                plugin_id: event.plugin_id().map(str::to_string),
            });
        }

        if event.has_error() {
            summary.errors.push(ErrorEvent {
                timestamp: event.timestamp,
                source: event.source,
                sequence: event.sequence,
                code: event.error_code(),
                payload: event.payload.clone(),
            });
        }
    }
    summary.error_count = summary.errors.len();

    tracing::debug!(
        entries = summary.total_entries,
        utterances = summary.utterances.len(),
        wait_ons = summary.wait_ons.len(),
        errors = summary.error_count,
        "Summarized timeline"
    );
    summary
}

fn is_utterance(event: &NormalizedEvent) -> bool {
    event.has_tag(&Tag::GptAgent) || event.role().is_some_and(|r| r.is_conversational())
}

/// Keep the first value seen; later disagreeing values become warnings.
fn record_party(
    field: &str,
    seen: Option<&str>,
    slot: &mut Option<String>,
    warnings: &mut Vec<String>,
) {
    let Some(seen) = seen else {
        return;
    };
    match slot {
        None => *slot = Some(seen.to_string()),
        Some(current) if current != seen => {
            tracing::warn!(field, kept = %current, ignored = seen, "Conflicting call party");
            let warning = format!("conflicting {field}: kept {current}, ignored {seen}");
            if !warnings.contains(&warning) {
                warnings.push(warning);
            }
        }
        Some(_) => {}
    }
}
