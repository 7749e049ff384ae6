//! Event normalization: raw entries from either source into [`NormalizedEvent`]s.
//!
//! ## Guarantees
//!
//! 1. **Total**: every raw entry yields exactly one event, in input order.
//!    Entries that are not JSON objects, or whose embedded JSON is broken,
//!    become events tagged [`Tag::Malformed`].
//! 2. **Pure**: no I/O, no clock reads. The same input always produces the
//!    same output.
//! 3. **Ordered fallback**: entries without a parseable timestamp get a
//!    synthetic [`EventTime`](crate::types::EventTime) directly after the
//!    previous parsed entry of the same source.
//!
//! ## Usage
//!
//! ```rust
//! use flowtrace_core::normalize::normalize;
//! use flowtrace_core::types::{EventKind, Source};
//! use serde_json::json;
//!
//! let events = normalize(&[json!({"ts": 1, "type": "plugin", "id": "P1"})], Source::SmartFlow);
//! assert_eq!(events[0].kind, EventKind::PluginAction);
//! assert_eq!(events[0].plugin_id(), Some("P1"));
//! ```

mod agent;
mod inspect;
mod rules;
mod smartflow;
pub mod timestamp;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

use crate::config::NormalizeConfig;
use crate::types::{NormalizedEvent, RawLogEntry, Source, Tag};
use agent::AgentEntry;
use inspect::{scalar_text, strip_keys};
use rules::{classify_kind, EntryFacts};
use smartflow::SmartFlowEntry;
use timestamp::SyntheticClock;

const CALLER_FIELDS: &[&str] = &["ANI", "ani", "Ani", "caller", "caller_id", "callerId"];
const CALLEE_FIELDS: &[&str] = &["DNIS", "dnis", "Dnis", "callee", "called_number", "calledNumber"];

/// Normalize with default settings.
pub fn normalize(raw_entries: &[RawLogEntry], source: Source) -> Vec<NormalizedEvent> {
    Normalizer::default().normalize(raw_entries, source)
}

/// Configurable normalizer; see [`NormalizeConfig`].
#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    options: NormalizeConfig,
}

/// Per-source extraction result: facts, tags so far, display text, parsed time.
type Extracted = (EntryFacts, BTreeSet<Tag>, Option<String>, Option<DateTime<Utc>>);

/// Signals shared by both sources, computed from stripped levels.
struct Signals {
    error: Option<Option<i64>>,
    wait_on: Option<String>,
    caller: Option<String>,
    callee: Option<String>,
}

impl Normalizer {
    pub fn new(options: NormalizeConfig) -> Self {
        Self { options }
    }

    /// Normalize one source's raw array. Never fails.
    pub fn normalize(&self, raw_entries: &[RawLogEntry], source: Source) -> Vec<NormalizedEvent> {
        let mut clock = SyntheticClock::new();
        let events: Vec<NormalizedEvent> = raw_entries
            .iter()
            .enumerate()
            .map(|(sequence, entry)| self.normalize_entry(entry, source, sequence, &mut clock))
            .collect();

        let malformed = events.iter().filter(|e| e.is_malformed()).count();
        let synthetic = events
            .iter()
            .filter(|e| e.timestamp.is_synthetic())
            .count();
        tracing::debug!(
            source = %source,
            entries = events.len(),
            malformed,
            synthetic_timestamps = synthetic,
            "Normalized log entries"
        );
        if !events.is_empty() && synthetic == events.len() {
            tracing::warn!(
                source = %source,
                "No entry carried a parseable timestamp; keeping input order"
            );
        }

        events
    }

    fn normalize_entry(
        &self,
        entry: &RawLogEntry,
        source: Source,
        sequence: usize,
        clock: &mut SyntheticClock,
    ) -> NormalizedEvent {
        let Some(obj) = entry.as_object() else {
            tracing::trace!(source = %source, sequence, "Entry is not a JSON object");
            let timestamp = clock.observe(None);
            let tags = BTreeSet::from([Tag::Malformed, Tag::SyntheticTimestamp]);
            let content = match entry {
                Value::Null => None,
                Value::String(s) => Some(s.clone()),
                other => Some(other.to_string()),
            };
            return NormalizedEvent {
                timestamp,
                source,
                sequence,
                kind: classify_kind(&EntryFacts::default()),
                payload: entry.clone(),
                tags,
                content,
            };
        };

        let (facts, mut tags, content, parsed_at) = match source {
            Source::SmartFlow => self.smartflow_facts(obj),
            Source::Agent => self.agent_facts(obj),
        };

        let timestamp = clock.observe(parsed_at);
        if timestamp.is_synthetic() {
            tags.insert(Tag::SyntheticTimestamp);
        }
        if let Some(code) = facts.error {
            tags.insert(Tag::HasError);
            if let Some(code) = code {
                tags.insert(Tag::ErrorCode(code));
            }
        }
        if let Some(value) = &facts.wait_on {
            tags.insert(Tag::IsWaitOn);
            tags.insert(Tag::WaitOn(value.clone()));
        }
        if let Some(id) = &facts.plugin_id {
            tags.insert(Tag::PluginId(id.clone()));
        }
        if let Some(log_type) = &facts.log_type {
            tags.insert(Tag::LogType(log_type.clone()));
        }
        if let Some(role) = facts.role {
            tags.insert(Tag::Role(role));
        }
        if facts.gpt_turn {
            tags.insert(Tag::GptAgent);
        }

        NormalizedEvent {
            timestamp,
            source,
            sequence,
            kind: classify_kind(&facts),
            payload: entry.clone(),
            tags,
            content,
        }
    }

    fn smartflow_facts(
        &self,
        obj: &Map<String, Value>,
    ) -> Extracted {
        let entry = SmartFlowEntry::unwrap(obj);
        let levels = entry.levels();
        let mut tags = BTreeSet::new();

        if entry.malformed {
            tags.insert(Tag::Malformed);
        }
        if entry.has_session_data() {
            tags.insert(Tag::HasSessionData);
        }

        // The first level carries the emitting service's own timestamp.
        let ts_levels: Vec<&Value> = entry.first.iter().chain(std::iter::once(&entry.outer)).collect();
        let parsed_at = timestamp::extract(&ts_levels, Source::SmartFlow);

        let plugin_id = entry.plugin_id();
        let log_type = entry.log_type();
        let gpt = entry.gpt_turn(plugin_id.as_deref(), log_type.as_deref());
        let signals = self.signals(&levels);
        push_party_tags(&mut tags, &signals);

        let (role, text) = match gpt {
            Some((role, text)) => (Some(role), Some(text)),
            None => (None, None),
        };
        let content = text.clone().or_else(|| entry.message.clone());

        let facts = EntryFacts {
            role,
            gpt_turn: text.is_some(),
            text,
            plugin_id,
            log_type,
            error: signals.error,
            wait_on: signals.wait_on,
        };
        (facts, tags, content, parsed_at)
    }

    fn agent_facts(
        &self,
        obj: &Map<String, Value>,
    ) -> Extracted {
        let record = Value::Object(obj.clone());
        let levels = [&record];
        let agent = AgentEntry::read(obj);
        let mut tags = BTreeSet::new();

        if obj.contains_key("SessionData") {
            tags.insert(Tag::HasSessionData);
        }
        if let Some(id) = &agent.block_id {
            tags.insert(Tag::BlockId(id.clone()));
        }
        if let Some(id) = &agent.turn_id {
            tags.insert(Tag::TurnId(id.clone()));
        }

        let parsed_at = timestamp::extract(&levels, Source::Agent);
        let signals = self.signals(&levels);
        push_party_tags(&mut tags, &signals);

        let facts = EntryFacts {
            role: agent.role,
            text: agent.text.clone(),
            gpt_turn: false,
            plugin_id: smartflow::plugin_id_field(&record),
            log_type: None,
            error: signals.error,
            wait_on: signals.wait_on,
        };
        (facts, tags, agent.text, parsed_at)
    }

    fn signals(&self, levels: &[&Value]) -> Signals {
        let opts = &self.options;
        let stripped: Vec<Value> = levels
            .iter()
            .map(|level| strip_keys(level, &opts.skip_keys))
            .collect();
        let text = inspect::haystack(&stripped);

        let error = inspect::detect_status_error(
            &stripped,
            &text,
            opts.error_status_threshold,
            opts.max_search_depth,
        )
        .map(Some)
        .or_else(|| inspect::detect_explicit_error(&stripped));

        Signals {
            error,
            wait_on: inspect::detect_wait_on(&stripped, &text, opts.max_search_depth),
            caller: first_party(levels, CALLER_FIELDS),
            callee: first_party(levels, CALLEE_FIELDS),
        }
    }
}

fn first_party(levels: &[&Value], fields: &[&str]) -> Option<String> {
    levels
        .iter()
        .find_map(|level| fields.iter().find_map(|f| level.get(*f).and_then(scalar_text)))
}

fn push_party_tags(tags: &mut BTreeSet<Tag>, signals: &Signals) {
    if let Some(caller) = &signals.caller {
        tags.insert(Tag::Caller(caller.clone()));
    }
    if let Some(callee) = &signals.callee {
        tags.insert(Tag::Callee(callee.clone()));
    }
}
