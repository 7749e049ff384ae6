//! Agent type detection.
//!
//! Signatures are checked in priority order across the whole agent
//! sequence: a session that shows any GPT-style record is a GPT agent even if
//! other records also look like BlockAgent output.

use serde_json::Value;

use crate::types::{AgentType, NormalizedEvent, Source, Tag};

const MESSAGE_FIELDS: &[&str] = &["message", "content", "text"];
const BLOCK_FIELDS: &[&str] = &["intent", "block_id", "turn_id"];
const PLUGIN_ID_FIELDS: &[&str] = &["PluginId", "pluginId", "plugin_id"];

/// One agent-type signature.
struct Signature {
    agent_type: AgentType,
    matches: fn(&NormalizedEvent) -> bool,
}

const SIGNATURES: &[Signature] = &[
    Signature {
        agent_type: AgentType::GptAgent,
        matches: looks_like_gpt,
    },
    Signature {
        agent_type: AgentType::BlockAgent,
        matches: looks_like_block_agent,
    },
];

/// Decide which agent produced `agent_events`.
///
/// Returns [`AgentType::Unknown`] for an empty slice or when no signature
/// matches.
pub fn classify(agent_events: &[NormalizedEvent]) -> AgentType {
    detect(agent_events.iter())
}

/// Classify a merged timeline.
///
/// Considers every agent event plus SmartFlow events tagged `gpt_agent`:
/// GPT turns relayed through `EXTCALL_` plugins are often the only trace a
/// GPT agent leaves when no agent log was fetched.
pub fn classify_timeline(timeline: &[NormalizedEvent]) -> AgentType {
    detect(
        timeline
            .iter()
            .filter(|e| e.source == Source::Agent || e.has_tag(&Tag::GptAgent)),
    )
}

fn detect<'a, I>(events: I) -> AgentType
where
    I: Iterator<Item = &'a NormalizedEvent> + Clone,
{
    let agent_type = SIGNATURES
        .iter()
        .find(|sig| events.clone().any(sig.matches))
        .map(|sig| sig.agent_type)
        .unwrap_or_default();

    tracing::debug!(
        events = events.count(),
        agent_type = %agent_type,
        "Classified agent"
    );
    agent_type
}

fn looks_like_gpt(event: &NormalizedEvent) -> bool {
    if event.has_tag(&Tag::GptAgent) {
        return true;
    }
    let payload = &event.payload;

    let role_with_text = payload.get("role").is_some()
        && MESSAGE_FIELDS
            .iter()
            .any(|f| payload.get(*f).map(Value::is_string).unwrap_or(false));

    let chat_messages = payload
        .get("messages")
        .and_then(Value::as_array)
        .map(|msgs| msgs.iter().any(|m| m.get("role").is_some()))
        .unwrap_or(false);

    role_with_text || chat_messages
}

fn looks_like_block_agent(event: &NormalizedEvent) -> bool {
    let payload = &event.payload;
    event.plugin_id().is_some()
        || BLOCK_FIELDS
            .iter()
            .chain(PLUGIN_ID_FIELDS)
            .any(|f| payload.get(*f).is_some())
}
