//! Session construction: normalize, merge, classify, summarize.

use sha2::{Digest, Sha256};

use crate::classify::classify_timeline;
use crate::merge::merge;
use crate::normalize::Normalizer;
use crate::summary::summarize;
use crate::types::{AgentInfo, RawLogEntry, Session, Source};

/// Run every engine stage over one session's raw logs.
///
/// Pure: the same inputs always produce an identical [`Session`].
pub fn build_session(
    session_id: &str,
    raw_smartflow_log: Vec<RawLogEntry>,
    raw_agent_log: Vec<RawLogEntry>,
    agent_info: Option<AgentInfo>,
    normalizer: &Normalizer,
) -> Session {
    let smartflow_events = normalizer.normalize(&raw_smartflow_log, Source::SmartFlow);
    let agent_events = normalizer.normalize(&raw_agent_log, Source::Agent);

    let timeline = merge(smartflow_events, agent_events);
    let agent_type = classify_timeline(&timeline);
    let summary = summarize(&timeline);
    let raw_digest = raw_digest(&raw_smartflow_log, &raw_agent_log);

    tracing::debug!(
        session_id,
        timeline = timeline.len(),
        agent_type = %agent_type,
        "Built session"
    );

    Session {
        session_id: session_id.to_string(),
        raw_smartflow_log,
        raw_agent_log,
        raw_digest,
        timeline,
        agent_type,
        agent_info,
        summary,
        infrastructure: None,
    }
}

/// Hex sha256 over both raw arrays, in source order.
pub fn raw_digest(raw_smartflow_log: &[RawLogEntry], raw_agent_log: &[RawLogEntry]) -> String {
    let mut hasher = Sha256::new();
    for (tag, entries) in [(b'S', raw_smartflow_log), (b'A', raw_agent_log)] {
        hasher.update([tag]);
        hasher.update((entries.len() as u64).to_le_bytes());
        for entry in entries {
            // Value's Display is compact JSON and never fails
            let bytes = entry.to_string();
            hasher.update((bytes.len() as u64).to_le_bytes());
            hasher.update(bytes.as_bytes());
        }
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AgentType, EventKind};
    use serde_json::json;

    fn scenario() -> (Vec<RawLogEntry>, Vec<RawLogEntry>) {
        (
            vec![
                json!({"ts": 1, "type": "plugin", "id": "P1"}),
                json!({"ts": 3, "type": "error", "code": 500}),
            ],
            vec![json!({"ts": 2, "role": "assistant", "text": "hi"})],
        )
    }

    #[test]
    fn test_builds_scenario_session() {
        let (sf, ag) = scenario();
        let session = build_session("S1", sf, ag, None, &Normalizer::default());

        let kinds: Vec<EventKind> = session.timeline.iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![EventKind::PluginAction, EventKind::AgentTurn, EventKind::Error]
        );
        assert_eq!(session.agent_type, AgentType::GptAgent);
        assert_eq!(session.summary.error_count, 1);
        assert_eq!(session.conversation_turns(), 1);
        assert_eq!(session.raw_digest.len(), 64);
    }

    #[test]
    fn test_idempotent() {
        let (sf, ag) = scenario();
        let normalizer = Normalizer::default();
        let a = build_session("S1", sf.clone(), ag.clone(), None, &normalizer);
        let b = build_session("S1", sf, ag, None, &normalizer);

        assert_eq!(
            serde_json::to_vec(&a.timeline).unwrap(),
            serde_json::to_vec(&b.timeline).unwrap()
        );
        assert_eq!(
            serde_json::to_vec(&a.summary).unwrap(),
            serde_json::to_vec(&b.summary).unwrap()
        );
        assert_eq!(a.raw_digest, b.raw_digest);
    }

    #[test]
    fn test_digest_distinguishes_sources() {
        let entry = vec![json!({"ts": 1})];
        assert_ne!(raw_digest(&entry, &[]), raw_digest(&[], &entry));
        assert_eq!(raw_digest(&entry, &[]), raw_digest(&entry, &[]));
    }

    #[test]
    fn test_empty_session() {
        let session = build_session("empty", Vec::new(), Vec::new(), None, &Normalizer::default());
        assert!(session.timeline.is_empty());
        assert_eq!(session.agent_type, AgentType::Unknown);
        assert_eq!(session.summary.total_entries, 0);
    }

    #[test]
    fn test_gpt_session_without_agent_log() {
        let smartflow = vec![json!({
            "ts": 1,
            "PluginId": "EXTCALL_3",
            "LogType": "IpdIn",
            "ai_response": "We open at nine."
        })];
        let session = build_session("S1", smartflow, Vec::new(), None, &Normalizer::default());

        assert_eq!(session.timeline[0].kind, EventKind::AgentTurn);
        assert_eq!(session.agent_type, AgentType::GptAgent);
        assert_eq!(session.conversation_turns(), 1);
    }
}
