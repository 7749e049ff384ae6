//! Integration tests for the flowtrace timeline engine
//!
//! These tests use fixture files in `tests/fixtures/` to verify the
//! end-to-end flow from raw payloads to stored sessions.

use flowtrace_core::ingest::{self, session_id};
use flowtrace_core::types::{AgentType, EventKind, Role, Source, Tag};
use flowtrace_core::{logging, ClearTarget, Config, FlowLayer, Infrastructure, SessionStore};
use serde_json::Value;
use std::path::PathBuf;

const SESSION_ID: &str = "1760633456-000000000001105328-SR-000-000000000000DEN140-2EBE8011";

/// Get the path to a fixture file
fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

fn fixture_json(name: &str) -> Value {
    let text = std::fs::read_to_string(fixture_path(name)).expect("fixture should exist");
    serde_json::from_str(&text).expect("fixture should be valid JSON")
}

fn smartflow_fixture() -> Vec<Value> {
    match fixture_json("smartflow_session.json") {
        Value::Array(entries) => entries,
        other => panic!("expected array fixture, got {other}"),
    }
}

fn load_fixture_session(store: &SessionStore) -> std::sync::Arc<flowtrace_core::Session> {
    logging::init_test();
    let envelope = fixture_json("agent_envelope.json");
    store
        .put_agent_envelope(SESSION_ID, smartflow_fixture(), &envelope)
        .expect("put should succeed")
        .session
}

// ============================================
// End-to-end timeline
// ============================================

#[test]
fn test_fixture_timeline_order() {
    let store = SessionStore::new();
    let session = load_fixture_session(&store);

    // 8 SmartFlow entries + 3 agent transactions
    assert_eq!(session.timeline.len(), 11);
    assert!(session
        .timeline
        .windows(2)
        .all(|w| w[0].timestamp <= w[1].timestamp));

    let order: Vec<(Source, usize)> = session
        .timeline
        .iter()
        .map(|e| (e.source, e.sequence))
        .collect();
    assert_eq!(
        order,
        vec![
            (Source::SmartFlow, 0),
            (Source::SmartFlow, 1),
            (Source::SmartFlow, 2),
            (Source::SmartFlow, 3),
            (Source::Agent, 0),
            (Source::Agent, 1),
            (Source::SmartFlow, 4),
            // Same instant: SmartFlow before Agent
            (Source::SmartFlow, 5),
            (Source::Agent, 2),
            // Untimed entries follow the last parsed SmartFlow instant
            (Source::SmartFlow, 6),
            (Source::SmartFlow, 7),
        ]
    );
}

#[test]
fn test_fixture_kinds_and_tags() {
    let store = SessionStore::new();
    let session = load_fixture_session(&store);
    let by_key = |source: Source, sequence: usize| {
        session
            .timeline
            .iter()
            .find(|e| e.source == source && e.sequence == sequence)
            .expect("event should exist")
    };

    let call_start = by_key(Source::SmartFlow, 0);
    assert_eq!(call_start.kind, EventKind::SystemEvent);
    assert_eq!(call_start.caller(), Some("+16028501188"));

    let gather = by_key(Source::SmartFlow, 2);
    assert_eq!(gather.kind, EventKind::WaitOn);
    assert_eq!(gather.wait_on(), Some("speech"));
    // The stale status code inside SessionData is not an error
    assert!(!gather.has_error());
    assert!(gather.has_tag(&Tag::HasSessionData));

    let gpt_user = by_key(Source::SmartFlow, 3);
    assert_eq!(gpt_user.kind, EventKind::AgentTurn);
    assert_eq!(gpt_user.role(), Some(Role::User));

    let gpt_reply = by_key(Source::SmartFlow, 4);
    assert_eq!(gpt_reply.role(), Some(Role::Assistant));
    assert_eq!(
        gpt_reply.content.as_deref(),
        Some("Sure, which day works for you?")
    );

    let http = by_key(Source::SmartFlow, 5);
    assert_eq!(http.kind, EventKind::Error);
    assert_eq!(http.error_code(), Some(503));
    assert_eq!(http.plugin_id(), Some("HTTP_4"));

    let broken = by_key(Source::SmartFlow, 6);
    assert!(broken.is_malformed());
    assert!(broken.has_tag(&Tag::SyntheticTimestamp));

    let agent_error = by_key(Source::Agent, 2);
    assert_eq!(agent_error.kind, EventKind::Error);
    assert_eq!(agent_error.error_code(), Some(504));
}

#[test]
fn test_fixture_summary() {
    let store = SessionStore::new();
    let session = load_fixture_session(&store);
    let summary = &session.summary;

    assert_eq!(session.agent_type, AgentType::GptAgent);
    let info = session.agent_info.as_ref().expect("agent info");
    assert_eq!(info.agent_id, "agent-7");
    assert_eq!(info.agent_name, "Scheduler");

    assert_eq!(summary.caller.as_deref(), Some("+16028501188"));
    assert_eq!(summary.callee.as_deref(), Some("+18005550100"));
    assert!(summary.warnings.is_empty());

    let texts: Vec<&str> = summary.utterances.iter().map(|u| u.text.as_str()).collect();
    assert_eq!(
        texts,
        vec![
            "I need to move my appointment",
            "I need to move my appointment",
            "Sure, which day works for you?",
            "Sure, which day works for you?",
        ]
    );
    assert_eq!(summary.utterances[1].turn_id.as_deref(), Some("turn-1"));
    // Relayed EXTCALL turns duplicate the agent transactions
    assert_eq!(session.conversation_turns(), 2);

    let reply = &summary.utterances[2];
    assert_eq!(reply.source, Source::Agent);
    let details = reply.details.as_ref().expect("agent turn details");
    assert_eq!(details.model_name.as_deref(), Some("gpt-4o"));
    assert_eq!(details.prompt_tokens, Some(812));

    assert_eq!(summary.wait_ons.len(), 1);
    assert_eq!(summary.wait_ons[0].plugin_id.as_deref(), Some("GATHER_2"));

    assert_eq!(summary.error_count, 2);
    let codes: Vec<Option<i64>> = summary.errors.iter().map(|e| e.code).collect();
    assert_eq!(codes, vec![Some(503), Some(504)]);

    assert_eq!(summary.malformed_entries, 1);
    assert_eq!(summary.smartflow_entries, 8);
    assert_eq!(summary.agent_entries, 3);
    assert_eq!(summary.plugin_counts.get("EXTCALL_3"), Some(&2));
    assert_eq!(summary.kind_counts.get(&EventKind::Error), Some(&2));
}

#[test]
fn test_refresh_is_idempotent() {
    let store = SessionStore::new();
    let first = load_fixture_session(&store);
    let envelope = fixture_json("agent_envelope.json");
    let outcome = store
        .put_agent_envelope(SESSION_ID, smartflow_fixture(), &envelope)
        .expect("put should succeed");

    assert!(outcome.replaced);
    assert!(!outcome.changed);
    assert_eq!(
        serde_json::to_string(&first.timeline).unwrap(),
        serde_json::to_string(&outcome.session.timeline).unwrap()
    );
    assert_eq!(
        serde_json::to_string(&first.summary).unwrap(),
        serde_json::to_string(&outcome.session.summary).unwrap()
    );

    assert_eq!(store.clear(ClearTarget::One(SESSION_ID.to_string())), 1);
    assert!(store.get(SESSION_ID).is_none());
}

// ============================================
// Ingest helpers
// ============================================

#[test]
fn test_session_id_discovery() {
    assert_eq!(
        session_id::from_entries(&smartflow_fixture()).as_deref(),
        Some(SESSION_ID)
    );

    let log = ingest::agent_log(&fixture_json("agent_envelope.json")).unwrap();
    assert_eq!(log.session_id.as_deref(), Some(SESSION_ID));
    assert_eq!(log.entries.len(), 3);
}

#[test]
fn test_text_dump_through_store() {
    let text = std::fs::read_to_string(fixture_path("smartflow_dump.txt")).unwrap();
    let config = Config::default();

    assert_eq!(session_id::from_text(&text).as_deref(), Some(SESSION_ID));

    let entries = ingest::text::parse_smartflow_text(&text, &config.ingest);
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[0]["ANI"], "+16028501188");
    assert_eq!(entries[1]["decoded_data"]["statusCode"], 200);

    let store = SessionStore::with_config(config.normalize.clone());
    let session = store
        .put(SESSION_ID, entries, Vec::new())
        .expect("put should succeed")
        .session;

    assert_eq!(session.timeline.len(), 3);
    assert_eq!(session.agent_type, AgentType::Unknown);
    assert_eq!(session.summary.caller.as_deref(), Some("+16028501188"));
    assert_eq!(session.summary.error_count, 1);
    assert_eq!(session.summary.errors[0].code, Some(502));
    assert!(session.timeline.iter().all(|e| !e.timestamp.is_synthetic()));
}

// ============================================
// Flow definitions
// ============================================

#[test]
fn test_flow_definitions_attached_to_session() {
    let store = SessionStore::new();
    load_fixture_session(&store);

    let infrastructure = Infrastructure::from_files(
        Some(&fixture_path("blockagent_infra.json")),
        Some(&fixture_path("smartflow_flow.xml")),
    )
    .expect("fixtures should load");
    store
        .attach_infrastructure(SESSION_ID, infrastructure)
        .expect("session exists");

    // The turn the agent log references resolves to its block definition
    let session = store.get(SESSION_ID).unwrap();
    let block_id = session.summary.utterances[1].block_id.clone().unwrap();
    let block = store.block_info(&block_id).expect("block defined");
    assert_eq!(block["name"], "Reschedule appointment");

    let diagram = store.flow_diagram(SESSION_ID).unwrap();
    assert_eq!(diagram.nodes_in(FlowLayer::BlockAgent).count(), 2);
    let plugins: Vec<&str> = diagram
        .nodes_in(FlowLayer::SmartFlow)
        .map(|n| n.id.as_str())
        .collect();
    assert_eq!(plugins, vec!["PLAY_1", "GATHER_2", "EXTCALL_3", "HTTP_4"]);

    let turn_edges: Vec<(&str, &str)> = diagram
        .edges_in(FlowLayer::BlockAgent)
        .map(|e| (e.from.as_str(), e.to.as_str()))
        .collect();
    assert_eq!(turn_edges, vec![("turn-1", "turn-2"), ("turn-1", "turn-9")]);
    assert_eq!(diagram.edges_in(FlowLayer::SmartFlow).count(), 3);
    assert!(diagram.edges.iter().all(|e| e.to != "END_CALL"));
}
