//! Core domain types for flowtrace
//!
//! These types represent the normalized data model shared by every stage of
//! the engine: raw SmartFlow and agent records go in, [`NormalizedEvent`]s come
//! out, and a [`Session`] bundles the merged timeline with its derived views.
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **SmartFlow** | Workflow/automation execution log recording plugin invocations |
//! | **Agent log** | Conversational agent transaction log (BlockAgent or GPT agent) |
//! | **BlockAgent** | Rule-based conversational agent |
//! | **GPT Agent** | Generative conversational agent |
//! | **Wait-on** | Event where the workflow waits for external input |
//! | **PluginId** | Identifier of the workflow action that produced an entry |

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use crate::infrastructure::{FlowDiagram, Infrastructure};
use crate::summary::Summary;

/// A raw record exactly as fetched. Shape varies by source and event type.
pub type RawLogEntry = serde_json::Value;

// ============================================
// Sources
// ============================================

/// Which log family an event came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    SmartFlow,
    Agent,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::SmartFlow => "smartflow",
            Source::Agent => "agent",
        }
    }

    /// Tie-break used by the merger when timestamps are equal.
    /// SmartFlow entries sort ahead of agent entries.
    pub fn priority(&self) -> u8 {
        match self {
            Source::SmartFlow => 0,
            Source::Agent => 1,
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Source {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "smartflow" | "SmartFlow" => Ok(Source::SmartFlow),
            "agent" | "blockagent" | "Agent" => Ok(Source::Agent),
            _ => Err(format!("unknown source: {}", s)),
        }
    }
}

// ============================================
// Timestamps
// ============================================

/// Totally ordered event time.
///
/// `step` is zero for timestamps parsed from the entry. An entry whose
/// timestamp could not be parsed reuses the last parsed instant of its source
/// with `step` counting up from one, so it sorts immediately after that event
/// and before anything later. Entries preceding the first parsed timestamp
/// use [`EventTime::EARLIEST`] as their base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct EventTime {
    pub at: DateTime<Utc>,
    pub step: u32,
}

impl EventTime {
    /// Base instant for synthetic timestamps with no parsed predecessor
    pub const EARLIEST: DateTime<Utc> = DateTime::<Utc>::MIN_UTC;

    pub fn parsed(at: DateTime<Utc>) -> Self {
        Self { at, step: 0 }
    }

    pub fn is_synthetic(&self) -> bool {
        self.step > 0
    }

    /// The parsed instant, if this timestamp was not synthesized
    pub fn instant(&self) -> Option<DateTime<Utc>> {
        if self.is_synthetic() {
            None
        } else {
            Some(self.at)
        }
    }
}

// ============================================
// Classification
// ============================================

/// Classification of a normalized event, derived from payload shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// HTTP failure or explicit error record
    Error,
    /// A conversational utterance (user or assistant)
    AgentTurn,
    /// Workflow paused waiting for input
    WaitOn,
    /// A workflow plugin/action invocation
    PluginAction,
    /// Anything else (infrastructure chatter, malformed entries)
    SystemEvent,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Error => "error",
            EventKind::AgentTurn => "agent_turn",
            EventKind::WaitOn => "wait_on",
            EventKind::PluginAction => "plugin_action",
            EventKind::SystemEvent => "system_event",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Speaker of a conversational turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
            Role::Tool => "tool",
        }
    }

    /// Lenient parse used on raw payloads; unknown roles yield `None`.
    pub fn from_raw(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "user" | "human" | "caller" => Some(Role::User),
            "assistant" | "ai" | "bot" | "agent" => Some(Role::Assistant),
            "system" | "developer" => Some(Role::System),
            "tool" | "function" => Some(Role::Tool),
            _ => None,
        }
    }

    /// Whether this role speaks in the conversation proper
    pub fn is_conversational(&self) -> bool {
        matches!(self, Role::User | Role::Assistant)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derived annotation attached to an event during normalization.
///
/// Tags are computed once and never recomputed. They render as `name` or
/// `name=value` strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Tag {
    HasError,
    IsWaitOn,
    Malformed,
    SyntheticTimestamp,
    HasSessionData,
    GptAgent,
    PluginId(String),
    LogType(String),
    ErrorCode(i64),
    WaitOn(String),
    Role(Role),
    Caller(String),
    Callee(String),
    BlockId(String),
    TurnId(String),
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tag::HasError => f.write_str("has_error"),
            Tag::IsWaitOn => f.write_str("is_wait_on"),
            Tag::Malformed => f.write_str("malformed"),
            Tag::SyntheticTimestamp => f.write_str("synthetic_timestamp"),
            Tag::HasSessionData => f.write_str("has_session_data"),
            Tag::GptAgent => f.write_str("gpt_agent"),
            Tag::PluginId(id) => write!(f, "plugin_id={}", id),
            Tag::LogType(t) => write!(f, "log_type={}", t),
            Tag::ErrorCode(code) => write!(f, "error_code={}", code),
            Tag::WaitOn(v) => write!(f, "wait_on={}", v),
            Tag::Role(role) => write!(f, "role={}", role),
            Tag::Caller(id) => write!(f, "caller={}", id),
            Tag::Callee(id) => write!(f, "callee={}", id),
            Tag::BlockId(id) => write!(f, "block_id={}", id),
            Tag::TurnId(id) => write!(f, "turn_id={}", id),
        }
    }
}

impl Serialize for Tag {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

// ============================================
// Normalized events
// ============================================

/// One raw entry in the common event shape.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedEvent {
    pub timestamp: EventTime,
    pub source: Source,
    /// Position in the source's raw array
    pub sequence: usize,
    pub kind: EventKind,
    /// The original record, unmodified
    pub payload: RawLogEntry,
    pub tags: BTreeSet<Tag>,
    /// Display text (utterance text, innermost SmartFlow message)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl NormalizedEvent {
    pub fn has_tag(&self, tag: &Tag) -> bool {
        self.tags.contains(tag)
    }

    pub fn has_error(&self) -> bool {
        self.has_tag(&Tag::HasError)
    }

    pub fn is_wait_on(&self) -> bool {
        self.has_tag(&Tag::IsWaitOn)
    }

    pub fn is_malformed(&self) -> bool {
        self.has_tag(&Tag::Malformed)
    }

    pub fn plugin_id(&self) -> Option<&str> {
        self.tags.iter().find_map(|t| match t {
            Tag::PluginId(id) => Some(id.as_str()),
            _ => None,
        })
    }

    pub fn error_code(&self) -> Option<i64> {
        self.tags.iter().find_map(|t| match t {
            Tag::ErrorCode(code) => Some(*code),
            _ => None,
        })
    }

    pub fn wait_on(&self) -> Option<&str> {
        self.tags.iter().find_map(|t| match t {
            Tag::WaitOn(v) => Some(v.as_str()),
            _ => None,
        })
    }

    pub fn role(&self) -> Option<Role> {
        self.tags.iter().find_map(|t| match t {
            Tag::Role(role) => Some(*role),
            _ => None,
        })
    }

    pub fn caller(&self) -> Option<&str> {
        self.tags.iter().find_map(|t| match t {
            Tag::Caller(id) => Some(id.as_str()),
            _ => None,
        })
    }

    pub fn callee(&self) -> Option<&str> {
        self.tags.iter().find_map(|t| match t {
            Tag::Callee(id) => Some(id.as_str()),
            _ => None,
        })
    }

    pub fn block_id(&self) -> Option<&str> {
        self.tags.iter().find_map(|t| match t {
            Tag::BlockId(id) => Some(id.as_str()),
            _ => None,
        })
    }

    pub fn turn_id(&self) -> Option<&str> {
        self.tags.iter().find_map(|t| match t {
            Tag::TurnId(id) => Some(id.as_str()),
            _ => None,
        })
    }

    /// Merge ordering key: `(timestamp, source priority, sequence)`
    pub fn sort_key(&self) -> (EventTime, u8, usize) {
        (self.timestamp, self.source.priority(), self.sequence)
    }
}

// ============================================
// Agents
// ============================================

/// Which kind of conversational agent handled the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AgentType {
    BlockAgent,
    GptAgent,
    /// No signature matched; a valid, displayable state
    #[default]
    Unknown,
}

impl AgentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentType::BlockAgent => "block_agent",
            AgentType::GptAgent => "gpt_agent",
            AgentType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for AgentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Agent identity from the agent-log envelope's `agents` object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
pub struct AgentInfo {
    pub agent_id: String,
    pub agent_name: String,
    pub version: String,
}

// ============================================
// Sessions
// ============================================

/// Everything derived for one session id.
///
/// Built wholesale by [`crate::pipeline::build_session`]; a refresh replaces
/// the whole value rather than mutating it.
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub session_id: String,
    pub raw_smartflow_log: Vec<RawLogEntry>,
    pub raw_agent_log: Vec<RawLogEntry>,
    /// sha256 over both raw arrays
    pub raw_digest: String,
    pub timeline: Vec<NormalizedEvent>,
    pub agent_type: AgentType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_info: Option<AgentInfo>,
    pub summary: Summary,
    /// Flow definitions, when loaded; kept across refreshes of the same id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub infrastructure: Option<Arc<Infrastructure>>,
}

impl Session {
    /// Flow diagram of the attached definitions; empty when none are loaded.
    pub fn flow_diagram(&self) -> FlowDiagram {
        self.infrastructure
            .as_deref()
            .map(Infrastructure::flow_diagram)
            .unwrap_or_default()
    }

    /// Number of conversational turns.
    ///
    /// GPT turns relayed through SmartFlow also appear in the agent log, so
    /// agent-log utterances are counted when there are any; otherwise the
    /// SmartFlow ones are.
    pub fn conversation_turns(&self) -> usize {
        let utterances = &self.summary.utterances;
        let from_agent = utterances
            .iter()
            .filter(|u| u.source == Source::Agent)
            .count();
        if from_agent > 0 {
            from_agent
        } else {
            utterances.len()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_tag_rendering() {
        assert_eq!(Tag::HasError.to_string(), "has_error");
        assert_eq!(Tag::PluginId("P1".into()).to_string(), "plugin_id=P1");
        assert_eq!(Tag::ErrorCode(500).to_string(), "error_code=500");
        assert_eq!(Tag::Role(Role::Assistant).to_string(), "role=assistant");

        let json = serde_json::to_string(&Tag::WaitOn("dtmf".into())).unwrap();
        assert_eq!(json, "\"wait_on=dtmf\"");
    }

    #[test]
    fn test_event_time_ordering() {
        let t1 = Utc.with_ymd_and_hms(2025, 10, 16, 12, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2025, 10, 16, 12, 0, 1).unwrap();

        let parsed = EventTime::parsed(t1);
        let synthetic = EventTime { at: t1, step: 1 };
        let later = EventTime::parsed(t2);
        let earliest = EventTime {
            at: EventTime::EARLIEST,
            step: 1,
        };

        assert!(earliest < parsed);
        assert!(parsed < synthetic);
        assert!(synthetic < later);
        assert!(synthetic.is_synthetic());
        assert_eq!(synthetic.instant(), None);
        assert_eq!(parsed.instant(), Some(t1));
    }

    #[test]
    fn test_source_priority() {
        assert!(Source::SmartFlow.priority() < Source::Agent.priority());
        assert_eq!("blockagent".parse::<Source>().unwrap(), Source::Agent);
    }

    #[test]
    fn test_role_from_raw() {
        assert_eq!(Role::from_raw("Assistant"), Some(Role::Assistant));
        assert_eq!(Role::from_raw(" user "), Some(Role::User));
        assert_eq!(Role::from_raw("narrator"), None);
        assert!(!Role::System.is_conversational());
    }
}
