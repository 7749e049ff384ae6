//! In-memory session store.
//!
//! The store owns every loaded [`Session`] and hands out `Arc` snapshots.
//! `put` builds the new session before taking the write lock, so readers
//! only ever wait for a map insert and always see a session either entirely
//! before or entirely after a refresh. Flow definitions attached to a session
//! survive refreshes of its logs.

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::config::NormalizeConfig;
use crate::error::{Error, Result};
use crate::infrastructure::{FlowDiagram, Infrastructure};
use crate::ingest;
use crate::normalize::Normalizer;
use crate::pipeline::build_session;
use crate::types::{AgentInfo, AgentType, RawLogEntry, Session};

/// Result of a [`SessionStore::put`].
#[derive(Debug, Clone)]
pub struct PutOutcome {
    pub session: Arc<Session>,
    /// An earlier session with the same id was replaced
    pub replaced: bool,
    /// The raw logs differ from the replaced session's (always true for new ids)
    pub changed: bool,
}

/// What [`SessionStore::clear`] removes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClearTarget {
    One(String),
    All,
}

/// Per-session counts for listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionOverview {
    pub session_id: String,
    pub total_entries: usize,
    pub conversation_turns: usize,
    pub smartflow_entries: usize,
    pub agent_entries: usize,
    pub error_count: usize,
    pub agent_type: AgentType,
}

impl SessionOverview {
    fn of(session: &Session) -> Self {
        Self {
            session_id: session.session_id.clone(),
            total_entries: session.summary.total_entries,
            conversation_turns: session.conversation_turns(),
            smartflow_entries: session.summary.smartflow_entries,
            agent_entries: session.summary.agent_entries,
            error_count: session.summary.error_count,
            agent_type: session.agent_type,
        }
    }
}

#[derive(Serialize)]
struct Export<'a> {
    session_count: usize,
    sessions: Vec<&'a Session>,
}

/// Keyed holder of built sessions. `Send + Sync`; share it by reference or
/// behind an `Arc`.
#[derive(Debug, Default)]
pub struct SessionStore {
    normalizer: Normalizer,
    sessions: RwLock<BTreeMap<String, Arc<Session>>>,
}

impl SessionStore {
    /// Store with default normalization settings.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(options: NormalizeConfig) -> Self {
        Self {
            normalizer: Normalizer::new(options),
            sessions: RwLock::default(),
        }
    }

    /// Build a session from raw logs and store it, replacing any previous
    /// session with the same id.
    pub fn put(
        &self,
        session_id: &str,
        raw_smartflow_log: Vec<RawLogEntry>,
        raw_agent_log: Vec<RawLogEntry>,
    ) -> Result<PutOutcome> {
        self.put_with_info(session_id, raw_smartflow_log, raw_agent_log, None)
    }

    /// Like [`put`](Self::put), taking the agent log as its service envelope
    /// (or a bare array) so agent identity is kept.
    pub fn put_agent_envelope(
        &self,
        session_id: &str,
        raw_smartflow_log: Vec<RawLogEntry>,
        agent_payload: &Value,
    ) -> Result<PutOutcome> {
        let agent_log = ingest::agent_log(agent_payload)?;
        if let Some(declared) = &agent_log.session_id {
            if declared != session_id.trim() {
                tracing::warn!(
                    session_id,
                    declared = %declared,
                    "Agent log declares a different session id"
                );
            }
        }
        self.put_with_info(
            session_id,
            raw_smartflow_log,
            agent_log.entries,
            agent_log.info,
        )
    }

    fn put_with_info(
        &self,
        session_id: &str,
        raw_smartflow_log: Vec<RawLogEntry>,
        raw_agent_log: Vec<RawLogEntry>,
        agent_info: Option<AgentInfo>,
    ) -> Result<PutOutcome> {
        let session_id = session_id.trim();
        if session_id.is_empty() {
            return Err(Error::InvalidSessionId);
        }

        let mut session = build_session(
            session_id,
            raw_smartflow_log,
            raw_agent_log,
            agent_info,
            &self.normalizer,
        );

        let (session, previous) = {
            let mut sessions = self.write();
            if let Some(previous) = sessions.get(session_id) {
                session.infrastructure = previous.infrastructure.clone();
            }
            let session = Arc::new(session);
            let previous = sessions.insert(session_id.to_string(), Arc::clone(&session));
            (session, previous)
        };
        let replaced = previous.is_some();
        let changed = previous
            .map(|p| p.raw_digest != session.raw_digest)
            .unwrap_or(true);

        tracing::info!(
            session_id,
            events = session.timeline.len(),
            agent_type = %session.agent_type,
            replaced,
            changed,
            "Stored session"
        );
        Ok(PutOutcome {
            session,
            replaced,
            changed,
        })
    }

    /// Attach flow definitions to a stored session.
    ///
    /// The session is replaced by a copy carrying `infrastructure`; later
    /// `put`s for the same id keep it.
    pub fn attach_infrastructure(
        &self,
        session_id: &str,
        infrastructure: Infrastructure,
    ) -> Result<Arc<Session>> {
        let session_id = session_id.trim();
        let infrastructure = Arc::new(infrastructure);
        let session = {
            let mut sessions = self.write();
            let current = sessions
                .get(session_id)
                .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))?;
            let session = Arc::new(Session {
                infrastructure: Some(infrastructure),
                ..Session::clone(current)
            });
            sessions.insert(session_id.to_string(), Arc::clone(&session));
            session
        };

        tracing::info!(session_id, "Attached infrastructure");
        Ok(session)
    }

    /// Flow diagram of a stored session's definitions.
    pub fn flow_diagram(&self, session_id: &str) -> Result<FlowDiagram> {
        Ok(self.require(session_id)?.flow_diagram())
    }

    /// First BlockAgent block with `block_id` across stored sessions, in
    /// session id order.
    pub fn block_info(&self, block_id: &str) -> Option<Value> {
        self.read().values().find_map(|session| {
            session
                .infrastructure
                .as_ref()?
                .block_info(block_id)
                .cloned()
        })
    }

    /// Snapshot of a stored session.
    pub fn get(&self, session_id: &str) -> Option<Arc<Session>> {
        self.read().get(session_id.trim()).cloned()
    }

    /// Like [`get`](Self::get), treating absence as an error.
    pub fn require(&self, session_id: &str) -> Result<Arc<Session>> {
        self.get(session_id)
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))
    }

    /// Stored session ids, sorted.
    pub fn list(&self) -> Vec<String> {
        self.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Listing rows for every stored session, sorted by id.
    pub fn overviews(&self) -> Vec<SessionOverview> {
        self.read()
            .values()
            .map(|s| SessionOverview::of(s))
            .collect()
    }

    /// Remove one session or all of them. Returns how many were removed.
    pub fn clear(&self, target: ClearTarget) -> usize {
        let removed = {
            let mut sessions = self.write();
            match &target {
                ClearTarget::One(id) => usize::from(sessions.remove(id.trim()).is_some()),
                ClearTarget::All => {
                    let n = sessions.len();
                    sessions.clear();
                    n
                }
            }
        };
        tracing::info!(?target, removed, "Cleared sessions");
        removed
    }

    /// Pretty JSON of every stored session.
    pub fn export(&self) -> Result<String> {
        let snapshot: Vec<Arc<Session>> = self.read().values().cloned().collect();
        let export = Export {
            session_count: snapshot.len(),
            sessions: snapshot.iter().map(|s| s.as_ref()).collect(),
        };
        Ok(serde_json::to_string_pretty(&export)?)
    }

    // Stored values are immutable snapshots, so a panic mid-write cannot
    // leave the map half-updated.
    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, Arc<Session>>> {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, Arc<Session>>> {
        self.sessions.write().unwrap_or_else(PoisonError::into_inner)
    }
}
