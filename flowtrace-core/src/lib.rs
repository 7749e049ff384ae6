//! # flowtrace-core
//!
//! Core library for flowtrace - a session timeline engine for SmartFlow
//! workflow logs and conversational agent logs.
//!
//! This library provides:
//! - Domain types for normalized events and sessions
//! - Normalization, merging, agent classification and summarization
//! - An in-memory session store
//! - Ingest helpers for agent envelopes and SmartFlow text dumps
//! - BlockAgent and SmartFlow flow definitions, with a flow diagram view
//! - Configuration management
//! - Logging infrastructure
//!
//! ## Architecture
//!
//! ```text
//! raw SmartFlow ─► normalize ─┐                      ┌─► summarize ─┐
//!                             ├─► merge ─► timeline ─┤              ├─► Session ─► SessionStore
//! raw agent ─────► normalize ─┘                      └─► classify ──┘
//! ```
//!
//! Every stage is a pure function; the store is the only shared state.
//!
//! ## Example
//!
//! ```rust
//! use flowtrace_core::{SessionStore, EventKind};
//! use serde_json::json;
//!
//! let store = SessionStore::new();
//! let outcome = store
//!     .put(
//!         "S1",
//!         vec![json!({"ts": 1, "type": "plugin", "id": "P1"})],
//!         vec![json!({"ts": 2, "role": "assistant", "text": "hi"})],
//!     )
//!     .expect("valid session id");
//!
//! let kinds: Vec<EventKind> = outcome.session.timeline.iter().map(|e| e.kind).collect();
//! assert_eq!(kinds, vec![EventKind::PluginAction, EventKind::AgentTurn]);
//! ```

// Re-export commonly used items at the crate root
pub use classify::{classify, classify_timeline};
pub use config::Config;
pub use error::{Error, Result};
pub use infrastructure::{FlowDiagram, FlowEdge, FlowLayer, FlowNode, Infrastructure};
pub use merge::merge;
pub use normalize::{normalize, Normalizer};
pub use pipeline::build_session;
pub use store::{ClearTarget, PutOutcome, SessionOverview, SessionStore};
pub use summary::{summarize, ErrorEvent, Summary, TurnDetails, Utterance, WaitOnEvent};
pub use types::*;

// Public modules
pub mod classify;
pub mod config;
pub mod error;
pub mod infrastructure;
pub mod ingest;
pub mod logging;
pub mod merge;
pub mod normalize;
pub mod pipeline;
pub mod store;
pub mod summary;
pub mod types;
