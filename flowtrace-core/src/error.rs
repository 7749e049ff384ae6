//! Error types for flowtrace-core
//!
//! Data-shape problems in the logs themselves never surface here: the engine
//! tags them and keeps going. These variants cover I/O at the edges, bad
//! configuration, and caller contract violations.

use thiserror::Error;

/// Main error type for the flowtrace-core library
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error (whole documents, not individual entries)
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Parse error for a whole log document
    #[error("parse error in {source_name} log: {message}")]
    Parse {
        source_name: String,
        message: String,
    },

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// The store was handed an empty or blank session id
    #[error("session id must not be empty")]
    InvalidSessionId,

    /// Session not found
    #[error("session not found: {0}")]
    SessionNotFound(String),
}

/// Result type alias for flowtrace-core
pub type Result<T> = std::result::Result<T, Error>;
