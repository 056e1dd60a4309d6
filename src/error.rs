//! Error taxonomy for Orbit (kinds, not wire-format message strings).
//!
//! Mirrors the distinction between programmer-contract violations
//! (`Assertion`) and runtime conditions callers are expected to handle.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, OrbitError>;

#[derive(Debug, Error)]
pub enum OrbitError {
    /// A programmer contract was violated (e.g. a capability used on a
    /// source that never installed it, a required argument missing). Not
    /// meant to be caught and retried.
    #[error("assertion failed: {0}")]
    Assertion(String),

    /// `truncate`/`rollback` target id is not present in the log.
    #[error("transform {0} is not in the log")]
    NotLogged(String),

    /// `truncate`/`rollback` relative offset walked out of the log's bounds.
    #[error("relative offset {relative} from {id} is out of range")]
    OutOfRange { id: String, relative: isize },

    /// A handler-specific gate rejected the transform before dispatch.
    #[error("transform not allowed: {0}")]
    TransformNotAllowed(String),

    /// A query demanded a record that does not exist.
    #[error("record not found: {0:?}")]
    RecordNotFound(Identity),

    /// An operation referenced a type, attribute, or relationship the
    /// schema never declared.
    #[error("schema error: {0}")]
    Schema(String),

    /// Transport failure: unreachable host or a timeout.
    #[error("network error: {0}")]
    Network(String),

    /// Remote responded with a 4xx status.
    #[error("client error ({status}): {description}")]
    Client {
        status: u16,
        description: String,
        data: Option<serde_json::Value>,
    },

    /// Remote responded with a 5xx status.
    #[error("server error ({status}): {description}")]
    Server { status: u16, description: String },

    /// The task queue was cleared while this task was still pending.
    #[error("task cancelled")]
    Cancelled,

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
}

use crate::types::Identity;

impl OrbitError {
    pub fn timeout(ms: u64) -> Self {
        OrbitError::Network(format!("No fetch response within {ms}ms."))
    }
}
