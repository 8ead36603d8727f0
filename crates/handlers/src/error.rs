use std::path::PathBuf;

use {serde::Serialize, thiserror::Error};

/// Crate-level error for discovery, storage setup, and registry operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error(transparent)]
    State(#[from] StateError),

    #[error("failed to read handlers directory {path}: {source}")]
    HandlersDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{message}")]
    Message { message: String },
}

impl Error {
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }
}

impl patchbay_common::FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message { message }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

patchbay_common::impl_context!();

// ── Load errors ─────────────────────────────────────────────────────────────

/// A handler source that could not be registered. Loading continues with
/// the remaining sources.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("{origin}: {kind}")]
pub struct LoadError {
    /// File name (or native registration label) the handler came from.
    pub origin: String,
    pub kind: LoadErrorKind,
}

impl LoadError {
    pub fn new(origin: impl Into<String>, kind: LoadErrorKind) -> Self {
        Self {
            origin: origin.into(),
            kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LoadErrorKind {
    #[error("failed to read source: {reason}")]
    Read { reason: String },

    #[error("failed to parse source: {reason}")]
    Parse { reason: String },

    #[error("handler does not define a 'handle' entry")]
    MissingHandle,

    #[error("source has both a [handler] table and top-level 'handle'")]
    AmbiguousDialect,

    #[error("invalid channels: {reason}")]
    InvalidChannels { reason: String },

    #[error("invalid '{field}': {reason}")]
    InvalidField { field: String, reason: String },

    #[error("duplicate handler name '{name}' (already loaded from {first_origin})")]
    DuplicateName { name: String, first_origin: String },
}

// ── Invocation failures ─────────────────────────────────────────────────────

/// Failure record attached to a `Skip` outcome when a handler body did not
/// complete normally.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InvocationFailure {
    #[error("handler '{handler}' timed out after {elapsed_ms}ms")]
    Timeout { handler: String, elapsed_ms: u64 },

    #[error("handler '{handler}' failed: {detail}")]
    Execution { handler: String, detail: String },
}

impl InvocationFailure {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

// ── State errors ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    #[error("value is not representable: {0}")]
    Serialization(String),

    #[error("state size limit exceeded for {scope} (max {limit} bytes)")]
    LimitExceeded { scope: String, limit: usize },

    #[error("state storage failed: {0}")]
    Storage(String),

    #[error("unknown state namespace '{0}' (expected 'cache' or 'store')")]
    UnknownNamespace(String),
}

impl StateError {
    pub(crate) fn handler_limit(handler: &str, limit: usize) -> Self {
        Self::LimitExceeded {
            scope: format!("handler '{handler}'"),
            limit,
        }
    }

    pub(crate) fn total_limit(limit: usize) -> Self {
        Self::LimitExceeded {
            scope: "all handlers".into(),
            limit,
        }
    }
}

impl From<serde_json::Error> for StateError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<sqlx::Error> for StateError {
    fn from(e: sqlx::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

// ── Collaborator errors ─────────────────────────────────────────────────────

/// A messaging, HTTP, or AI call failed. Returned to the calling handler as
/// the value of that call; the pipeline never sees it.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("{service} call failed: {message}")]
pub struct CollaboratorError {
    pub service: &'static str,
    pub message: String,
}

impl CollaboratorError {
    pub fn new(service: &'static str, message: impl Into<String>) -> Self {
        Self {
            service,
            message: message.into(),
        }
    }

    pub fn messaging(message: impl Into<String>) -> Self {
        Self::new("messaging", message)
    }

    pub fn http(message: impl Into<String>) -> Self {
        Self::new("http", message)
    }

    pub fn ai(message: impl Into<String>) -> Self {
        Self::new("ai", message)
    }
}
