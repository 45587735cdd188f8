//! Error types for codegraph-searcher
//!
//! Two layers:
//! - [`EngineError`]: failures reported by an index backend (open, reload, retain/release hooks)
//! - [`SearcherError`]: what callers of the cache see, tagged with the handle involved

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::cache::LifecycleState;
use crate::config::ConfigError;
use crate::domain::IndexHandle;
use crate::execution::ExecutionError;

/// Searcher error kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Opening or refreshing an index failed
    Open,
    /// A view could not be acquired (federated fetches roll back first)
    Acquisition,
    /// Teardown of one or more managers/views failed
    Shutdown,
    /// Caller misuse (double destroy, double close, use after close)
    Protocol,
    /// Search pool lost a task, or the search itself failed
    Execution,
    /// Invalid configuration
    Config,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Open => "open",
            ErrorKind::Acquisition => "acquisition",
            ErrorKind::Shutdown => "shutdown",
            ErrorKind::Protocol => "protocol",
            ErrorKind::Execution => "execution",
            ErrorKind::Config => "config",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Backend (index engine) error
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Index directory not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Index corrupted: {0}")]
    Corrupted(String),

    #[error("Index manager is closed")]
    Closed,

    #[error("View belongs to manager {found}, not manager {expected}")]
    ForeignView { expected: u64, found: u64 },

    #[error("Tantivy error: {0}")]
    Tantivy(#[from] tantivy::TantivyError),

    #[error("{0}")]
    Other(String),
}

impl EngineError {
    pub fn other(message: impl Into<String>) -> Self {
        EngineError::Other(message.into())
    }
}

/// One manager or view that could not be torn down cleanly.
#[derive(Debug)]
pub struct ShutdownFailure {
    pub handle: IndexHandle,
    pub error: EngineError,
}

impl fmt::Display for ShutdownFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.handle, self.error)
    }
}

/// Caller misuse of the cache or of a session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolViolation {
    #[error("searcher cache has already been destroyed")]
    AlreadyDestroyed,

    #[error("searcher cache is not active (state: {0})")]
    NotActive(LifecycleState),

    #[error("session has already been closed")]
    SessionClosed,

    #[error("{0} session(s) still open; close them before destroy()")]
    SessionsOutstanding(usize),

    #[error("federated fetch needs at least one index handle")]
    EmptyFederation,
}

/// Main error type for searcher cache operations
#[derive(Debug, Error)]
pub enum SearcherError {
    #[error("Failed to open index {handle}: {source}")]
    Open {
        handle: IndexHandle,
        #[source]
        source: EngineError,
    },

    #[error("Failed to refresh index {handle}: {source}")]
    Refresh {
        handle: IndexHandle,
        #[source]
        source: EngineError,
    },

    #[error("Failed to acquire searcher for {handle}: {source}")]
    Acquisition {
        handle: IndexHandle,
        #[source]
        source: EngineError,
    },

    #[error("{} teardown failure(s): {}", failures.len(), join_failures(failures))]
    Shutdown { failures: Vec<ShutdownFailure> },

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolViolation),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Search failed: {0}")]
    Search(#[from] EngineError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Metrics registration failed: {0}")]
    Metrics(#[from] prometheus::Error),
}

fn join_failures(failures: &[ShutdownFailure]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl SearcherError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SearcherError::Open { .. } | SearcherError::Refresh { .. } => ErrorKind::Open,
            SearcherError::Acquisition { .. } => ErrorKind::Acquisition,
            SearcherError::Shutdown { .. } => ErrorKind::Shutdown,
            SearcherError::Protocol(_) => ErrorKind::Protocol,
            SearcherError::Execution(_) | SearcherError::Search(_) => ErrorKind::Execution,
            SearcherError::Config(_) | SearcherError::Metrics(_) => ErrorKind::Config,
        }
    }

    /// Handle that caused the failure, when there is exactly one.
    pub fn handle(&self) -> Option<&IndexHandle> {
        match self {
            SearcherError::Open { handle, .. }
            | SearcherError::Refresh { handle, .. }
            | SearcherError::Acquisition { handle, .. } => Some(handle),
            _ => None,
        }
    }

    /// The protocol violation, if this is one.
    pub fn protocol(&self) -> Option<&ProtocolViolation> {
        match self {
            SearcherError::Protocol(violation) => Some(violation),
            _ => None,
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, SearcherError>;
