//! Result protocol shared by every task handler
//!
//! A handler never throws to signal an expected failure. It returns
//! `Ok(payload)` or `Err(TaskError)`, and the engine treats every state the
//! same way regardless of what the task actually does.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// JSON object threaded between states within one run
pub type Payload = Map<String, Value>;

/// Outcome of a single task invocation
pub type TaskResult = Result<Payload, TaskError>;

/// Closed set of run-time failure reasons
///
/// The first six are produced by task handlers. The remaining kinds are
/// produced by the engine itself while walking the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Input payload failed a handler's validation
    Validation,
    /// An external collaborator (warehouse, SFTP host, CRM) was unreachable
    DependencyUnavailable,
    /// The task exceeded its configured timeout
    Timeout,
    /// The task's target already exists
    AlreadyExists,
    /// The task's target could not be found
    NotFound,
    /// Unexpected fault, including handler panics caught by the engine
    Internal,
    /// A choice state matched no branch and declares no default
    NoMatchingBranch,
    /// A state was visited more often than the engine's bound allows
    CycleLimitExceeded,
    /// The host cancelled the run between two states
    Cancelled,
}

impl ErrorKind {
    /// Wire code, identical to the serialized form
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "VALIDATION",
            ErrorKind::DependencyUnavailable => "DEPENDENCY_UNAVAILABLE",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::AlreadyExists => "ALREADY_EXISTS",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::Internal => "INTERNAL",
            ErrorKind::NoMatchingBranch => "NO_MATCHING_BRANCH",
            ErrorKind::CycleLimitExceeded => "CYCLE_LIMIT_EXCEEDED",
            ErrorKind::Cancelled => "CANCELLED",
        }
    }

    /// Parse a wire code back into a kind
    pub fn from_code(code: &str) -> Option<Self> {
        let kind = match code {
            "VALIDATION" => ErrorKind::Validation,
            "DEPENDENCY_UNAVAILABLE" => ErrorKind::DependencyUnavailable,
            "TIMEOUT" => ErrorKind::Timeout,
            "ALREADY_EXISTS" => ErrorKind::AlreadyExists,
            "NOT_FOUND" => ErrorKind::NotFound,
            "INTERNAL" => ErrorKind::Internal,
            "NO_MATCHING_BRANCH" => ErrorKind::NoMatchingBranch,
            "CYCLE_LIMIT_EXCEEDED" => ErrorKind::CycleLimitExceeded,
            "CANCELLED" => ErrorKind::Cancelled,
            _ => return None,
        };
        Some(kind)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Failure variant of the result protocol
///
/// Carries the error kind plus an optional human-readable detail that ends up
/// in the run result for operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskError {
    pub kind: ErrorKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl TaskError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: Some(message.into()),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn dependency_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::DependencyUnavailable, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }
}

impl From<ErrorKind> for TaskError {
    fn from(kind: ErrorKind) -> Self {
        Self { kind, message: None }
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(message) => write!(f, "{}: {}", self.kind, message),
            None => write!(f, "{}", self.kind),
        }
    }
}

impl std::error::Error for TaskError {}

/// Shallow-merge `update` into `payload`, later keys win
pub fn merge_payload(payload: &mut Payload, update: Payload) {
    for (key, value) in update {
        payload.insert(key, value);
    }
}
