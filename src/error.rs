//! Construction-time and host-facing error types
//!
//! Run-time task failures never show up here; they travel inside
//! [`crate::workflow::result::TaskError`] and end up in the run result.

use thiserror::Error;

/// Errors raised while defining or registering a workflow
///
/// All of these are fatal for the definition in question and are never
/// surfaced at run time.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DefinitionError {
    #[error("workflow id must not be empty")]
    EmptyWorkflowId,

    #[error("state '{0}' is defined more than once")]
    DuplicateState(String),

    #[error("state '{state}' referenced by '{referenced_by}' does not exist")]
    UnknownState {
        state: String,
        /// Name of the referring state, or `<start>` for the start pointer
        referenced_by: String,
    },

    #[error("workflow '{0}' has no start state")]
    MissingStartState(String),

    #[error("no succeed or fail state is reachable from '{start}' in workflow '{workflow}'")]
    NoTerminalReachable { workflow: String, start: String },

    #[error("state '{state}' in workflow '{workflow}' is never reached")]
    UnreachableState { workflow: String, state: String },

    #[error("workflow '{0}' is already registered")]
    DuplicateWorkflow(String),

    #[error("invalid cron expression '{expression}': {reason}")]
    InvalidSchedule { expression: String, reason: String },

    #[error("unknown timezone '{0}'")]
    InvalidTimezone(String),
}

impl DefinitionError {
    /// Stable code used in logs and API responses
    pub fn code(&self) -> &'static str {
        match self {
            DefinitionError::EmptyWorkflowId => "INVALID_DEFINITION",
            DefinitionError::DuplicateState(_) => "DUPLICATE_STATE",
            DefinitionError::UnknownState { .. } => "UNKNOWN_STATE",
            DefinitionError::MissingStartState(_) => "UNKNOWN_STATE",
            DefinitionError::NoTerminalReachable { .. } => "NO_TERMINAL_REACHABLE",
            DefinitionError::UnreachableState { .. } => "UNREACHABLE_STATE",
            DefinitionError::DuplicateWorkflow(_) => "DUPLICATE_WORKFLOW",
            DefinitionError::InvalidSchedule { .. } => "INVALID_SCHEDULE",
            DefinitionError::InvalidTimezone(_) => "INVALID_SCHEDULE",
        }
    }
}

/// Errors from the manual invocation entry point
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvokeError {
    #[error("workflow '{0}' is not registered")]
    UnknownWorkflow(String),

    /// The run's task was aborted or panicked before producing a result
    #[error("run of workflow '{workflow}' did not complete: {reason}")]
    RunAborted { workflow: String, reason: String },
}

/// Errors raised while loading declarative workflow manifests
#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("failed to read manifest {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse manifest {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("state '{state}' uses unknown handler '{handler}'")]
    UnknownHandler { state: String, handler: String },

    #[error("handler '{handler}' rejected its params: {reason}")]
    InvalidParams { handler: String, reason: String },

    #[error("invalid JSONPath '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error(transparent)]
    Definition(#[from] DefinitionError),
}
