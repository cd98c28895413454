/// flowstate: declarative state-machine workflows for multi-step pipelines
///
/// Pipelines (ETL syncs, file transfers, CRM exports, infrastructure
/// restarts) are declared as named states, started by bus events or cron
/// schedules, and executed one state at a time with a JSON payload threaded
/// between steps and typed results instead of exceptions.

// Core configuration and setup
pub mod config;

// Construction-time and host-facing errors
pub mod error;

// Workflow definition layer - states, triggers, validation and registry
pub mod workflow;

// Runtime - state machine engine, task execution, dispatch and scheduler clock
pub mod runtime;

// Run result sinks - tracing and SQLite run history
pub mod sink;

// HTTP API layer - trigger ingestion, invocation and run history
pub mod api;

// Server setup and initialization
pub mod server;

pub use error::{DefinitionError, InvokeError, ManifestError};
pub use runtime::{Dispatcher, ExecutionEngine, RunResult, RunStatus};
pub use server::{start_server, start_server_with};
pub use workflow::{
    ErrorKind, Payload, TaskContext, TaskError, TaskResult, WorkflowBuilder, WorkflowDefinition,
    WorkflowRegistry,
};
