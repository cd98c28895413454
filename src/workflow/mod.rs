/// Workflow definition layer
///
/// - Result protocol shared by every task handler
/// - State and task types, triggers and the fluent builder
/// - Graph validation and the workflow registry
/// - Declarative JSON manifests

// Result protocol: payloads, error kinds, task results
pub mod result;

// Core workflow type definitions
pub mod types;

// Event and schedule trigger matching
pub mod trigger;

// Fluent definition builder
pub mod builder;

// petgraph-based reachability validation
pub mod graph;

// Registry of compiled workflows
pub mod registry;

// JSON manifests and the handler catalog
pub mod manifest;

pub use builder::WorkflowBuilder;
pub use registry::{CompiledWorkflow, WorkflowRegistry};
pub use result::{ErrorKind, Payload, TaskError, TaskResult};
pub use trigger::{EventTrigger, InboundEvent, ScheduleTrigger, Trigger};
pub use types::{
    handler_fn, ChoiceState, Condition, InputTransform, Operator, Predicate, StateNode, TaskContext,
    TaskHandler, TaskState, WorkflowDefinition,
};
