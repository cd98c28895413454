//! Core workflow type definitions
//!
//! A workflow is a named graph of states with a designated start state.
//! States are an explicit tagged union so the engine can match on them
//! exhaustively, and handlers are trait objects so pipeline authors can plug
//! in new step types without touching the engine.

use crate::workflow::result::{ErrorKind, Payload, TaskError, TaskResult};
use crate::workflow::trigger::Trigger;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Boxed future returned by every task handler
pub type HandlerFuture = Pin<Box<dyn Future<Output = TaskResult> + Send + 'static>>;

/// Unit of work behind a task state
///
/// Implemented for any `Fn(TaskContext, Payload) -> impl Future<Output = TaskResult>`,
/// so plain async closures can be used directly. Handlers may perform I/O
/// through collaborators they capture, but must report expected failures
/// through the returned result rather than by panicking.
pub trait TaskHandler: Send + Sync + 'static {
    fn call(&self, ctx: TaskContext, payload: Payload) -> HandlerFuture;
}

impl<F, Fut> TaskHandler for F
where
    F: Fn(TaskContext, Payload) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = TaskResult> + Send + 'static,
{
    fn call(&self, ctx: TaskContext, payload: Payload) -> HandlerFuture {
        Box::pin((self)(ctx, payload))
    }
}

/// Shared handler reference stored in task states
pub type BoxedTaskHandler = Arc<dyn TaskHandler>;

/// Pin a closure to the handler signature so its argument types infer
pub fn handler_fn<F, Fut>(f: F) -> F
where
    F: Fn(TaskContext, Payload) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = TaskResult> + Send + 'static,
{
    f
}

/// Environment handle passed to a handler for one invocation
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub workflow_id: String,
    pub run_id: Uuid,
    /// Name of the task state being executed
    pub state: String,
    /// Cancelled when the host cancels the run; long handlers should watch it
    pub cancellation: CancellationToken,
}

impl TaskContext {
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

/// A named node in the workflow graph
#[derive(Debug, Clone)]
pub enum StateNode {
    /// Runs a handler, then moves to `next`
    Task(TaskState),
    /// Terminal: the run succeeded
    Succeed,
    /// Terminal: the run failed with a configured reason
    Fail {
        error: ErrorKind,
        cause: Option<String>,
    },
    /// Routes to the first branch whose predicate holds
    Choice(ChoiceState),
}

impl StateNode {
    pub fn fail(error: ErrorKind) -> Self {
        StateNode::Fail { error, cause: None }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StateNode::Succeed | StateNode::Fail { .. })
    }

    /// Every state name this node can transition to
    pub fn successors(&self) -> Vec<&str> {
        match self {
            StateNode::Task(task) => vec![task.next.as_str()],
            StateNode::Succeed | StateNode::Fail { .. } => Vec::new(),
            StateNode::Choice(choice) => choice
                .branches
                .iter()
                .map(|branch| branch.next.as_str())
                .chain(choice.default.as_deref())
                .collect(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            StateNode::Task(_) => "task",
            StateNode::Succeed => "succeed",
            StateNode::Fail { .. } => "fail",
            StateNode::Choice(_) => "choice",
        }
    }
}

/// Task state: handler plus the state that follows it
#[derive(Clone)]
pub struct TaskState {
    pub handler: BoxedTaskHandler,
    pub next: String,
    /// Exceeding this is reported as `TIMEOUT`
    pub timeout: Option<Duration>,
    /// Reshapes the payload before the handler sees it
    pub input: Option<InputTransform>,
}

impl TaskState {
    pub fn new(handler: impl TaskHandler, next: impl Into<String>) -> Self {
        Self::from_boxed(Arc::new(handler), next)
    }

    pub fn from_boxed(handler: BoxedTaskHandler, next: impl Into<String>) -> Self {
        Self {
            handler,
            next: next.into(),
            timeout: None,
            input: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_input(mut self, input: InputTransform) -> Self {
        self.input = Some(input);
        self
    }
}

impl fmt::Debug for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskState")
            .field("next", &self.next)
            .field("timeout", &self.timeout)
            .field("input", &self.input)
            .finish_non_exhaustive()
    }
}

/// Optional input transformation applied before a handler runs
#[derive(Clone)]
pub enum InputTransform {
    /// Build a new payload from `key -> JSONPath` selections
    Select(Vec<(String, String)>),
    /// Arbitrary mapping function
    Map(Arc<dyn Fn(&Payload) -> Payload + Send + Sync>),
}

impl InputTransform {
    pub fn select<I, K, P>(selections: I) -> Self
    where
        I: IntoIterator<Item = (K, P)>,
        K: Into<String>,
        P: Into<String>,
    {
        InputTransform::Select(
            selections
                .into_iter()
                .map(|(key, path)| (key.into(), path.into()))
                .collect(),
        )
    }

    pub fn map(f: impl Fn(&Payload) -> Payload + Send + Sync + 'static) -> Self {
        InputTransform::Map(Arc::new(f))
    }

    /// Produce the handler's input from the run payload
    ///
    /// A selection that matches nothing is a `VALIDATION` failure.
    pub fn apply(&self, payload: &Payload) -> Result<Payload, TaskError> {
        match self {
            InputTransform::Map(f) => Ok(f(payload)),
            InputTransform::Select(selections) => {
                let document = Value::Object(payload.clone());
                let mut input = Payload::new();
                for (key, path) in selections {
                    let value = select_first(&document, path)?.ok_or_else(|| {
                        TaskError::validation(format!("input path '{}' matched nothing", path))
                    })?;
                    input.insert(key.clone(), value);
                }
                Ok(input)
            }
        }
    }
}

impl fmt::Debug for InputTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputTransform::Select(selections) => f.debug_tuple("Select").field(selections).finish(),
            InputTransform::Map(_) => f.write_str("Map(<fn>)"),
        }
    }
}

/// Evaluate a JSONPath and return the first match
fn select_first(document: &Value, path: &str) -> Result<Option<Value>, TaskError> {
    let matches = jsonpath_lib::select(document, path)
        .map_err(|e| TaskError::validation(format!("invalid JSONPath '{}': {:?}", path, e)))?;
    Ok(matches.into_iter().next().cloned())
}

/// Choice state: ordered branches plus an optional fallback
#[derive(Debug, Clone, Default)]
pub struct ChoiceState {
    pub branches: Vec<ChoiceBranch>,
    pub default: Option<String>,
}

impl ChoiceState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn when(mut self, predicate: Predicate, next: impl Into<String>) -> Self {
        self.branches.push(ChoiceBranch {
            predicate,
            next: next.into(),
        });
        self
    }

    pub fn otherwise(mut self, next: impl Into<String>) -> Self {
        self.default = Some(next.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct ChoiceBranch {
    pub predicate: Predicate,
    pub next: String,
}

/// Branch predicate over the current payload
#[derive(Clone)]
pub enum Predicate {
    /// Declarative comparison, as used in manifests
    Condition(Condition),
    /// Arbitrary closure
    Fn(Arc<dyn Fn(&Payload) -> bool + Send + Sync>),
}

impl Predicate {
    pub fn from_fn(f: impl Fn(&Payload) -> bool + Send + Sync + 'static) -> Self {
        Predicate::Fn(Arc::new(f))
    }

    pub fn evaluate(&self, payload: &Payload) -> bool {
        match self {
            Predicate::Condition(condition) => condition.evaluate(payload),
            Predicate::Fn(f) => f(payload),
        }
    }
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Condition(condition) => f.debug_tuple("Condition").field(condition).finish(),
            Predicate::Fn(_) => f.write_str("Fn(<closure>)"),
        }
    }
}

impl From<Condition> for Predicate {
    fn from(condition: Condition) -> Self {
        Predicate::Condition(condition)
    }
}

/// Comparison of a payload variable against a literal
///
/// `variable` is a JSONPath (`$.status`) or a bare top-level key (`status`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub variable: String,
    pub operator: Operator,
    #[serde(default)]
    pub value: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Equals,
    NotEquals,
    GreaterThan,
    LessThan,
    Exists,
}

impl Condition {
    pub fn new(variable: impl Into<String>, operator: Operator, value: Value) -> Self {
        Self {
            variable: variable.into(),
            operator,
            value,
        }
    }

    pub fn equals(variable: impl Into<String>, value: Value) -> Self {
        Self::new(variable, Operator::Equals, value)
    }

    /// Resolve the variable; an unparsable path resolves to nothing
    fn resolve(&self, payload: &Payload) -> Option<Value> {
        if self.variable.starts_with('$') {
            let document = Value::Object(payload.clone());
            select_first(&document, &self.variable).ok().flatten()
        } else {
            payload.get(&self.variable).cloned()
        }
    }

    pub fn evaluate(&self, payload: &Payload) -> bool {
        let actual = self.resolve(payload);
        match self.operator {
            Operator::Exists => actual.is_some_and(|v| !v.is_null()),
            Operator::Equals => actual.as_ref() == Some(&self.value),
            Operator::NotEquals => actual.as_ref() != Some(&self.value),
            Operator::GreaterThan => compare(actual.as_ref(), &self.value, |a, b| a > b),
            Operator::LessThan => compare(actual.as_ref(), &self.value, |a, b| a < b),
        }
    }
}

fn compare(actual: Option<&Value>, expected: &Value, op: impl Fn(f64, f64) -> bool) -> bool {
    match (actual.and_then(Value::as_f64), expected.as_f64()) {
        (Some(a), Some(e)) => op(a, e),
        _ => false,
    }
}

/// A complete workflow definition
///
/// Produced by [`crate::workflow::builder::WorkflowBuilder`] or a manifest and
/// validated into a [`crate::workflow::registry::CompiledWorkflow`] on
/// registration.
#[derive(Debug, Clone)]
pub struct WorkflowDefinition {
    pub id: String,
    pub trigger: Trigger,
    pub start_state: String,
    pub states: BTreeMap<String, StateNode>,
}

impl WorkflowDefinition {
    pub fn state(&self, name: &str) -> Option<&StateNode> {
        self.states.get(name)
    }
}
