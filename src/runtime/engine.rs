//! State machine execution engine
//!
//! Walks a workflow's states from the start state to a terminal state, one
//! state at a time. Task outputs are shallow-merged into the run payload and
//! the first failure halts the run (fail-fast). The engine never retries and
//! never resumes a previous run: every invocation is a fresh run with a fresh
//! run id.

use crate::runtime::executor::{panic_message, TaskExecutor};
use crate::workflow::result::{merge_payload, ErrorKind, Payload, TaskError};
use crate::workflow::registry::CompiledWorkflow;
use crate::workflow::types::{ChoiceState, StateNode, TaskContext};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Default bound on visits to any single state within one run
pub const DEFAULT_MAX_STATE_VISITS: usize = 1000;

/// Engine tuning
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub max_state_visits: usize,
    pub default_task_timeout: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_state_visits: DEFAULT_MAX_STATE_VISITS,
            default_task_timeout: None,
        }
    }
}

/// Terminal status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Succeeded,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Succeeded => "Succeeded",
            RunStatus::Failed => "Failed",
        }
    }
}

/// Which state failed and why
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFailure {
    pub state: String,
    pub kind: ErrorKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Result of one run, emitted once to the run result sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub workflow_id: String,
    pub run_id: Uuid,
    pub status: RunStatus,
    /// Payload as it stood when the run stopped
    pub payload: Payload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RunFailure>,
    pub visited_states: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunResult {
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Succeeded
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|failure| failure.kind)
    }
}

/// Per-run mutable state, owned exclusively by the engine for one run
#[derive(Debug)]
pub struct ExecutionContext {
    pub workflow_id: String,
    pub run_id: Uuid,
    pub payload: Payload,
    pub visited_states: Vec<String>,
    visits: HashMap<String, usize>,
    started_at: DateTime<Utc>,
}

impl ExecutionContext {
    fn new(workflow_id: &str, payload: Payload) -> Self {
        Self {
            workflow_id: workflow_id.to_string(),
            run_id: Uuid::new_v4(),
            payload,
            visited_states: Vec::new(),
            visits: HashMap::new(),
            started_at: Utc::now(),
        }
    }

    /// Record a visit and return how many times the state has been entered
    fn enter(&mut self, state: &str) -> usize {
        self.visited_states.push(state.to_string());
        let count = self.visits.entry(state.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    fn task_context(&self, state: &str, cancellation: &CancellationToken) -> TaskContext {
        TaskContext {
            workflow_id: self.workflow_id.clone(),
            run_id: self.run_id,
            state: state.to_string(),
            cancellation: cancellation.clone(),
        }
    }

    fn succeed(self) -> RunResult {
        self.finish(RunStatus::Succeeded, None)
    }

    fn fail(self, state: &str, error: TaskError) -> RunResult {
        let failure = RunFailure {
            state: state.to_string(),
            kind: error.kind,
            message: error.message,
        };
        self.finish(RunStatus::Failed, Some(failure))
    }

    fn finish(self, status: RunStatus, error: Option<RunFailure>) -> RunResult {
        RunResult {
            workflow_id: self.workflow_id,
            run_id: self.run_id,
            status,
            payload: self.payload,
            error,
            visited_states: self.visited_states,
            started_at: self.started_at,
            finished_at: Utc::now(),
        }
    }
}

/// Sequential state machine interpreter
///
/// Holds no per-run state, so one engine serves any number of concurrent runs.
#[derive(Debug, Clone)]
pub struct ExecutionEngine {
    executor: TaskExecutor,
    max_state_visits: usize,
}

impl Default for ExecutionEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl ExecutionEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            executor: TaskExecutor::new(config.default_task_timeout),
            max_state_visits: config.max_state_visits.max(1),
        }
    }

    /// Run `workflow` to completion from its start state
    ///
    /// Only compiled workflows run, so every transition target is known to
    /// exist. Never returns an error: every failure, including cancellation
    /// between states, ends up in the returned [`RunResult`].
    pub async fn execute(
        &self,
        compiled: &CompiledWorkflow,
        payload: Payload,
        cancellation: CancellationToken,
    ) -> RunResult {
        let workflow = &compiled.definition;
        let mut ctx = ExecutionContext::new(&workflow.id, payload);
        let mut current = workflow.start_state.clone();

        tracing::info!(
            workflow = %workflow.id,
            run_id = %ctx.run_id,
            start = %current,
            "🚀 Starting workflow run"
        );

        let result = loop {
            if cancellation.is_cancelled() {
                break ctx.fail(
                    &current,
                    TaskError::new(ErrorKind::Cancelled, "run cancelled by host"),
                );
            }

            let visits = ctx.enter(&current);
            if visits > self.max_state_visits {
                let message = format!(
                    "state '{}' entered {} times (limit {})",
                    current, visits, self.max_state_visits
                );
                break ctx.fail(&current, TaskError::new(ErrorKind::CycleLimitExceeded, message));
            }

            let Some(node) = workflow.state(&current) else {
                let message = format!("state '{}' is not defined", current);
                break ctx.fail(&current, TaskError::internal(message));
            };

            tracing::debug!(
                run_id = %ctx.run_id,
                state = %current,
                kind = node.kind(),
                step = ctx.visited_states.len(),
                "📍 Entering state"
            );

            match node {
                StateNode::Task(task) => {
                    let task_ctx = ctx.task_context(&current, &cancellation);
                    match self.executor.execute_task(task, task_ctx, &ctx.payload).await {
                        Ok(output) => {
                            merge_payload(&mut ctx.payload, output);
                            current = task.next.clone();
                        }
                        Err(error) => break ctx.fail(&current, error),
                    }
                }
                StateNode::Succeed => break ctx.succeed(),
                StateNode::Fail { error, cause } => {
                    let error = TaskError {
                        kind: *error,
                        message: cause.clone(),
                    };
                    break ctx.fail(&current, error);
                }
                StateNode::Choice(choice) => match select_branch(choice, &ctx.payload) {
                    Ok(Some(next)) => {
                        tracing::debug!(run_id = %ctx.run_id, state = %current, next = %next, "🔀 Branch selected");
                        current = next;
                    }
                    Ok(None) => {
                        let message = format!("no branch of '{}' matched and no default is set", current);
                        break ctx.fail(&current, TaskError::new(ErrorKind::NoMatchingBranch, message));
                    }
                    Err(error) => break ctx.fail(&current, error),
                },
            }
        };

        match &result.error {
            None => tracing::info!(
                workflow = %result.workflow_id,
                run_id = %result.run_id,
                steps = result.visited_states.len(),
                "🎉 Workflow run succeeded"
            ),
            Some(failure) => tracing::warn!(
                workflow = %result.workflow_id,
                run_id = %result.run_id,
                state = %failure.state,
                kind = %failure.kind,
                "❌ Workflow run failed"
            ),
        }

        result
    }
}

/// Evaluate branches in declared order, falling back to the default
///
/// A panicking predicate is reported as `INTERNAL` instead of unwinding.
fn select_branch(choice: &ChoiceState, payload: &Payload) -> Result<Option<String>, TaskError> {
    for branch in &choice.branches {
        let matched = catch_unwind(AssertUnwindSafe(|| branch.predicate.evaluate(payload)))
            .map_err(|panic| {
                TaskError::internal(format!(
                    "choice predicate panicked: {}",
                    panic_message(panic.as_ref())
                ))
            })?;
        if matched {
            return Ok(Some(branch.next.clone()));
        }
    }
    Ok(choice.default.clone())
}
