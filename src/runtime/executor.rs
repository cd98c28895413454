//! Task invocation
//!
//! Runs one task state's handler and normalises everything that can go wrong
//! around it into the result protocol:
//! - input transformation failures become `VALIDATION`
//! - exceeding the timeout becomes `TIMEOUT`
//! - a panicking handler becomes `INTERNAL`
//!
//! Each handler runs on its own tokio task so a panic is contained by the
//! join handle instead of unwinding through the engine.

use crate::workflow::result::{ErrorKind, Payload, TaskError, TaskResult};
use crate::workflow::types::{TaskContext, TaskState};
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinError;

/// Invokes task handlers on behalf of the execution engine
#[derive(Debug, Clone, Default)]
pub struct TaskExecutor {
    /// Applied to tasks that declare no timeout of their own
    default_timeout: Option<Duration>,
}

impl TaskExecutor {
    pub fn new(default_timeout: Option<Duration>) -> Self {
        Self { default_timeout }
    }

    /// Execute a task state against the current run payload
    ///
    /// The payload is never mutated here; merging the output is the engine's
    /// job.
    pub async fn execute_task(&self, task: &TaskState, ctx: TaskContext, payload: &Payload) -> TaskResult {
        let state = ctx.state.clone();
        let started = std::time::Instant::now();

        let input = match &task.input {
            Some(transform) => catch_unwind(AssertUnwindSafe(|| transform.apply(payload)))
                .unwrap_or_else(|panic| {
                    Err(TaskError::internal(format!(
                        "input transform panicked: {}",
                        panic_message(panic.as_ref())
                    )))
                })?,
            None => payload.clone(),
        };

        tracing::debug!(state = %state, keys = input.len(), "📥 Invoking task handler");

        // The handler gets its own token so a timeout can signal it without
        // cancelling the rest of the run.
        let handler_token = ctx.cancellation.child_token();
        let handler_ctx = TaskContext {
            cancellation: handler_token.clone(),
            ..ctx
        };
        let handler = Arc::clone(&task.handler);
        let join = tokio::spawn(async move { handler.call(handler_ctx, input).await });
        let abort = join.abort_handle();

        let joined = match task.timeout.or(self.default_timeout) {
            Some(limit) => match tokio::time::timeout(limit, join).await {
                Ok(joined) => joined,
                Err(_) => {
                    handler_token.cancel();
                    abort.abort();
                    tracing::warn!(state = %state, ?limit, "⏱️ Task timed out");
                    return Err(TaskError::new(
                        ErrorKind::Timeout,
                        format!("task '{}' exceeded {:?}", state, limit),
                    ));
                }
            },
            None => join.await,
        };

        let result = joined.unwrap_or_else(|e| Err(join_error_to_task_error(&state, e)));

        match &result {
            Ok(output) => tracing::debug!(
                state = %state,
                elapsed = ?started.elapsed(),
                keys = output.len(),
                "📤 Task handler succeeded"
            ),
            Err(err) => tracing::warn!(
                state = %state,
                elapsed = ?started.elapsed(),
                kind = %err.kind,
                "❌ Task handler failed: {}",
                err
            ),
        }

        result
    }
}

fn join_error_to_task_error(state: &str, err: JoinError) -> TaskError {
    if err.is_panic() {
        let message = match err.try_into_panic() {
            Ok(panic) => panic_message(panic.as_ref()),
            Err(_) => "could not extract message".to_string(),
        };
        tracing::error!(state = %state, "💥 Task handler panicked: {}", message);
        TaskError::internal(format!("handler panicked: {}", message))
    } else {
        TaskError::internal(format!("handler aborted: {}", err))
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::types::{handler_fn, InputTransform};
    use serde_json::{json, Value};
    use tokio_util::sync::CancellationToken;
    use uuid::Uuid;

    fn ctx() -> TaskContext {
        TaskContext {
            workflow_id: "wf".to_string(),
            run_id: Uuid::new_v4(),
            state: "Task".to_string(),
            cancellation: CancellationToken::new(),
        }
    }

    fn payload(value: Value) -> Payload {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_handler_output_is_returned() {
        let task = TaskState::new(
            handler_fn(|_ctx, input| async move {
                let mut out = Payload::new();
                out.insert("seen".to_string(), json!(input.len()));
                Ok(out)
            }),
            "Next",
        );

        let out = TaskExecutor::default()
            .execute_task(&task, ctx(), &payload(json!({"a": 1, "b": 2})))
            .await
            .unwrap();
        assert_eq!(out.get("seen"), Some(&json!(2)));
    }

    #[tokio::test]
    async fn test_panic_maps_to_internal() {
        let task = TaskState::new(
            handler_fn(|_ctx, _input| async move {
                if true {
                    panic!("boom");
                }
                Ok(Payload::new())
            }),
            "Next",
        );

        let err = TaskExecutor::default()
            .execute_task(&task, ctx(), &Payload::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Internal);
        assert!(err.message.unwrap().contains("boom"));
    }

    #[tokio::test]
    async fn test_timeout_maps_to_timeout_without_cancelling_run() {
        let task = TaskState::new(
            handler_fn(|ctx, _input| async move {
                ctx.cancellation.cancelled().await;
                Ok(Payload::new())
            }),
            "Next",
        )
        .with_timeout(Duration::from_millis(20));

        let run_ctx = ctx();
        let run_token = run_ctx.cancellation.clone();
        let err = TaskExecutor::default()
            .execute_task(&task, run_ctx, &Payload::new())
            .await
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::Timeout);
        assert!(!run_token.is_cancelled());
    }

    #[tokio::test]
    async fn test_default_timeout_applies() {
        let task = TaskState::new(
            handler_fn(|_ctx, _input| async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(Payload::new())
            }),
            "Next",
        );

        let err = TaskExecutor::new(Some(Duration::from_millis(10)))
            .execute_task(&task, ctx(), &Payload::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Timeout);
    }

    #[tokio::test]
    async fn test_input_transform_feeds_handler() {
        let task = TaskState::new(
            handler_fn(|_ctx, input| async move { Ok(input) }),
            "Next",
        )
        .with_input(InputTransform::select([("id", "$.customer.id")]));

        let out = TaskExecutor::default()
            .execute_task(&task, ctx(), &payload(json!({"customer": {"id": 42}})))
            .await
            .unwrap();
        assert_eq!(Value::Object(out), json!({"id": 42}));
    }

    #[tokio::test]
    async fn test_input_transform_failure_skips_handler() {
        let task = TaskState::new(
            handler_fn(|_ctx, _input| async move { Err(ErrorKind::Internal.into()) }),
            "Next",
        )
        .with_input(InputTransform::select([("id", "$.missing")]));

        let err = TaskExecutor::default()
            .execute_task(&task, ctx(), &Payload::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
    }
}
