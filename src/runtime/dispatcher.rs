//! Trigger dispatch
//!
//! Resolves an event or tick against the registry and starts one run per
//! matched workflow. Runs are spawned on a `TaskTracker` owned by the
//! dispatcher, not by the caller: a caller that stops waiting (a dropped HTTP
//! request, say) detaches from its runs without aborting them, and every run
//! still reaches the sink exactly once. Each run gets a child of the host
//! shutdown token.

use crate::error::InvokeError;
use crate::runtime::engine::RunResult;
use crate::sink::RunSink;
use crate::workflow::registry::{CompiledWorkflow, WorkflowRegistry};
use crate::workflow::result::Payload;
use crate::workflow::trigger::InboundEvent;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Outcome of one event or tick delivery
#[derive(Debug, Clone, Serialize)]
pub struct Dispatch {
    /// Workflows the trigger resolved to
    pub matched: usize,
    /// Finished runs, ordered by workflow id
    pub runs: Vec<RunResult>,
}

/// Connects triggers, the engine and the run sink
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<WorkflowRegistry>,
    sink: Arc<dyn RunSink>,
    shutdown: CancellationToken,
    runs: TaskTracker,
}

impl Dispatcher {
    pub fn new(registry: Arc<WorkflowRegistry>, sink: Arc<dyn RunSink>, shutdown: CancellationToken) -> Self {
        Self {
            registry,
            sink,
            shutdown,
            runs: TaskTracker::new(),
        }
    }

    pub fn registry(&self) -> &Arc<WorkflowRegistry> {
        &self.registry
    }

    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Runs started and not yet reported
    pub fn in_flight(&self) -> usize {
        self.runs.len()
    }

    /// Start every workflow matching `event` with its body as the payload
    ///
    /// Returns once all matched runs finished.
    pub async fn dispatch_event(&self, event: InboundEvent) -> Dispatch {
        let matched = self.registry.resolve_for_event(&event);
        tracing::info!(
            bus = %event.bus,
            source = %event.source,
            detail_type = %event.detail_type,
            matched = matched.len(),
            "📨 Event received"
        );
        self.run_all(matched, event.body).await
    }

    /// Start every schedule due in the minute of `timestamp` with an empty payload
    pub async fn dispatch_tick(&self, timestamp: DateTime<Utc>) -> Dispatch {
        let matched = self.registry.resolve_for_tick(timestamp);
        if matched.is_empty() {
            tracing::debug!(%timestamp, "⏰ Tick matched no schedules");
        } else {
            tracing::info!(%timestamp, matched = matched.len(), "⏰ Tick fired schedules");
        }
        self.run_all(matched, Payload::new()).await
    }

    /// Manual invocation, reported to the sink like any triggered run
    pub async fn invoke(&self, workflow_id: &str, payload: Payload) -> Result<RunResult, InvokeError> {
        let compiled = self
            .registry
            .get(workflow_id)
            .ok_or_else(|| InvokeError::UnknownWorkflow(workflow_id.to_string()))?;

        tracing::info!(workflow = %workflow_id, "▶️ Manual invocation");
        self.spawn_run(compiled, payload)
            .await
            .map_err(|e| InvokeError::RunAborted {
                workflow: workflow_id.to_string(),
                reason: e.to_string(),
            })
    }

    /// Wait until every started run has finished and been reported
    pub async fn drain(&self) {
        self.runs.close();
        self.runs.wait().await;
        self.runs.reopen();
    }

    fn spawn_run(&self, compiled: Arc<CompiledWorkflow>, payload: Payload) -> JoinHandle<RunResult> {
        let engine = Arc::clone(self.registry.engine());
        let sink = Arc::clone(&self.sink);
        let token = self.shutdown.child_token();

        self.runs.spawn(async move {
            let result = engine.execute(&compiled, payload, token).await;
            report(sink.as_ref(), &result).await;
            result
        })
    }

    async fn run_all(&self, matched: Vec<Arc<CompiledWorkflow>>, payload: Payload) -> Dispatch {
        let handles: Vec<_> = matched
            .into_iter()
            .map(|compiled| {
                let id = compiled.id().to_string();
                (id, self.spawn_run(compiled, payload.clone()))
            })
            .collect();

        let mut dispatch = Dispatch {
            matched: handles.len(),
            runs: Vec::with_capacity(handles.len()),
        };
        for (workflow_id, handle) in handles {
            match handle.await {
                Ok(result) => dispatch.runs.push(result),
                Err(e) => tracing::error!(workflow = %workflow_id, "💥 Run task failed to complete: {}", e),
            }
        }
        dispatch
    }
}

async fn report(sink: &dyn RunSink, result: &RunResult) {
    if let Err(e) = sink.record(result).await {
        tracing::error!(
            workflow = %result.workflow_id,
            run_id = %result.run_id,
            "❌ Failed to record run result: {}",
            e
        );
    }
}
