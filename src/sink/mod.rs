//! Run result sinks
//!
//! Every finished run is emitted exactly once to a [`RunSink`]. A sink failure
//! is logged by the caller and never changes the run's outcome.

pub mod sqlite;

pub use sqlite::SqliteRunSink;

use crate::runtime::engine::RunResult;
use anyhow::Result;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Boxed future returned by sinks
pub type SinkFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// Destination for finished runs
pub trait RunSink: Send + Sync + 'static {
    fn record<'a>(&'a self, result: &'a RunResult) -> SinkFuture<'a>;
}

/// Logs each run as a structured tracing event
#[derive(Debug, Clone, Default)]
pub struct TracingSink;

impl RunSink for TracingSink {
    fn record<'a>(&'a self, result: &'a RunResult) -> SinkFuture<'a> {
        Box::pin(async move {
            let visited = result.visited_states.join(" → ");
            match &result.error {
                None => tracing::info!(
                    workflow = %result.workflow_id,
                    run_id = %result.run_id,
                    status = result.status.as_str(),
                    visited = %visited,
                    "📦 Run recorded"
                ),
                Some(failure) => tracing::info!(
                    workflow = %result.workflow_id,
                    run_id = %result.run_id,
                    status = result.status.as_str(),
                    state = %failure.state,
                    kind = %failure.kind,
                    visited = %visited,
                    "📦 Run recorded"
                ),
            }
            Ok(())
        })
    }
}

/// Forwards every run to each inner sink in order
///
/// All sinks are attempted; the first error is returned after the rest ran.
#[derive(Clone, Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn RunSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn RunSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl RunSink for FanoutSink {
    fn record<'a>(&'a self, result: &'a RunResult) -> SinkFuture<'a> {
        Box::pin(async move {
            let mut first_error = None;
            for sink in &self.sinks {
                if let Err(e) = sink.record(result).await {
                    first_error.get_or_insert(e);
                }
            }
            match first_error {
                Some(e) => Err(e),
                None => Ok(()),
            }
        })
    }
}
