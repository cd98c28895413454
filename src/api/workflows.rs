/// Workflow inspection, manual invocation and run history endpoints

use crate::{
    error::InvokeError,
    runtime::{dispatcher::Dispatcher, engine::RunResult},
    sink::{sqlite::RunSummary, SqliteRunSink},
    workflow::{registry::CompiledWorkflow, result::Payload, trigger::Trigger},
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

/// Application state shared by every route
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Dispatcher,
    /// Run history; run lookups answer 503 without it
    pub history: Option<Arc<SqliteRunSink>>,
}

/// Listing view of a registered workflow
#[derive(Debug, Serialize)]
pub struct WorkflowSummary {
    pub id: String,
    pub trigger: Value,
    pub start_state: String,
    pub states: Vec<StateSummary>,
    pub unreachable_states: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct StateSummary {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub next: Vec<String>,
}

impl From<&CompiledWorkflow> for WorkflowSummary {
    fn from(compiled: &CompiledWorkflow) -> Self {
        let definition = &compiled.definition;
        let trigger = match &definition.trigger {
            Trigger::Event(event) => json!({
                "type": "event",
                "bus": event.bus,
                "sources": event.sources,
                "detail_types": event.detail_types,
            }),
            Trigger::Schedule(schedule) => json!({
                "type": "schedule",
                "cron": schedule.expression(),
                "timezone": schedule.timezone().name(),
            }),
            Trigger::Manual => json!({ "type": "manual" }),
        };

        Self {
            id: definition.id.clone(),
            trigger,
            start_state: definition.start_state.clone(),
            states: definition
                .states
                .iter()
                .map(|(name, node)| StateSummary {
                    name: name.clone(),
                    kind: node.kind(),
                    next: node.successors().into_iter().map(String::from).collect(),
                })
                .collect(),
            unreachable_states: compiled.report.unreachable.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RunsQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    20
}

pub fn create_workflow_routes() -> Router<AppState> {
    Router::new()
        .route("/api/workflows", get(list_workflows))
        .route("/api/workflows/{id}", get(get_workflow))
        .route("/api/workflows/{id}/invoke", post(invoke_workflow))
        .route("/api/workflows/{id}/runs", get(list_runs))
        .route("/api/runs/{run_id}", get(get_run))
}

/// GET /api/workflows
async fn list_workflows(State(state): State<AppState>) -> Json<Value> {
    let workflows: Vec<WorkflowSummary> = state
        .dispatcher
        .registry()
        .list()
        .iter()
        .map(|compiled| WorkflowSummary::from(compiled.as_ref()))
        .collect();
    Json(json!({ "workflows": workflows }))
}

/// GET /api/workflows/{id}
async fn get_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<WorkflowSummary>, StatusCode> {
    state
        .dispatcher
        .registry()
        .get(&id)
        .map(|compiled| Json(WorkflowSummary::from(compiled.as_ref())))
        .ok_or(StatusCode::NOT_FOUND)
}

/// POST /api/workflows/{id}/invoke
///
/// Body: JSON object used as the initial payload. Run failures are still a
/// 200: the failure is part of the returned run result.
async fn invoke_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<Payload>,
) -> Result<Json<RunResult>, StatusCode> {
    match state.dispatcher.invoke(&id, payload).await {
        Ok(result) => Ok(Json(result)),
        Err(InvokeError::UnknownWorkflow(_)) => {
            tracing::warn!("❌ Invocation of unknown workflow: {}", id);
            Err(StatusCode::NOT_FOUND)
        }
        Err(e @ InvokeError::RunAborted { .. }) => {
            tracing::error!("💥 {}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// GET /api/workflows/{id}/runs?limit=N
async fn list_runs(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<RunsQuery>,
) -> Result<Json<Vec<RunSummary>>, StatusCode> {
    let history = state.history.as_ref().ok_or(StatusCode::SERVICE_UNAVAILABLE)?;
    if state.dispatcher.registry().get(&id).is_none() {
        return Err(StatusCode::NOT_FOUND);
    }

    match history.list_runs(&id, query.limit.clamp(1, 500)).await {
        Ok(runs) => Ok(Json(runs)),
        Err(e) => {
            tracing::error!("Failed to list runs for {}: {}", id, e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// GET /api/runs/{run_id}
async fn get_run(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> Result<Json<RunResult>, StatusCode> {
    let history = state.history.as_ref().ok_or(StatusCode::SERVICE_UNAVAILABLE)?;

    match history.get_run(run_id).await {
        Ok(Some(result)) => Ok(Json(result)),
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            tracing::error!("Failed to load run {}: {}", run_id, e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}
