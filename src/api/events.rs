/// Trigger ingestion endpoints
///
/// Bus deliveries and external clock ticks enter here. Every matched workflow
/// runs to completion before the response is sent, so the caller sees the
/// run results (or an empty list when nothing matched). A caller that hangs
/// up early only stops waiting; its runs still finish and are recorded.

use crate::api::workflows::AppState;
use crate::runtime::dispatcher::Dispatch;
use crate::workflow::trigger::InboundEvent;
use axum::{extract::State, response::Json, routing::post, Router};
use chrono::{DateTime, Utc};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct TickRequest {
    pub timestamp: DateTime<Utc>,
}

pub fn create_event_routes() -> Router<AppState> {
    Router::new()
        .route("/events", post(receive_event))
        .route("/ticks", post(receive_tick))
}

/// POST /events
/// Body: { "bus": "...", "source": "...", "detail_type": "...", "body": { ... } }
async fn receive_event(
    State(state): State<AppState>,
    Json(event): Json<InboundEvent>,
) -> Json<Dispatch> {
    tracing::debug!("📥 Event delivery: {}/{}/{}", event.bus, event.source, event.detail_type);
    Json(state.dispatcher.dispatch_event(event).await)
}

/// POST /ticks
/// Body: { "timestamp": "2024-01-01T02:00:00Z" }
async fn receive_tick(
    State(state): State<AppState>,
    Json(tick): Json<TickRequest>,
) -> Json<Dispatch> {
    tracing::debug!("📥 External tick: {}", tick.timestamp);
    Json(state.dispatcher.dispatch_tick(tick.timestamp).await)
}
