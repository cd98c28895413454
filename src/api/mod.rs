/// HTTP API Layer
///
/// - Trigger ingestion (bus events, external ticks)
/// - Workflow inspection and manual invocation
/// - Run history lookups

// Event and tick ingestion endpoints
pub mod events;

// Workflow and run endpoints
pub mod workflows;

pub use events::create_event_routes;
pub use workflows::{create_workflow_routes, AppState};
