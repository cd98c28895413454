/// flowstate server
///
/// Loads JSON workflow manifests, starts the scheduler clock and serves:
/// - Trigger ingestion at /events and /ticks
/// - Workflow listing and manual invocation at /api/workflows/*
/// - Run history at /api/runs/{run_id}
/// - Health check at /healthz

use flowstate::{config::Config, server::start_server};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::default();

    start_server(config).await?;

    Ok(())
}
