/// Server setup and initialization
///
/// Wires together the registry, run history, dispatcher, scheduler clock and
/// HTTP routes. Hosts that define workflows in Rust build their own
/// [`WorkflowRegistry`] and call [`start_server_with`]; the plain binary loads
/// JSON manifests from the configured directory.

use crate::{
    api::{create_event_routes, create_workflow_routes, AppState},
    config::Config,
    runtime::{dispatcher::Dispatcher, engine::ExecutionEngine, scheduler::CronSchedulerService},
    sink::{FanoutSink, RunSink, SqliteRunSink, TracingSink},
    workflow::{
        manifest::{self, HandlerCatalog},
        registry::WorkflowRegistry,
    },
};
use anyhow::Result;
use axum::{routing::get, Router};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Fully wired application
pub struct Application {
    pub router: Router,
    pub dispatcher: Dispatcher,
    pub scheduler: Option<Arc<CronSchedulerService>>,
    pub shutdown: CancellationToken,
}

/// Build the HTTP router over an application state
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health_check))
        .merge(create_event_routes())
        .merge(create_workflow_routes())
        .with_state(state)
}

/// Create an empty registry configured from `config`
pub fn new_registry(config: &Config) -> WorkflowRegistry {
    let engine = Arc::new(ExecutionEngine::new(config.engine_config()));
    WorkflowRegistry::new(engine).strict(config.engine.strict_reachability)
}

/// Register every manifest in the configured workflows directory
///
/// A missing directory is not an error; any invalid manifest is.
pub fn load_manifests(config: &Config, catalog: &HandlerCatalog, registry: &mut WorkflowRegistry) -> Result<usize> {
    let dir = &config.storage.workflows_dir;
    if !dir.is_dir() {
        tracing::warn!("⚠️ Workflows directory not found, skipping manifests: {}", dir.display());
        return Ok(0);
    }

    tracing::info!("📥 Loading workflow manifests from {}", dir.display());
    let definitions = manifest::load_dir(dir, catalog)?;
    let count = definitions.len();
    for definition in definitions {
        registry.register(definition)?;
    }
    Ok(count)
}

/// Create the application around an already populated registry
///
/// The scheduler clock is created but not started; see [`Application::start_scheduler`].
pub async fn create_app(config: Config, registry: WorkflowRegistry) -> Result<Application> {
    tracing::info!("🗄️ Initializing run history in {}", config.storage.data_dir.display());
    let history = Arc::new(SqliteRunSink::open(&config.storage.data_dir).await?);

    let sink: Arc<dyn RunSink> = Arc::new(
        FanoutSink::new()
            .with(Arc::new(TracingSink))
            .with(history.clone()),
    );

    tracing::info!("📊 Workflow registry holds {} workflows", registry.len());
    let shutdown = CancellationToken::new();
    let dispatcher = Dispatcher::new(Arc::new(registry), sink, shutdown.clone());

    let scheduler = if config.scheduler.enabled {
        tracing::info!("⏰ Initializing scheduler clock");
        Some(Arc::new(
            CronSchedulerService::new(dispatcher.clone(), config.scheduler.tick_schedule.clone())
                .await
                .map_err(|e| anyhow::anyhow!("Failed to initialize scheduler clock: {}", e))?,
        ))
    } else {
        tracing::info!("⏸️ Scheduler clock disabled");
        None
    };

    let router = create_router(AppState {
        dispatcher: dispatcher.clone(),
        history: Some(history),
    });

    tracing::info!("✅ Application initialized successfully");
    Ok(Application {
        router,
        dispatcher,
        scheduler,
        shutdown,
    })
}

impl Application {
    pub async fn start_scheduler(&self) -> Result<()> {
        if let Some(scheduler) = &self.scheduler {
            scheduler.start().await?;
        }
        Ok(())
    }

    /// Cancel in-flight runs, stop the clock and wait for every run to be reported
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown.cancel();
        if let Some(scheduler) = &self.scheduler {
            scheduler.stop().await?;
        }
        self.dispatcher.drain().await;
        Ok(())
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .try_init();
}

/// Start the HTTP server with manifest-defined workflows
pub async fn start_server(config: Config) -> Result<()> {
    init_tracing();

    let mut registry = new_registry(&config);
    let loaded = load_manifests(&config, &HandlerCatalog::with_builtins(), &mut registry)?;
    tracing::info!("📋 Loaded {} workflow manifests", loaded);

    start_server_with(config, registry).await
}

/// Start the HTTP server around a registry built by the host
pub async fn start_server_with(config: Config, registry: WorkflowRegistry) -> Result<()> {
    init_tracing();
    tracing::info!("Starting flowstate server...");

    let app = create_app(config.clone(), registry).await?;
    app.start_scheduler().await?;

    let bind_addr = config.bind_addr();
    let listener = TcpListener::bind(&bind_addr).await?;
    tracing::info!("Server listening on http://{}", bind_addr);

    axum::serve(listener, app.router.clone().into_make_service())
        .with_graceful_shutdown(cancel_on_signal(tokio::signal::ctrl_c(), app.shutdown.clone()))
        .await?;

    app.shutdown().await?;
    tracing::info!("👋 Server stopped");
    Ok(())
}

/// Resolve once `signal` fires, cancelling the host token first
///
/// In-flight runs stop at their next state boundary instead of holding up the
/// connection drain. If the signal cannot be installed, waits for the token
/// to be cancelled some other way.
async fn cancel_on_signal<F>(signal: F, shutdown: CancellationToken)
where
    F: Future<Output = std::io::Result<()>>,
{
    if let Err(e) = signal.await {
        tracing::error!("❌ Failed to listen for shutdown signal: {}", e);
        shutdown.cancelled().await;
    }
    tracing::info!("🛑 Shutdown signal received, cancelling in-flight runs");
    shutdown.cancel();
}

async fn health_check() -> &'static str {
    "ok"
}
