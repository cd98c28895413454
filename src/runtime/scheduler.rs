/// Background scheduler clock
///
/// Drives schedule triggers with tokio-cron-scheduler. A single job fires on
/// the configured cadence (every minute by default) and hands the current
/// time to [`Dispatcher::dispatch_tick`]; matching individual workflow
/// schedules is the registry's job, not the clock's.

use crate::runtime::dispatcher::Dispatcher;
use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_cron_scheduler::{Job, JobScheduler};
use uuid::Uuid;

pub const DEFAULT_TICK_SCHEDULE: &str = "0 * * * * *";

pub struct CronSchedulerService {
    scheduler: Arc<RwLock<JobScheduler>>,
    dispatcher: Dispatcher,
    tick_schedule: String,
    tick_job: RwLock<Option<Uuid>>,
}

impl CronSchedulerService {
    pub async fn new(dispatcher: Dispatcher, tick_schedule: impl Into<String>) -> Result<Self> {
        let scheduler = JobScheduler::new().await?;

        Ok(Self {
            scheduler: Arc::new(RwLock::new(scheduler)),
            dispatcher,
            tick_schedule: tick_schedule.into(),
            tick_job: RwLock::new(None),
        })
    }

    /// Register the tick job and start the clock
    pub async fn start(&self) -> Result<()> {
        tracing::info!("⏰ Starting scheduler clock ({})", self.tick_schedule);

        let dispatcher = self.dispatcher.clone();
        let job = Job::new_async(self.tick_schedule.as_str(), move |_uuid, _l| {
            let dispatcher = dispatcher.clone();
            Box::pin(async move {
                if dispatcher.shutdown_token().is_cancelled() {
                    tracing::debug!("⏭️ Skipping tick during shutdown");
                    return;
                }
                let now = Utc::now();
                tracing::debug!(%now, "🔔 Scheduler tick");
                let dispatch = dispatcher.dispatch_tick(now).await;
                let failed = dispatch.runs.iter().filter(|r| !r.is_success()).count();
                if dispatch.matched > 0 {
                    tracing::info!("✅ Tick finished: {} runs, {} failed", dispatch.runs.len(), failed);
                }
            })
        })?;

        let job_uuid = {
            let scheduler = self.scheduler.write().await;
            let uuid = scheduler.add(job).await?;
            scheduler.start().await?;
            uuid
        };
        *self.tick_job.write().await = Some(job_uuid);

        let schedules = self
            .dispatcher
            .registry()
            .list()
            .iter()
            .filter(|compiled| compiled.definition.trigger.kind() == "schedule")
            .count();
        tracing::info!("📊 Scheduler clock started with {} scheduled workflows", schedules);
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        tracing::info!("⏹️ Stopping scheduler clock");

        if let Some(job_uuid) = self.tick_job.write().await.take() {
            let scheduler = self.scheduler.read().await;
            if let Err(e) = scheduler.remove(&job_uuid).await {
                tracing::warn!("⚠️ Failed to remove tick job: {}", e);
            }
        }

        {
            let mut scheduler = self.scheduler.write().await;
            scheduler.shutdown().await?;
        }

        tracing::info!("✅ Scheduler clock stopped");
        Ok(())
    }
}
