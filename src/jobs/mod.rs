use crate::metrics;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{interval, Duration};
use tracing::{error, info};

pub mod tasks;

/// Job scheduler for background tasks
pub struct JobScheduler {
    context: Arc<crate::context::AppContext>,
}

impl JobScheduler {
    pub fn new(context: Arc<crate::context::AppContext>) -> Self {
        Self { context }
    }

    /// Start all background jobs
    pub fn start(self: Arc<Self>) {
        info!("Starting background job scheduler");

        tokio::spawn(Self::trash_purge_job(Arc::clone(&self)));
        tokio::spawn(Self::tombstone_prune_job(Arc::clone(&self)));
        tokio::spawn(Self::staging_cleanup_job(Arc::clone(&self)));
        tokio::spawn(Self::health_check_job(Arc::clone(&self)));

        info!("Background jobs started");
    }

    /// Hard-delete trashed assets past retention (runs hourly)
    async fn trash_purge_job(scheduler: Arc<Self>) {
        let mut interval = interval(Duration::from_secs(3600));

        loop {
            interval.tick().await;
            if let Some(count) = run("purge_trash", tasks::purge_trash(&scheduler.context)).await {
                if count > 0 {
                    info!("Purged {} trashed assets", count);
                }
            }
        }
    }

    /// Drop tombstones no checkpoint can still need (runs every 6 hours)
    async fn tombstone_prune_job(scheduler: Arc<Self>) {
        let mut interval = interval(Duration::from_secs(21600));

        loop {
            interval.tick().await;
            if let Some(count) = run("prune_tombstones", tasks::prune_tombstones(&scheduler.context)).await {
                if count > 0 {
                    info!("Pruned {} tombstones", count);
                }
            }
        }
    }

    /// Remove uploads abandoned mid-stream (runs every 6 hours)
    async fn staging_cleanup_job(scheduler: Arc<Self>) {
        let mut interval = interval(Duration::from_secs(21600));

        loop {
            interval.tick().await;
            if let Some(count) = run("clean_staging", tasks::clean_staging(&scheduler.context)).await {
                if count > 0 {
                    info!("Cleaned up {} stale staged uploads", count);
                }
            }
        }
    }

    /// Health check job (runs every 5 minutes)
    async fn health_check_job(scheduler: Arc<Self>) {
        let mut interval = interval(Duration::from_secs(300));

        loop {
            interval.tick().await;
            if let Err(e) = tasks::health_check(&scheduler.context).await {
                error!("Health check failed: {}", e);
            }
        }
    }
}

/// Run one job iteration, recording its outcome
async fn run<F>(job_type: &str, task: F) -> Option<u64>
where
    F: Future<Output = crate::error::MediaResult<u64>>,
{
    let start = Instant::now();
    let result = task.await;
    let duration = start.elapsed().as_secs_f64();

    match result {
        Ok(count) => {
            metrics::record_background_job(job_type, "success", duration);
            Some(count)
        }
        Err(e) => {
            metrics::record_background_job(job_type, "failure", duration);
            error!("Background job {} failed: {}", job_type, e);
            None
        }
    }
}
