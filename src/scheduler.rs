use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

use crate::delivery::Relay;

/// Wrapper around tokio-cron-scheduler for running relay passes on a cron
pub struct Scheduler {
    inner: JobScheduler,
}

impl Scheduler {
    /// Create a new scheduler
    pub async fn new() -> Result<Self> {
        let inner = JobScheduler::new()
            .await
            .context("Failed to create job scheduler")?;
        Ok(Self { inner })
    }

    /// Add a recurring cron job
    pub async fn add_cron_job<F>(&self, cron_expr: &str, name: &str, task: F) -> Result<()>
    where
        F: Fn() -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>
            + Send
            + Sync
            + 'static,
    {
        let job = build_job(cron_expr, name, task)?;

        self.inner
            .add(job)
            .await
            .with_context(|| format!("Failed to add job: {}", name))?;

        info!("Scheduled task '{}' with cron: {}", name, cron_expr);
        Ok(())
    }

    /// Run one relay pass per cron tick. A tick that fires while the previous
    /// pass is still running is skipped.
    pub async fn add_relay_job(&self, cron_expr: &str, relay: Arc<Relay>) -> Result<()> {
        let running = Arc::new(Mutex::new(()));

        self.add_cron_job(cron_expr, "relay", move || {
            let relay = relay.clone();
            let running = running.clone();
            Box::pin(async move {
                let Ok(_guard) = running.try_lock() else {
                    warn!("Previous relay pass still running, skipping this tick");
                    return;
                };
                match relay.run_once().await {
                    Ok(outcome) => info!("Relay pass finished: {:?}", outcome),
                    Err(e) => error!("Relay pass failed: {:#}", e),
                }
            })
        })
        .await
    }

    /// Start the scheduler
    pub async fn start(&self) -> Result<()> {
        self.inner
            .start()
            .await
            .context("Failed to start scheduler")?;
        info!("Scheduler started");
        Ok(())
    }

    /// Shutdown the scheduler
    pub async fn shutdown(&mut self) -> Result<()> {
        self.inner
            .shutdown()
            .await
            .context("Failed to shutdown scheduler")?;
        info!("Scheduler stopped");
        Ok(())
    }
}

fn build_job<F>(cron_expr: &str, name: &str, task: F) -> Result<Job>
where
    F: Fn() -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>
        + Send
        + Sync
        + 'static,
{
    let job_name = name.to_string();
    Job::new_async(cron_expr, move |_uuid, _lock| {
        let name = job_name.clone();
        let fut = task();
        Box::pin(async move {
            info!("Running scheduled task: {}", name);
            fut.await;
        })
    })
    .with_context(|| format!("Failed to create cron job '{}' with cron: {}", name, cron_expr))
}
