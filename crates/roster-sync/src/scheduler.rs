use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{info, warn};

use crate::config::SyncConfig;
use crate::orchestrator::{RunOptions, SyncOrchestrator};

/// A scheduler with one job that runs a full sync on `cron`. A tick that
/// finds the lock held logs and waits for the next one.
pub async fn build_scheduler(orchestrator: Arc<SyncOrchestrator>, cron: &str) -> Result<JobScheduler> {
    let sched = JobScheduler::new().await.context("creating scheduler")?;
    let job = Job::new_async(cron, move |_uuid, _l| {
        let orchestrator = orchestrator.clone();
        Box::pin(async move {
            info!("scheduled sync triggered");
            match orchestrator.run(RunOptions::default()).await {
                Ok(report) => info!(
                    run_id = %report.run_id,
                    success = report.success.len(),
                    failed = report.failed.len(),
                    "scheduled sync finished"
                ),
                Err(err) => warn!(error = %err, kind = %err.kind(), "scheduled sync did not run"),
            }
        })
    })
    .with_context(|| format!("creating scheduler job for cron {cron}"))?;
    sched.add(job).await.context("adding scheduler job")?;
    Ok(sched)
}

pub async fn maybe_build_scheduler(
    config: &SyncConfig,
    orchestrator: Arc<SyncOrchestrator>,
) -> Result<Option<JobScheduler>> {
    if !config.scheduler_enabled {
        return Ok(None);
    }
    let sched = build_scheduler(orchestrator, &config.sync_cron).await?;
    info!(cron = %config.sync_cron, "sync scheduler configured");
    Ok(Some(sched))
}
