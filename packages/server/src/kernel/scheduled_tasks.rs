//! Scheduled background tasks using tokio-cron-scheduler.
//!
//! Periodic maintenance that runs independently of request handling:
//! - Presence staleness sweep (every `PRESENCE_SWEEP_INTERVAL_SECS`)
//! - Stale dispatch sweep (only when `TASK_DISPATCH_TIMEOUT_SECS` is set)
//! - Expired location state and empty rooms
//!
//! ```text
//! Scheduler (every 30s)
//!     │
//!     └─► sweep_presence()
//!             └─► For each silent user → status:changed (offline)
//! ```

use anyhow::Result;
use std::time::{Duration, Instant};
use tokio_cron_scheduler::{Job, JobScheduler};

use crate::domains::presence::actions::sweep_presence;
use crate::domains::tasks::actions::sweep_stale_tasks;
use crate::kernel::ServerDeps;

const HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(60);

/// Start all scheduled tasks
pub async fn start_scheduler(deps: ServerDeps) -> Result<JobScheduler> {
    let scheduler = JobScheduler::new().await?;

    let presence_deps = deps.clone();
    let presence_job = Job::new_repeated_async(
        deps.config.presence_sweep_interval,
        move |_uuid, _lock| {
            let deps = presence_deps.clone();
            Box::pin(async move {
                sweep_presence(&deps).await;
            })
        },
    )?;
    scheduler.add(presence_job).await?;

    if let Some(timeout) = deps.config.task_dispatch_timeout {
        // Check at least twice per timeout window
        let interval = (timeout / 2).clamp(Duration::from_secs(1), Duration::from_secs(60));
        let stale_deps = deps.clone();
        let stale_job = Job::new_repeated_async(interval, move |_uuid, _lock| {
            let deps = stale_deps.clone();
            Box::pin(async move {
                if let Err(e) = sweep_stale_tasks(&deps).await {
                    tracing::error!(error = %e, "Stale dispatch sweep failed");
                }
            })
        })?;
        scheduler.add(stale_job).await?;
    }

    let housekeeping_deps = deps.clone();
    let housekeeping_job = Job::new_repeated_async(HOUSEKEEPING_INTERVAL, move |_uuid, _lock| {
        let deps = housekeeping_deps.clone();
        Box::pin(async move {
            run_housekeeping(&deps).await;
        })
    })?;
    scheduler.add(housekeeping_job).await?;

    scheduler.start().await?;

    tracing::info!(
        presence_sweep_secs = deps.config.presence_sweep_interval.as_secs(),
        stale_sweep = deps.config.task_dispatch_timeout.is_some(),
        "Scheduled tasks started"
    );
    Ok(scheduler)
}

/// Drop expired location samples and rooms nobody listens to.
async fn run_housekeeping(deps: &ServerDeps) {
    let purged = deps.location.purge(Instant::now());
    let rooms = deps.stream_hub.cleanup().await;
    if purged > 0 || rooms > 0 {
        tracing::debug!(purged, rooms, "Housekeeping complete");
    }
}
