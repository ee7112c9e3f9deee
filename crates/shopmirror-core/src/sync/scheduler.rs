//! Periodic non-forced pull sweeps

use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::pull::PullSyncEngine;

/// Default time between sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Runs `sync_all(false)` on a fixed interval, starting immediately.
pub struct SyncScheduler;

impl SyncScheduler {
    /// Spawn the sweep loop; must be called from within a tokio runtime.
    pub fn spawn(engine: PullSyncEngine, interval: Duration) -> SchedulerHandle {
        let (shutdown, mut stop) = oneshot::channel::<()>();
        let period = interval.max(Duration::from_millis(1));

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = &mut stop => break,
                    _ = ticker.tick() => {
                        let report = engine.sync_all(false).await;
                        tracing::debug!(
                            "Sweep finished: {} synced, {} throttled, {} empty, {} failed",
                            report.synced.len(),
                            report.throttled.len(),
                            report.empty.len(),
                            report.failed.len()
                        );
                    }
                }
            }
            tracing::debug!("Sync scheduler stopped");
        });

        SchedulerHandle {
            shutdown: Some(shutdown),
            task: Some(task),
        }
    }
}

/// Owner of a running sweep loop. Dropping it aborts the loop.
pub struct SchedulerHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl SchedulerHandle {
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stop the loop and wait for an in-flight sweep to settle.
    pub async fn shutdown(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(error) = task.await {
                if !error.is_cancelled() {
                    tracing::error!("Sync scheduler task failed: {error}");
                }
            }
        }
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
