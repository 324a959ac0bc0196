//! Retention sweeper and its cancellable task handle.

use std::time::Duration;

use rand::Rng;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
    config::RetentionConfig,
    models::Day,
    services::{BandwidthService, ServiceResult, SweepPolicy, SweepReport},
};

/// Periodically purges samples older than the retention horizon.
#[derive(Clone)]
pub struct RetentionSweeper {
    service: BandwidthService,
    config: RetentionConfig,
}

impl RetentionSweeper {
    pub fn new(service: BandwidthService, config: RetentionConfig) -> Self {
        Self { service, config }
    }

    /// Run one sweep against today's local date.
    pub async fn sweep(&self) -> ServiceResult<SweepReport> {
        self.sweep_as_of(Day::today()).await
    }

    /// Run one sweep as if `today` were the current day.
    pub async fn sweep_as_of(&self, today: Day) -> ServiceResult<SweepReport> {
        self.service
            .sweep(today, SweepPolicy::from(&self.config))
            .await
    }

    /// Random delay before the next sweep, within the configured bounds.
    pub fn next_delay(&self) -> Duration {
        jittered(self.config.min_interval(), self.config.max_interval())
    }

    /// Spawn the sweep loop. Returns `None` when retention is disabled.
    ///
    /// The first sweep runs after the first jittered delay, not immediately.
    pub fn start(self) -> Option<SweeperHandle> {
        if !self.config.enabled {
            tracing::info!("Retention sweeper disabled by configuration");
            return None;
        }

        let dry_run_msg = if self.config.safety.dry_run {
            " (DRY RUN)"
        } else {
            ""
        };
        tracing::info!(
            horizon_days = self.config.horizon_days,
            min_interval_hours = self.config.min_interval_hours,
            max_interval_hours = self.config.max_interval_hours,
            dry_run = self.config.safety.dry_run,
            "Starting retention sweeper{}",
            dry_run_msg
        );

        let token = CancellationToken::new();
        let cancelled = token.clone();
        let task = tokio::spawn(async move {
            loop {
                let delay = self.next_delay();
                tracing::debug!(delay_secs = delay.as_secs(), "Next retention sweep scheduled");

                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }

                // A sweep in progress finishes before cancellation is observed.
                if let Err(e) = self.sweep().await {
                    tracing::error!(error = %e, "Error running retention sweep");
                }
            }
            tracing::info!("Retention sweeper stopped");
        });

        Some(SweeperHandle { token, task })
    }
}

/// Owns a running sweeper. Dropping the handle leaves the task running;
/// call [`SweeperHandle::shutdown`] to stop it.
pub struct SweeperHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Signal the sweeper to stop without waiting for it.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Stop the sweeper and wait for an in-flight sweep to finish.
    pub async fn shutdown(self) {
        self.token.cancel();
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "Retention sweeper task did not exit cleanly");
        }
    }
}

fn jittered(min: Duration, max: Duration) -> Duration {
    if max <= min {
        return min;
    }
    let secs = rand::thread_rng().gen_range(min.as_secs()..=max.as_secs());
    Duration::from_secs(secs)
}
