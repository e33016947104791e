//! Periodic purge of expired job execution records.
//!
//! [`RetentionScheduler`] sweeps the job log once per period. The first
//! sweep happens one full period after start. A sweep in progress always
//! completes; cancellation is observed between ticks and takes precedence
//! over a tick that came due during a long sweep.

use std::time::Duration;

use jobwatch_db::repositories::JobLogStore;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

pub struct RetentionScheduler {
    store: JobLogStore,
    period: Duration,
    expiration: Duration,
}

impl RetentionScheduler {
    /// Sweep records older than `expiration` every `period`.
    pub fn new(store: JobLogStore, period: Duration, expiration: Duration) -> Self {
        Self {
            store,
            period,
            expiration,
        }
    }

    /// Run until `cancel` is triggered.
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!(
            period_secs = self.period.as_secs(),
            expiration_secs = self.expiration.as_secs(),
            "Log retention job started"
        );

        let mut interval = tokio::time::interval_at(Instant::now() + self.period, self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    tracing::info!("Log retention job stopping");
                    break;
                }
                _ = interval.tick() => self.sweep_once().await,
            }
        }
    }

    async fn sweep_once(&self) {
        match self.store.sweep(self.expiration).await {
            Ok(deleted) if deleted > 0 => {
                tracing::info!(deleted, "Log retention: purged expired records");
            }
            Ok(_) => tracing::debug!("Log retention: nothing to purge"),
            Err(e) => tracing::error!(error = %e, "Log retention: sweep failed"),
        }
    }
}
