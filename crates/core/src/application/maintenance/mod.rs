// Maintenance Service
// Periodic retention housekeeping of finished jobs

use crate::application::worker::ShutdownToken;
use crate::error::Result;
use crate::port::{Maintenance, RetentionPolicy, RetentionReport, TimeProvider};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{error, info};

/// Default period between retention passes (10 minutes)
pub const DEFAULT_RETENTION_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Maintenance scheduler
///
/// Applies the retention policy in the background. Nothing depends on it
/// having run, so failures are only logged.
pub struct MaintenanceScheduler {
    maintenance: Arc<dyn Maintenance>,
    time_provider: Arc<dyn TimeProvider>,
    policy: RetentionPolicy,
    every: Duration,
}

impl MaintenanceScheduler {
    /// Create a new maintenance scheduler
    ///
    /// # Arguments
    /// * `maintenance` - Store implementing retention
    /// * `time_provider` - Clock used for age cutoffs
    /// * `policy` - What to keep
    /// * `every` - How often to run
    pub fn new(
        maintenance: Arc<dyn Maintenance>,
        time_provider: Arc<dyn TimeProvider>,
        policy: RetentionPolicy,
        every: Duration,
    ) -> Self {
        Self {
            maintenance,
            time_provider,
            policy,
            every,
        }
    }

    /// Run maintenance loop until shutdown (spawn it)
    pub async fn run(self, mut shutdown: ShutdownToken) {
        info!(
            interval_secs = self.every.as_secs(),
            completed_max_count = ?self.policy.completed_max_count,
            failed_max_count = ?self.policy.failed_max_count,
            "Maintenance scheduler started"
        );

        let mut tick = interval(self.every);

        loop {
            tokio::select! {
                _ = tick.tick() => {},
                _ = shutdown.wait() => break,
            }

            if let Err(e) = self.run_now().await {
                error!(error = %e, "Scheduled maintenance failed");
            }
        }

        info!("Maintenance scheduler stopped");
    }

    /// Run one retention pass immediately
    pub async fn run_now(&self) -> Result<RetentionReport> {
        let now = self.time_provider.now_millis();
        self.maintenance.apply_retention(&self.policy, now).await
    }
}
