// Worker constants (no magic values)
use std::time::Duration;

/// Sleep between polls when nothing is claimable (100ms)
pub const IDLE_SLEEP_DURATION: Duration = Duration::from_millis(100);

/// Sleep after a store error before polling again (1s)
pub const ERROR_RECOVERY_SLEEP_DURATION: Duration = Duration::from_secs(1);

/// Jobs processed in parallel by one worker
pub const DEFAULT_CONCURRENCY: usize = 5;

/// Hard limit for a single attempt (5 minutes)
pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// How often a running attempt refreshes `heartbeat_at`
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// How long shutdown waits for in-flight jobs
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Active job without a heartbeat for this long counts as stalled (30s)
pub const DEFAULT_STALL_THRESHOLD_MS: i64 = 30_000;

/// Stall recoveries before a job is failed for good
pub const DEFAULT_MAX_STALLED_COUNT: i32 = 3;

/// Period of the stalled-job sweep
pub const DEFAULT_STALL_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Error message of a job failed by the stall limit
pub const STALLED_LIMIT_MESSAGE: &str = "job stalled more than allowable limit";
