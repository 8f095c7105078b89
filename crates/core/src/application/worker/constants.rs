// Worker pool constants (ADR: No magic values)
use std::time::Duration;

/// How long a worker holding a partial batch waits for one more item (100ms)
pub const BATCH_LINGER: Duration = Duration::from_millis(100);

/// Buffer fill ratio that counts as saturated: at least 9/10 of capacity
pub const SATURATION_NUMERATOR: usize = 9;
pub const SATURATION_DENOMINATOR: usize = 10;

/// Saturation monitor sampling bounds (tick = boost_timeout / 4, clamped)
pub const MONITOR_TICK_MIN: Duration = Duration::from_millis(10);
pub const MONITOR_TICK_MAX: Duration = Duration::from_secs(1);

/// Re-check interval while a flush waits for the pool to drain (100ms)
pub const FLUSH_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Read loop backoff after an empty or failed store pop
pub const READ_BACKOFF_INITIAL: Duration = Duration::from_millis(100);
pub const READ_BACKOFF_MAX: Duration = Duration::from_secs(3);
pub const READ_BACKOFF_FACTOR: f64 = 1.5;

/// Pause between construction attempts of a wrapped queue (100ms)
pub const WRAP_RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Worker pool of the backlog drainer inside a persistable queue
pub const BACKLOG_WORKERS: usize = 1;
pub const BACKLOG_MAX_WORKERS: usize = 6;
pub const BACKLOG_BOOST_WORKERS: usize = 5;
pub const BACKLOG_BOOST_TIMEOUT: Duration = Duration::from_secs(5 * 60);
pub const BACKLOG_BLOCK_TIMEOUT: Duration = Duration::from_secs(1);
