//! Worker-count resolution and scheduler tuning constants.
//!
//! The worker count is resolved in this order (highest priority first):
//!
//! 1. **Environment**: a non-zero decimal in [`ENV_WORKERS`]
//! 2. **Caller**: the count passed to [`Scheduler::with_workers`](super::Scheduler::with_workers)
//! 3. **Hardware**: [`default_worker_count`] for [`Scheduler::new`](super::Scheduler::new)
//!
//! A resolved count of zero is a construction error; an unparseable
//! environment value is reported rather than silently ignored.

use crate::error::{Error, ErrorKind, Result};
use std::num::NonZeroUsize;
use std::time::Duration;

/// Environment variable overriding the worker count.
pub const ENV_WORKERS: &str = "DT_WORKERS";

/// How long a worker blocks on the queue condition variable before waking
/// to re-check for teardown and give status emission a chance.
pub const DEFAULT_WAIT_INTERVAL: Duration = Duration::from_millis(10);

/// Minimum spacing between two periodic status emissions.
pub const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_secs(5);

/// Spacing of the slow-`wait_all` warning (twice the update interval).
pub(crate) const WAIT_ALL_WARN_INTERVAL: Duration = Duration::from_secs(10);

/// Minimum pool size for `wait_all`; nesting is unsafe on smaller pools.
pub(crate) const WAIT_ALL_MIN_WORKERS: usize = 4;

/// Worker thread stack size. Many scheduled workloads are deep-recursive.
pub(crate) const WORKER_STACK_SIZE: usize = 16 << 20;

/// The number of workers used when the caller does not specify one.
#[must_use]
pub fn default_worker_count() -> usize {
    std::thread::available_parallelism().map_or(0, NonZeroUsize::get)
}

/// Applies the environment override and validates the final count.
pub(crate) fn resolve_worker_count(requested: usize) -> Result<usize> {
    if let Ok(raw) = std::env::var(ENV_WORKERS) {
        let parsed = raw.trim().parse::<usize>().map_err(|err| {
            Error::new(ErrorKind::InvalidEnv)
                .with_context(format!("{ENV_WORKERS}={raw:?}: {err}"))
        })?;
        if parsed != 0 {
            return Ok(parsed);
        }
    }
    if requested == 0 {
        return Err(Error::new(ErrorKind::NoWorkers)
            .with_context(format!("requested {requested} worker threads")));
    }
    Ok(requested)
}
