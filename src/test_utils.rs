//! Shared helpers for unit and integration tests.
//!
//! - Consistent tracing-based logging initialization
//! - An environment lock for tests that mutate process env vars
//! - A serialization lock for tests that drive the global scheduler
//!   (`process` is single-flight per scheduler, and the global instance is
//!   shared by every test in a binary)

use std::sync::{Mutex, MutexGuard, Once, PoisonError};

static INIT_LOGGING: Once = Once::new();
static ENV_LOCK: Mutex<()> = Mutex::new(());
static GLOBAL_SCHEDULER_LOCK: Mutex<()> = Mutex::new(());

/// Initializes test logging at debug level.
///
/// Safe to call multiple times; only the first call installs a subscriber.
pub fn init_test_logging() {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .with_target(true)
            .with_thread_ids(true)
            .with_ansi(false)
            .try_init();
    });
}

/// Acquires the lock guarding process environment mutation.
pub fn env_lock() -> MutexGuard<'static, ()> {
    ENV_LOCK.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Acquires the lock serializing tests that drive the global scheduler.
pub fn global_scheduler_lock() -> MutexGuard<'static, ()> {
    GLOBAL_SCHEDULER_LOCK
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
}
