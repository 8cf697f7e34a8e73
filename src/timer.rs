//! Scoped wall-clock timing of named regions.

use std::time::{Duration, Instant};
use tracing::Level;

/// Measures the wall time of a named region and logs it on drop.
///
/// When the thread is unwinding from a panic, the drop message says
/// `failed after` instead of `took`.
pub struct Timer {
    title: String,
    level: Level,
    start: Instant,
    elapsed: Option<Duration>,
    printed: bool,
}

impl Timer {
    /// Starts a timer for `title`, logging at `level`. With `report_start`
    /// the creation itself is logged too.
    #[must_use]
    pub fn new(title: impl Into<String>, level: Level, report_start: bool) -> Self {
        let title = title.into();
        if report_start {
            log_at(level, &format!("timer '{title}' created"));
        }
        Self {
            title,
            level,
            start: Instant::now(),
            elapsed: None,
            printed: false,
        }
    }

    /// Freezes the measured duration; later calls keep the first value.
    pub fn stop(&mut self) -> f64 {
        if self.elapsed.is_none() {
            self.elapsed = Some(self.start.elapsed());
        }
        self.duration()
    }

    /// Seconds measured so far (frozen once [`stop`](Timer::stop) ran).
    #[must_use]
    pub fn duration(&self) -> f64 {
        self.elapsed.unwrap_or_else(|| self.start.elapsed()).as_secs_f64()
    }

    /// Logs the measurement once; later calls are no-ops.
    pub fn print(&mut self) {
        if self.printed {
            return;
        }
        self.printed = true;
        let secs = self.duration();
        let message = if std::thread::panicking() {
            format!("{} failed after {secs:.3} secs", self.title)
        } else {
            format!("{} took {secs:.3} secs", self.title)
        };
        log_at(self.level, &message);
    }

    /// [`stop`](Timer::stop) followed by [`print`](Timer::print).
    pub fn stop_and_print(&mut self) {
        self.stop();
        self.print();
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.stop_and_print();
    }
}

impl std::fmt::Debug for Timer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Timer")
            .field("title", &self.title)
            .field("secs", &self.duration())
            .finish_non_exhaustive()
    }
}

// Tracing events take their level as a const; dispatch by hand.
fn log_at(level: Level, message: &str) {
    if level == Level::TRACE {
        tracing::trace!("{message}");
    } else if level == Level::DEBUG {
        tracing::debug!("{message}");
    } else if level == Level::INFO {
        tracing::info!("{message}");
    } else if level == Level::WARN {
        tracing::warn!("{message}");
    } else {
        tracing::error!("{message}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_freezes_the_duration() {
        let mut timer = Timer::new("region", Level::TRACE, false);
        let first = timer.stop();
        std::thread::sleep(Duration::from_millis(5));
        let second = timer.duration();
        assert!((first - second).abs() < 1e-9);
    }

    #[test]
    fn duration_grows_until_stopped() {
        let timer = Timer::new("region", Level::TRACE, false);
        std::thread::sleep(Duration::from_millis(5));
        assert!(timer.duration() > 0.0);
    }

    #[test]
    fn print_is_idempotent() {
        let mut timer = Timer::new("region", Level::TRACE, true);
        timer.stop_and_print();
        timer.print();
    }
}
