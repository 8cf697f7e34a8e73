//! Rate limiting through an atomically claimed deadline.
//!
//! Several threads race to emit a periodic line (scheduler status, progress
//! updates); exactly one of them may win each interval. [`RateGate`] stores
//! the next permitted emission time as nanoseconds past a base instant in an
//! atomic, and a thread claims the slot with a compare-exchange before
//! publishing the next deadline.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// An atomic deadline that at most one thread can claim per interval.
#[derive(Debug)]
pub struct RateGate {
    base: Instant,
    interval_nanos: u64,
    next: AtomicU64,
}

impl RateGate {
    /// Creates a gate whose first claim succeeds immediately.
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            base: Instant::now(),
            interval_nanos: nanos(interval),
            next: AtomicU64::new(0),
        }
    }

    /// Creates a gate whose first claim succeeds only after one full
    /// interval has elapsed.
    #[must_use]
    pub fn with_initial_delay(interval: Duration) -> Self {
        let interval_nanos = nanos(interval);
        Self {
            base: Instant::now(),
            interval_nanos,
            next: AtomicU64::new(interval_nanos),
        }
    }

    /// Attempts to claim the current slot.
    ///
    /// Returns `true` for exactly one caller per elapsed interval; the
    /// winner's next deadline is one interval past the moment of the claim.
    pub fn try_claim(&self) -> bool {
        let now = nanos(self.base.elapsed());
        loop {
            let next = self.next.load(Ordering::Relaxed);
            if now < next {
                return false;
            }
            let new_next = now.saturating_add(self.interval_nanos);
            match self
                .next
                .compare_exchange_weak(next, new_next, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return true,
                // Another thread moved the deadline; re-check against it.
                Err(_) => continue,
            }
        }
    }
}

fn nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_claim_wins_then_blocks() {
        let gate = RateGate::new(Duration::from_secs(3600));
        assert!(gate.try_claim());
        assert!(!gate.try_claim());
    }

    #[test]
    fn initial_delay_blocks_the_first_claim() {
        let gate = RateGate::with_initial_delay(Duration::from_secs(3600));
        assert!(!gate.try_claim());
    }

    #[test]
    fn zero_interval_always_claims() {
        let gate = RateGate::new(Duration::ZERO);
        assert!(gate.try_claim());
        assert!(gate.try_claim());
    }

    #[test]
    fn only_one_thread_claims_per_interval() {
        let gate = std::sync::Arc::new(RateGate::new(Duration::from_secs(3600)));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let gate = std::sync::Arc::clone(&gate);
            handles.push(std::thread::spawn(move || usize::from(gate.try_claim())));
        }
        let wins: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(wins, 1);
    }
}
