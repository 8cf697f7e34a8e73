//! Named progress reporting with rate-limited emission.
//!
//! Producers update a named completion fraction; `inform` emits one
//! aggregated line at most once per second, claimed atomically so
//! concurrent callers never double-log. Updates are monotonic per name: a
//! smaller fraction never overwrites a larger one.

use crate::util::{CachePadded, RateGate};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::{Mutex, OnceLock};
use std::time::Duration;
use tracing::info;

const INFORM_INTERVAL: Duration = Duration::from_secs(1);

/// A named percentage map with rate-limited emission.
pub struct Progress {
    state: CachePadded<Mutex<BTreeMap<String, f64>>>,
    inform_gate: RateGate,
}

impl Progress {
    /// Creates an empty progress sink.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: CachePadded::new(Mutex::new(BTreeMap::new())),
            inform_gate: RateGate::new(INFORM_INTERVAL),
        }
    }

    /// The process-wide sink used by the scheduler heartbeat.
    pub fn global() -> &'static Progress {
        static GLOBAL: OnceLock<Progress> = OnceLock::new();
        GLOBAL.get_or_init(Progress::new)
    }

    /// Registers `name` at zero completion.
    pub fn init(&self, name: &str) {
        self.update_value(name, 0.0);
    }

    /// Updates `name` to `current / max` (clamped; `max == 0` counts as
    /// complete).
    pub fn update(&self, name: &str, current: u64, max: u64) {
        let value = current.min(max);
        let fraction = if max == 0 {
            1.0
        } else {
            value as f64 / max as f64
        };
        self.update_value(name, fraction);
    }

    /// [`update`](Progress::update) followed by [`inform`](Progress::inform).
    pub fn update_inform(&self, name: &str, current: u64, max: u64) {
        self.update(name, current, max);
        self.inform();
    }

    /// Marks `name` complete.
    pub fn done(&self, name: &str) {
        self.update_value(name, 1.0);
    }

    /// Removes `name` from the map.
    pub fn retire(&self, name: &str) {
        self.state.lock().unwrap().remove(name);
    }

    /// Emits the aggregated progress line, at most once per second across
    /// all callers. Empty state emits nothing.
    pub fn inform(&self) {
        if !self.inform_gate.try_claim() {
            return;
        }
        let snapshot = self.snapshot();
        if snapshot.is_empty() {
            return;
        }
        let mut line = String::new();
        for (i, (name, fraction)) in snapshot.iter().enumerate() {
            if i > 0 {
                line.push_str(", ");
            }
            let _ = write!(line, "{name}: {:.3}%", fraction * 100.0);
        }
        info!("progress: {line}");
    }

    /// A point-in-time copy of the progress map.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, f64> {
        self.state.lock().unwrap().clone()
    }

    fn update_value(&self, name: &str, value: f64) {
        let mut state = self.state.lock().unwrap();
        match state.get_mut(name) {
            Some(existing) => {
                if value > *existing {
                    *existing = value;
                }
            }
            None => {
                state.insert(name.to_string(), value);
            }
        }
    }
}

impl Default for Progress {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Progress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Progress")
            .field("state", &self.snapshot())
            .finish_non_exhaustive()
    }
}

/// Registers a set of progress names on construction and retires them on
/// drop.
pub struct ProgressGuard<'a> {
    progress: &'a Progress,
    names: Vec<String>,
}

impl<'a> ProgressGuard<'a> {
    /// Initializes every name in `names` on `progress`.
    pub fn new(progress: &'a Progress, names: &[&str]) -> Self {
        let names: Vec<String> = names.iter().map(|n| (*n).to_string()).collect();
        for name in &names {
            progress.init(name);
        }
        Self { progress, names }
    }

    /// The names managed by this guard.
    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.names
    }
}

impl Drop for ProgressGuard<'_> {
    fn drop(&mut self) {
        for name in &self.names {
            self.progress.retire(name);
        }
    }
}
