//! Per-group execution statistics and the shutdown report.

use std::collections::HashMap;
use tracing::debug;

/// Pseudo-group under which worker idle time is accumulated.
pub const WAIT_GROUP: &str = "__WAIT_FOR_TASKS__";

/// Execution counters for one task group.
///
/// Invariant: `submitted == queued + completed + cancelled` at all times.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TaskStat {
    /// Tasks ever submitted under this group.
    pub submitted: u64,
    /// Tasks currently enqueued or running.
    pub queued: u64,
    /// Tasks that finished executing (successfully or not).
    pub completed: u64,
    /// Tasks removed from the queue by a cancellation predicate.
    pub cancelled: u64,
    /// Wall-clock seconds spent executing this group's actions.
    pub cpu_time: f64,
}

/// Aggregates stats by the group prefix before the first `:` and sorts by
/// CPU time descending. Returns the sorted rows and the total CPU time.
pub(crate) fn aggregate_by_prefix(
    stats: &HashMap<String, TaskStat>,
) -> (Vec<(String, TaskStat)>, f64) {
    let mut grouped: HashMap<&str, TaskStat> = HashMap::new();
    let mut total_cpu_time = 0.0;
    for (name, stat) in stats {
        let prefix = name.split(':').next().unwrap_or(name);
        let entry = grouped.entry(prefix).or_default();
        entry.submitted += stat.submitted;
        entry.completed += stat.completed;
        entry.cancelled += stat.cancelled;
        entry.cpu_time += stat.cpu_time;
        total_cpu_time += stat.cpu_time;
    }
    let mut rows: Vec<(String, TaskStat)> = grouped
        .into_iter()
        .map(|(name, stat)| (name.to_string(), stat))
        .collect();
    rows.sort_by(|a, b| {
        b.1.cpu_time
            .partial_cmp(&a.1.cpu_time)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    (rows, total_cpu_time)
}

/// Emits the per-group CPU utilization report at debug level.
pub(crate) fn log_shutdown_report(stats: &HashMap<String, TaskStat>) {
    debug!("scheduler's cumulative cpu utilization statistics by task group:");
    let (rows, total_cpu_time) = aggregate_by_prefix(stats);
    for (name, stat) in &rows {
        let share = if total_cpu_time > 0.0 {
            100.0 * stat.cpu_time / total_cpu_time
        } else {
            0.0
        };
        debug!(
            "task: {} submitted: {} completed: {} cpu_time: {:.3} sec ({:.1}%)",
            name, stat.submitted, stat.completed, stat.cpu_time, share
        );
    }
    debug!("total cpu time spent by all tasks: {total_cpu_time:.3} sec");
}
