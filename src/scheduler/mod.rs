//! Process-wide priority task scheduler.
//!
//! A fixed set of worker threads drains a single shared priority queue in
//! strict priority order. Submissions are tagged with a *task group* under
//! which execution statistics are aggregated and task failures are routed
//! to a per-group error observer.
//!
//! # Design
//!
//! - **One queue.** All work lives in one max-heap guarded by one mutex and
//!   one condition variable; there are no per-worker deques and no work
//!   stealing. Workers wait with a bounded timeout
//!   ([`DEFAULT_WAIT_INTERVAL`]) so periodic status emission proceeds even
//!   when the queue stays drained.
//! - **No lock across user code.** A worker pops the top task, records its
//!   group in a per-worker diagnostic slot and releases the queue lock
//!   before running the action. Panics are caught at that boundary, logged,
//!   folded into the drain result and offered to the group's observer.
//! - **Drain as a barrier.** Workers execute tasks as soon as they are
//!   submitted; [`Scheduler::process`] merely blocks until the queue and
//!   the active count both reach zero, then reports whether everything
//!   succeeded.
//! - **Reentrance.** A *running task* may drain a tagged sub-batch with
//!   [`Scheduler::wait_all`] without giving up its worker slot; plain
//!   `process` calls are single-flight per scheduler.
//!
//! # Shutdown
//!
//! Dropping the scheduler signals teardown, broadcasts on the condition
//! variable, joins every worker and emits a per-group CPU utilization
//! report at debug level. Queued tasks that never ran are abandoned.

mod config;
mod stats;

pub use config::{default_worker_count, DEFAULT_UPDATE_INTERVAL, DEFAULT_WAIT_INTERVAL, ENV_WORKERS};
pub use stats::{TaskStat, WAIT_GROUP};

use crate::error::{Error, ErrorKind, Result};
use crate::progress::Progress;
use crate::task::{panic_message, ScheduledTask, ScheduledTaskError, TaskParam};
use crate::timer::Timer;
use crate::util::{CachePadded, RateGate};
use scopeguard::defer;
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, BinaryHeap, HashMap};
use std::panic::{self, AssertUnwindSafe, Location};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, OnceLock};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Instant;
use tracing::{debug, error, info, warn, Level};

/// Per-group callback invoked on the worker that caught a task failure.
pub type ErrorObserver = Box<dyn FnMut(&ScheduledTaskError) + Send>;

/// Shared atomic counter of outstanding `wait_all` children.
pub type TodoCounter = Arc<AtomicUsize>;

/// The priority task scheduler.
///
/// Cheap to share behind an [`Arc`]; all operations take `&self`. Dropping
/// the value tears the pool down (see the module docs).
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler").finish_non_exhaustive()
    }
}

struct SchedulerInner {
    queue: CachePadded<Mutex<QueueState>>,
    queue_cv: CachePadded<Condvar>,
    observers: CachePadded<Mutex<HashMap<String, ErrorObserver>>>,
    worker_ids: Mutex<HashMap<ThreadId, usize>>,
    thread_handles: Mutex<Vec<JoinHandle<()>>>,
    num_workers: usize,
    /// Worker slots currently executing an outer (non-nested) task.
    num_active: AtomicUsize,
    destroy: AtomicBool,
    success: AtomicBool,
    process_running: AtomicBool,
    wait_all_running: AtomicBool,
    report_gate: RateGate,
}

#[derive(Default)]
struct QueueState {
    tasks: BinaryHeap<ScheduledTask>,
    stats: HashMap<String, TaskStat>,
    /// Group currently run by each worker slot, `"outer/nested"` when a
    /// slot re-enters the pool through `wait_all`.
    worker_groups: Vec<Option<String>>,
}

impl QueueState {
    fn queued_total(&self) -> u64 {
        self.stats.values().map(|s| s.queued).sum()
    }
}

impl Scheduler {
    /// Creates a scheduler sized by [`default_worker_count`] (subject to
    /// the [`ENV_WORKERS`] override).
    ///
    /// # Errors
    ///
    /// Fails when the resolved worker count is zero or the environment
    /// override does not parse.
    pub fn new() -> Result<Self> {
        Self::with_workers(config::default_worker_count())
    }

    /// Creates a scheduler with `requested` workers (subject to the
    /// [`ENV_WORKERS`] override).
    ///
    /// When the resolved count is exactly 1, no background threads are
    /// spawned: the constructing thread is registered as the only worker
    /// slot and tasks run inline from [`Scheduler::process`].
    ///
    /// # Errors
    ///
    /// Fails when the resolved worker count is zero or the environment
    /// override does not parse.
    pub fn with_workers(requested: usize) -> Result<Self> {
        let num_workers = config::resolve_worker_count(requested)?;
        info!(num_workers, "scheduler started");
        let inner = Arc::new(SchedulerInner {
            queue: CachePadded::new(Mutex::new(QueueState {
                tasks: BinaryHeap::new(),
                stats: HashMap::new(),
                worker_groups: vec![None; num_workers],
            })),
            queue_cv: CachePadded::new(Condvar::new()),
            observers: CachePadded::new(Mutex::new(HashMap::new())),
            worker_ids: Mutex::new(HashMap::new()),
            thread_handles: Mutex::new(Vec::with_capacity(num_workers)),
            num_workers,
            num_active: AtomicUsize::new(0),
            destroy: AtomicBool::new(false),
            success: AtomicBool::new(true),
            process_running: AtomicBool::new(false),
            wait_all_running: AtomicBool::new(false),
            report_gate: RateGate::with_initial_delay(config::DEFAULT_UPDATE_INTERVAL),
        });
        if num_workers == 1 {
            inner
                .worker_ids
                .lock()
                .unwrap()
                .insert(thread::current().id(), 0);
        } else {
            let mut ids = inner.worker_ids.lock().unwrap();
            let mut handles = inner.thread_handles.lock().unwrap();
            for idx in 0..num_workers {
                let shared = Arc::clone(&inner);
                let handle = thread::Builder::new()
                    .name(format!("foreman-worker-{idx}"))
                    .stack_size(config::WORKER_STACK_SIZE)
                    .spawn(move || worker_loop(&shared, idx))
                    .expect("failed to spawn scheduler worker");
                ids.insert(handle.thread().id(), idx);
                handles.push(handle);
            }
        }
        Ok(Self { inner })
    }

    /// The process-wide scheduler, constructed on first access.
    ///
    /// The global instance is never dropped, so its shutdown report never
    /// fires; prefer passing an owned scheduler around where practical.
    pub fn global() -> &'static Scheduler {
        static GLOBAL: OnceLock<Scheduler> = OnceLock::new();
        GLOBAL.get_or_init(|| Scheduler::new().expect("failed to start the global scheduler"))
    }

    /// The number of worker slots in this pool.
    #[must_use]
    pub fn num_workers(&self) -> usize {
        self.inner.num_workers
    }

    /// Enqueues `action` under `group` at `priority` and wakes one worker.
    pub fn submit(
        &self,
        group: impl Into<String>,
        priority: i64,
        action: impl FnOnce() + Send + 'static,
    ) {
        self.inner.post(ScheduledTask::new(group, priority, action));
    }

    /// Like [`Scheduler::submit`] with an opaque parameter attached for
    /// cancellation predicates.
    pub fn submit_with_param(
        &self,
        group: impl Into<String>,
        priority: i64,
        action: impl FnOnce() + Send + 'static,
        param: TaskParam,
    ) {
        self.inner
            .post(ScheduledTask::new(group, priority, action).with_param(param));
    }

    /// Enqueues a prebuilt [`ScheduledTask`].
    pub fn submit_task(&self, task: ScheduledTask) {
        self.inner.post(task);
    }

    /// Removes every queued task for which the predicate returns `true`.
    ///
    /// The predicate sees the task group and the optional parameter.
    /// Already-running tasks are never interrupted. Returns the number of
    /// tasks removed. The queue is rebuilt in place (`O(n log n)`).
    pub fn cancel<P>(&self, mut pred: P) -> usize
    where
        P: FnMut(&str, Option<&TaskParam>) -> bool,
    {
        self.inner.cancel(&mut pred)
    }

    /// Installs the error observer for `group`.
    ///
    /// Observers must be configured before any work for the group is
    /// submitted, which keeps their invocation ordering deterministic. All
    /// observers are cleared when a `process` call finalizes.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::ObserverAfterSubmit`] when the group has work in
    /// flight; [`ErrorKind::DuplicateObserver`] when an observer is present
    /// and `replace` is `false`.
    pub fn on_error<F>(&self, group: &str, replace: bool, observer: F) -> Result<()>
    where
        F: FnMut(&ScheduledTaskError) + Send + 'static,
    {
        self.inner.on_error(group, replace, Box::new(observer))
    }

    /// The number of queued-or-running tasks for `group`.
    #[must_use]
    pub fn task_count(&self, group: &str) -> u64 {
        self.inner.task_count(group)
    }

    /// A point-in-time copy of the per-group statistics.
    #[must_use]
    pub fn stats_snapshot(&self) -> HashMap<String, TaskStat> {
        self.inner.queue.lock().unwrap().stats.clone()
    }

    /// Drains the scheduler and reports success as a boolean.
    ///
    /// Blocks until the queue is empty and no outer task is running, then
    /// clears all error observers and resets the failure flag for the next
    /// cycle. Returns `false` when any task failed during the drain.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::ReentrantProcess`] when another `process` call is
    /// already draining this scheduler.
    #[track_caller]
    pub fn process_ok(&self, report_status: bool) -> Result<bool> {
        let loc = Location::caller();
        let _timer = Timer::new(
            format!("scheduler::process_ok call from {}:{}", loc.file(), loc.line()),
            Level::DEBUG,
            true,
        );
        if self
            .inner
            .process_running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::new(ErrorKind::ReentrantProcess)
                .with_context("nested calls to Scheduler::process are prohibited"));
        }
        let inner = &*self.inner;
        defer! {
            inner.observers.lock().unwrap().clear();
            inner.process_running.store(false, Ordering::Release);
            inner.success.store(true, Ordering::Release);
        }
        inner.drain(report_status);
        Ok(inner.success.load(Ordering::Acquire))
    }

    /// Drains the scheduler, failing when any task failed.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::ReentrantProcess`] on nested calls;
    /// [`ErrorKind::TasksFailed`] when the drain finished but at least one
    /// task panicked.
    #[track_caller]
    pub fn process(&self, report_status: bool) -> Result<()> {
        if self.process_ok(report_status)? {
            Ok(())
        } else {
            Err(Error::new(ErrorKind::TasksFailed).with_context(
                "some scheduled tasks have failed, please consult logs for more details",
            ))
        }
    }

    /// Heartbeat: emits the rate-limited status line and pokes the
    /// progress sink. Never executes tasks.
    pub fn process_once(&self, report_status: bool) {
        self.inner.process_once(report_status, false);
    }

    /// Submits a tagged batch of children from a *running task* and blocks
    /// until all of them completed, without giving up the worker slot.
    ///
    /// `submit_fn` receives the shared outstanding-children counter and a
    /// submitter; every task pushed through the submitter is wrapped so the
    /// counter tracks its completion. A temporary error observer for
    /// `group` counts failures (replacing any existing observer). While
    /// children are outstanding, the calling thread spins on the heartbeat
    /// and logs a warning every 10 seconds.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::ConcurrentWaitAll`] when another `wait_all` is running;
    /// [`ErrorKind::WaitAllPoolTooSmall`] on pools with fewer than four
    /// workers; [`ErrorKind::TasksFailed`] when any child failed;
    /// [`ErrorKind::ObserverAfterSubmit`] when `group` already has work in
    /// flight.
    pub fn wait_all<F>(&self, group: &str, submit_fn: F) -> Result<()>
    where
        F: FnOnce(&TodoCounter, &mut dyn FnMut(ScheduledTask)),
    {
        self.inner.wait_all(group, submit_fn)
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.inner.destroy.store(true, Ordering::Release);
        self.inner.queue_cv.notify_all();
        let handles: Vec<JoinHandle<()>> =
            self.inner.thread_handles.lock().unwrap().drain(..).collect();
        for handle in handles {
            let _ = handle.join();
        }
        let snapshot = self.inner.queue.lock().unwrap().stats.clone();
        stats::log_shutdown_report(&snapshot);
    }
}

impl SchedulerInner {
    fn post(&self, task: ScheduledTask) {
        {
            let mut state = self.queue.lock().unwrap();
            let stat = state.stats.entry(task.group.clone()).or_default();
            stat.submitted += 1;
            stat.queued += 1;
            state.tasks.push(task);
        }
        self.queue_cv.notify_one();
    }

    fn cancel(&self, pred: &mut dyn FnMut(&str, Option<&TaskParam>) -> bool) -> usize {
        let mut state = self.queue.lock().unwrap();
        let mut num_cancelled = 0;
        let drained = std::mem::take(&mut state.tasks);
        for task in drained {
            if pred(&task.group, task.param.as_ref()) {
                if let Some(stat) = state.stats.get_mut(&task.group) {
                    stat.queued -= 1;
                    stat.cancelled += 1;
                }
                num_cancelled += 1;
            } else {
                state.tasks.push(task);
            }
        }
        // No notification: cancellation never adds tasks.
        num_cancelled
    }

    fn on_error(&self, group: &str, replace: bool, observer: ErrorObserver) -> Result<()> {
        if self.task_count(group) != 0 {
            return Err(Error::new(ErrorKind::ObserverAfterSubmit).with_context(format!(
                "observers for task group '{group}' must be configured before task submission"
            )));
        }
        let mut observers = self.observers.lock().unwrap();
        match observers.entry(group.to_string()) {
            Entry::Occupied(mut entry) => {
                if !replace {
                    return Err(Error::new(ErrorKind::DuplicateObserver).with_context(format!(
                        "task group '{group}': error observer has already been set"
                    )));
                }
                entry.insert(observer);
            }
            Entry::Vacant(entry) => {
                entry.insert(observer);
            }
        }
        Ok(())
    }

    fn task_count(&self, group: &str) -> u64 {
        self.queue
            .lock()
            .unwrap()
            .stats
            .get(group)
            .map_or(0, |s| s.queued)
    }

    fn worker_id_of_current_thread(&self) -> Option<usize> {
        self.worker_ids
            .lock()
            .unwrap()
            .get(&thread::current().id())
            .copied()
    }

    /// Runs the drain loop until the queue and the active count are zero.
    fn drain(&self, report_status: bool) {
        loop {
            {
                let state = self.queue.lock().unwrap();
                if state.queued_total() == 0 && self.num_active.load(Ordering::Relaxed) == 0 {
                    break;
                }
            }
            self.process_once(report_status, self.num_workers == 1);
            thread::yield_now();
        }
        if report_status {
            Progress::global().inform();
        }
    }

    fn process_once(&self, report_status: bool, process_tasks: bool) {
        if process_tasks {
            if let Some(worker_idx) = self.worker_id_of_current_thread() {
                self.worker_try_execute(worker_idx);
            } else {
                warn!(
                    thread = ?thread::current().id(),
                    "thread outside of the worker pool attempted to execute tasks"
                );
            }
        }
        if report_status {
            self.report_status();
        }
    }

    fn report_status(&self) {
        if !self.report_gate.try_claim() {
            return;
        }
        let (queued_total, active_groups) = {
            let state = self.queue.lock().unwrap();
            let mut active: BTreeMap<String, usize> = BTreeMap::new();
            for group in state.worker_groups.iter().flatten() {
                *active.entry(group.clone()).or_insert(0) += 1;
            }
            (state.queued_total(), active)
        };
        debug!(tasks = queued_total, active = ?active_groups, "scheduler status");
        Progress::global().inform();
    }

    /// One worker pass: bounded wait for work, then run at most one task.
    ///
    /// Returns `false` when the pool is tearing down.
    fn worker_try_execute(&self, worker_idx: usize) -> bool {
        let wait_start = Instant::now();
        let state = self.queue.lock().unwrap();
        let (mut state, _timeout) = self
            .queue_cv
            .wait_timeout_while(state, config::DEFAULT_WAIT_INTERVAL, |s| {
                s.tasks.is_empty() && !self.destroy.load(Ordering::Acquire)
            })
            .unwrap();
        state
            .stats
            .entry(WAIT_GROUP.to_string())
            .or_default()
            .cpu_time += wait_start.elapsed().as_secs_f64();
        if self.destroy.load(Ordering::Acquire) {
            return false;
        }
        let Some(task) = state.tasks.pop() else {
            return true;
        };
        let prev_group = state.worker_groups[worker_idx].take();
        let nested = prev_group.is_some();
        state.worker_groups[worker_idx] = Some(match &prev_group {
            Some(outer) => format!("{outer}/{}", task.group),
            None => task.group.clone(),
        });
        if !nested {
            self.num_active.fetch_add(1, Ordering::Relaxed);
        }
        drop(state);

        let (priority, group, param, action) = task.into_parts();
        let run_start = Instant::now();
        let outcome = panic::catch_unwind(AssertUnwindSafe(action));
        let cpu_time = run_start.elapsed().as_secs_f64();
        let task_err = match outcome {
            Ok(()) => None,
            Err(payload) => {
                self.success.store(false, Ordering::Release);
                let message = panic_message(payload.as_ref());
                warn!(
                    worker = worker_idx,
                    group = %group,
                    error = %message,
                    "scheduled task failed"
                );
                Some(ScheduledTaskError::new(
                    Location::caller(),
                    priority,
                    group.clone(),
                    param,
                    format!("task '{group}' failed: {message}"),
                ))
            }
        };

        {
            let mut state = self.queue.lock().unwrap();
            if let Some(stat) = state.stats.get_mut(&group) {
                stat.queued -= 1;
                stat.completed += 1;
                stat.cpu_time += cpu_time;
            } else {
                error!(group = %group, "internal error: completion for an unknown task group");
            }
        }

        if let Some(err) = &task_err {
            let mut observers = self.observers.lock().unwrap();
            if let Some(observer) = observers.get_mut(&group) {
                if let Err(observer_panic) =
                    panic::catch_unwind(AssertUnwindSafe(|| observer(err)))
                {
                    warn!(
                        group = %group,
                        error = %panic_message(observer_panic.as_ref()),
                        "error observer failed"
                    );
                }
            }
        }

        {
            let mut state = self.queue.lock().unwrap();
            state.worker_groups[worker_idx] = prev_group;
        }
        if !nested {
            self.num_active.fetch_sub(1, Ordering::Relaxed);
        }
        true
    }

    fn wait_all<F>(&self, group: &str, submit_fn: F) -> Result<()>
    where
        F: FnOnce(&TodoCounter, &mut dyn FnMut(ScheduledTask)),
    {
        if self
            .wait_all_running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::new(ErrorKind::ConcurrentWaitAll)
                .with_context("concurrent wait_all calls are not allowed"));
        }
        let flag = &self.wait_all_running;
        defer! {
            flag.store(false, Ordering::Release);
        }
        if self.num_workers < config::WAIT_ALL_MIN_WORKERS {
            return Err(Error::new(ErrorKind::WaitAllPoolTooSmall).with_context(format!(
                "wait_all relies on a high worker count but got {} worker threads",
                self.num_workers
            )));
        }
        let errors = Arc::new(AtomicUsize::new(0));
        {
            let errors = Arc::clone(&errors);
            self.on_error(
                group,
                true,
                Box::new(move |_err| {
                    errors.fetch_add(1, Ordering::Relaxed);
                }),
            )?;
        }
        let todo: TodoCounter = Arc::new(AtomicUsize::new(0));
        {
            let todo_ref = &todo;
            let mut submitter = |task: ScheduledTask| {
                todo_ref.fetch_add(1, Ordering::Relaxed);
                let todo = Arc::clone(todo_ref);
                let (priority, task_group, param, action) = task.into_parts();
                let mut wrapped = ScheduledTask::new(task_group, priority, move || {
                    action();
                    todo.fetch_sub(1, Ordering::Relaxed);
                });
                if let Some(param) = param {
                    wrapped = wrapped.with_param(param);
                }
                self.post(wrapped);
            };
            submit_fn(&todo, &mut submitter);
        }
        let wait_start = Instant::now();
        let warn_gate = RateGate::with_initial_delay(config::WAIT_ALL_WARN_INTERVAL);
        loop {
            let todo_now = todo.load(Ordering::Relaxed);
            let errors_now = errors.load(Ordering::Relaxed);
            if todo_now.saturating_sub(errors_now) == 0 {
                break;
            }
            if warn_gate.try_claim() {
                warn!(
                    group,
                    todo = todo_now.saturating_sub(errors_now),
                    errors = errors_now,
                    waited_secs = wait_start.elapsed().as_secs(),
                    "wait_all is taking longer than expected"
                );
            }
            self.process_once(true, false);
            thread::yield_now();
        }
        if errors.load(Ordering::Relaxed) > 0 {
            return Err(Error::new(ErrorKind::TasksFailed)
                .with_context(format!("wait_all '{group}': there were failed tasks")));
        }
        Ok(())
    }
}

fn worker_loop(inner: &SchedulerInner, worker_idx: usize) {
    while inner.worker_try_execute(worker_idx) {}
}
