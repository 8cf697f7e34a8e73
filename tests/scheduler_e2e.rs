//! End-to-end scheduler scenarios: priority dispatch, observer lifecycle,
//! bulk cancellation, nested drains and the statistics invariant.

use foreman::test_utils::{env_lock, init_test_logging};
use foreman::{ErrorKind, ScheduledTask, Scheduler};
use proptest::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// Builds a pool of `workers`, shielded from ambient `DT_WORKERS` values.
fn new_pool(workers: usize) -> Scheduler {
    init_test_logging();
    let _env = env_lock();
    std::env::remove_var(foreman::ENV_WORKERS);
    Scheduler::with_workers(workers).expect("scheduler construction")
}

#[test]
fn priority_order_is_strict() {
    // A single-worker pool runs tasks inline from process(), so the
    // observed start order is exactly the pop order.
    let sched = new_pool(1);
    let order = Arc::new(Mutex::new(Vec::new()));
    for priority in [1_i64, 10, 5] {
        let order = Arc::clone(&order);
        sched.submit("ordered", priority, move || {
            order.lock().unwrap().push(priority);
        });
    }
    sched.process(true).unwrap();
    assert_eq!(*order.lock().unwrap(), vec![10, 5, 1]);
}

#[test]
fn observed_failure_returns_false_and_calls_observer_once() {
    let sched = new_pool(2);
    let messages = Arc::new(Mutex::new(Vec::new()));
    {
        let messages = Arc::clone(&messages);
        sched
            .on_error("bad", false, move |err| {
                messages.lock().unwrap().push(err.message().to_string());
            })
            .unwrap();
    }
    sched.submit("bad", 100, || panic!("boom"));
    assert!(!sched.process_ok(true).unwrap());
    let messages = messages.lock().unwrap();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].contains("boom"));
    assert!(messages[0].contains("bad"));
}

#[test]
fn unobserved_failure_makes_process_fail() {
    let sched = new_pool(2);
    sched.submit("bad", 100, || panic!("boom"));
    let err = sched.process(true).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TasksFailed);
}

#[test]
fn empty_drain_returns_immediately() {
    let many = new_pool(4);
    many.process(true).unwrap();
    let single = new_pool(1);
    single.process(true).unwrap();
}

#[test]
fn zero_workers_fail_construction() {
    init_test_logging();
    let _env = env_lock();
    std::env::remove_var(foreman::ENV_WORKERS);
    let err = Scheduler::with_workers(0).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoWorkers);
}

#[test]
fn env_override_controls_worker_count() {
    init_test_logging();
    let _env = env_lock();
    std::env::set_var(foreman::ENV_WORKERS, "3");
    let sched = Scheduler::with_workers(1).expect("scheduler construction");
    std::env::remove_var(foreman::ENV_WORKERS);
    assert_eq!(sched.num_workers(), 3);
}

#[test]
fn nested_wait_all_drains_children() {
    let sched = Arc::new(new_pool(4));
    let inner = Arc::clone(&sched);
    sched.submit("root", 100, move || {
        inner
            .wait_all("child", |_todo, submit| {
                submit(ScheduledTask::new("child", 200, || {
                    thread::sleep(Duration::from_millis(500));
                }));
                submit(ScheduledTask::new("child", 300, || {
                    thread::sleep(Duration::from_millis(200));
                }));
            })
            .unwrap();
    });
    sched.process(true).unwrap();
    let stats = sched.stats_snapshot();
    let child = stats.get("child").copied().unwrap();
    assert_eq!(child.submitted, 2);
    assert_eq!(child.completed, 2);
    assert_eq!(child.queued, 0);
    let root = stats.get("root").copied().unwrap();
    assert_eq!(root.completed, 1);
}

#[test]
fn wait_all_rejects_small_pools_and_recovers() {
    let sched = new_pool(2);
    let err = sched.wait_all("w", |_, _| {}).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::WaitAllPoolTooSmall);
    // The single-flight flag must have been released by the failure.
    let err = sched.wait_all("w", |_, _| {}).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::WaitAllPoolTooSmall);
}

#[test]
fn wait_all_reports_failed_children() {
    let sched = new_pool(4);
    let err = sched
        .wait_all("doomed", |_todo, submit| {
            submit(ScheduledTask::new("doomed", 10, || panic!("child down")));
            submit(ScheduledTask::new("doomed", 20, || {}));
        })
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TasksFailed);
    // The panicking child also poisoned the drain result.
    assert!(!sched.process_ok(false).unwrap());
}

#[test]
fn cancel_by_parameter_mid_drain() {
    let sched = Arc::new(new_pool(8));
    let num_cancelled = Arc::new(AtomicUsize::new(0));
    let num_completed = Arc::new(AtomicUsize::new(0));
    for _ in 0..1000 {
        // Slow higher-priority tasks; each one cancels every queued task
        // still carrying the `true` parameter.
        let inner = Arc::clone(&sched);
        let cancelled = Arc::clone(&num_cancelled);
        let completed = Arc::clone(&num_completed);
        sched.submit_with_param(
            "t",
            100,
            move || {
                thread::sleep(Duration::from_millis(300));
                let n = inner.cancel(|name, param| {
                    name == "t"
                        && param.and_then(|p| p.downcast_ref::<bool>()).copied() == Some(true)
                });
                cancelled.fetch_add(n, Ordering::Relaxed);
                completed.fetch_add(1, Ordering::Relaxed);
            },
            Arc::new(true),
        );
        // Fast lower-priority tasks.
        let completed = Arc::clone(&num_completed);
        sched.submit_with_param(
            "t",
            10,
            move || {
                thread::sleep(Duration::from_millis(1));
                completed.fetch_add(1, Ordering::Relaxed);
            },
            Arc::new(false),
        );
    }
    sched.process(true).unwrap();
    let cancelled = num_cancelled.load(Ordering::Relaxed);
    assert!((900..1000).contains(&cancelled), "cancelled: {cancelled}");
    assert!(num_completed.load(Ordering::Relaxed) > 1000);
    let stat = sched.stats_snapshot().get("t").copied().unwrap();
    assert_eq!(stat.submitted, 2000);
    assert_eq!(stat.queued, 0);
    assert_eq!(stat.cancelled as usize, cancelled);
    assert_eq!(stat.completed + stat.cancelled, 2000);
}

#[test]
fn observer_after_submission_fails() {
    let sched = new_pool(1);
    sched.submit("late", 5, || {});
    let err = sched.on_error("late", false, |_| {}).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ObserverAfterSubmit);
    sched.process(true).unwrap();
    // Once drained the group is empty again and registration succeeds.
    sched.on_error("late", false, |_| {}).unwrap();
}

#[test]
fn duplicate_observer_requires_replace() {
    let sched = new_pool(2);
    sched.on_error("dup", false, |_| {}).unwrap();
    let err = sched.on_error("dup", false, |_| {}).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DuplicateObserver);
    sched.on_error("dup", true, |_| {}).unwrap();
}

#[test]
fn reentrant_process_fails() {
    // In single-worker mode submitted tasks run inline inside process(),
    // so the nested call is guaranteed to overlap the outer drain.
    let sched = Arc::new(new_pool(1));
    let inner = Arc::clone(&sched);
    let observed = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&observed);
    sched.submit("outer", 1, move || {
        *slot.lock().unwrap() = Some(inner.process_ok(false));
    });
    sched.process(true).unwrap();
    let nested = observed.lock().unwrap().take().expect("task ran");
    assert_eq!(nested.unwrap_err().kind(), ErrorKind::ReentrantProcess);
}

#[test]
fn submitted_actions_run_exactly_once() {
    let sched = new_pool(4);
    let counter = Arc::new(AtomicUsize::new(0));
    for i in 0..500_i64 {
        let counter = Arc::clone(&counter);
        sched.submit("once", i % 13, move || {
            counter.fetch_add(1, Ordering::Relaxed);
        });
    }
    sched.process(true).unwrap();
    assert_eq!(counter.load(Ordering::Relaxed), 500);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// For any interleaving of submissions and cancellations,
    /// `submitted == queued + completed + cancelled` holds per group, and a
    /// finished drain leaves no queued work behind.
    #[test]
    fn stats_invariant_over_random_operations(
        ops in proptest::collection::vec((0u8..3, 0i64..100, 0usize..3), 1..40),
    ) {
        let sched = new_pool(2);
        let groups = ["alpha", "beta", "gamma"];
        let executed = Arc::new(AtomicUsize::new(0));
        for (kind, priority, group_idx) in ops {
            let group = groups[group_idx];
            match kind {
                // Cancellable submission, tagged by parameter.
                0 => {
                    let executed = Arc::clone(&executed);
                    sched.submit_with_param(
                        group,
                        priority,
                        move || {
                            executed.fetch_add(1, Ordering::Relaxed);
                        },
                        Arc::new(true),
                    );
                }
                // Plain submission.
                1 => {
                    let executed = Arc::clone(&executed);
                    sched.submit(group, priority, move || {
                        executed.fetch_add(1, Ordering::Relaxed);
                    });
                }
                // Cancel everything cancellable in one group.
                _ => {
                    sched.cancel(|name, param| {
                        name == group
                            && param.and_then(|p| p.downcast_ref::<bool>()).copied()
                                == Some(true)
                    });
                }
            }
        }
        sched.process(false).unwrap();
        let stats = sched.stats_snapshot();
        let mut total_completed = 0_u64;
        for group in groups {
            if let Some(stat) = stats.get(group) {
                prop_assert_eq!(stat.queued, 0);
                prop_assert_eq!(
                    stat.submitted,
                    stat.completed + stat.cancelled
                );
                total_completed += stat.completed;
            }
        }
        prop_assert_eq!(total_completed as usize, executed.load(Ordering::Relaxed));
    }
}
