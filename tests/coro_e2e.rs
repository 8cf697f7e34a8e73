//! End-to-end coroutine scenarios: awaited chains resumed through the
//! scheduler, blocking waits and generator/task interplay.
//!
//! Every test here drives the process-wide scheduler, so they serialize on
//! [`global_scheduler_lock`] (a `process` drain is single-flight).

use foreman::coro::{Generator, Task, FINAL_SUSPEND_GROUP};
use foreman::test_utils::{env_lock, global_scheduler_lock, init_test_logging};
use foreman::Scheduler;

/// The global scheduler, forced to a pool large enough for nested use
/// regardless of the host's core count.
fn global_scheduler() -> &'static Scheduler {
    init_test_logging();
    let _env = env_lock();
    std::env::set_var(foreman::ENV_WORKERS, "4");
    let sched = Scheduler::global();
    std::env::remove_var(foreman::ENV_WORKERS);
    sched
}

#[test]
fn awaited_task_chain_resumes_through_the_scheduler() {
    let _serial = global_scheduler_lock();
    let sched = global_scheduler();

    let mut outer = Task::new(async {
        let inner = Task::new(async { 1 });
        let value = inner.join().await;
        value + 1
    });
    outer.resume();
    sched.process(false).unwrap();
    assert!(outer.done());
    assert_eq!(outer.result(), 2);
}

#[test]
fn deep_chain_unwinds_between_hops() {
    let _serial = global_scheduler_lock();
    let sched = global_scheduler();

    let mut outer = Task::new(async {
        let mid = Task::new(async {
            let leaf = Task::new(async { 40 });
            leaf.join().await + 1
        });
        mid.join().await + 1
    });
    outer.resume();
    sched.process(false).unwrap();
    assert!(outer.done());
    assert_eq!(outer.result(), 42);

    // The continuation hops are ordinary scheduled tasks and show up in
    // the pool's statistics.
    let stats = sched.stats_snapshot();
    let hops = stats.get(FINAL_SUSPEND_GROUP).copied().unwrap();
    assert!(hops.completed >= 2);
    assert_eq!(hops.queued, 0);
}

#[test]
fn wait_blocks_until_the_value_arrives() {
    let _serial = global_scheduler_lock();
    let _sched = global_scheduler();

    let task = Task::new(async { 6 * 7 });
    assert_eq!(task.wait(), 42);
}

#[test]
fn wait_after_awaited_chain() {
    let _serial = global_scheduler_lock();
    let _sched = global_scheduler();

    let task = Task::new(async {
        let inner = Task::new(async { String::from("chained") });
        inner.join().await
    });
    assert_eq!(task.wait(), "chained");
}

#[test]
fn generator_feeds_scheduled_work() {
    let _serial = global_scheduler_lock();
    let sched = global_scheduler();

    let gen = Generator::new(|yielder| async move {
        for i in 1_u64..=8 {
            yielder.yield_value(i * i).await;
        }
    });
    let total = std::sync::Arc::new(std::sync::atomic::AtomicU64::new(0));
    while gen.resume() {
        let value = gen.result();
        let total = std::sync::Arc::clone(&total);
        sched.submit("squares", 1, move || {
            total.fetch_add(value, std::sync::atomic::Ordering::Relaxed);
        });
    }
    sched.process(false).unwrap();
    assert_eq!(total.load(std::sync::atomic::Ordering::Relaxed), 204);
}
