//! Stackless coroutine primitives integrated with the scheduler.
//!
//! Two primitives are provided:
//!
//! - [`Generator<T>`]: a pull-based lazy sequence. The consumer calls
//!   [`resume`](Generator::resume) to advance the body to its next yield
//!   and [`result`](Generator::result) to move the value out.
//! - [`Task<T>`]: a single-shot awaitable. Awaiting one task from another
//!   chains frames; a completed frame resumes its awaiter by submitting a
//!   task to the global [`Scheduler`](crate::scheduler::Scheduler) (group
//!   [`FINAL_SUSPEND_GROUP`], priority [`FINAL_SUSPEND_PRIORITY`]) rather
//!   than resuming inline, so the stack unwinds between steps regardless
//!   of await depth.
//!
//! External event sources (I/O callbacks, timers) resume a suspended
//! coroutine through [`ExternalTask`], whose action receives the frame's
//! waker.
//!
//! # Example
//!
//! ```
//! use foreman::coro::Task;
//!
//! let mut task = Task::new(async { 7 * 6 });
//! task.resume();
//! assert!(task.done());
//! assert_eq!(task.result(), 42);
//! ```

mod frame;
mod generator;
mod task;

pub use frame::{FINAL_SUSPEND_GROUP, FINAL_SUSPEND_PRIORITY};
pub use generator::{Generator, YieldFuture, Yielder};
pub use task::{Join, Task};

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll, Waker};

/// An awaitable bridging a coroutine to an external event source.
///
/// The first poll hands the coroutine's waker to the action and suspends;
/// whoever wakes it resumes the coroutine past this point. There is no
/// ready shortcut: the coroutine always suspends at least once.
pub struct ExternalTask {
    action: Option<Box<dyn FnOnce(Waker) + Send>>,
}

impl ExternalTask {
    /// Creates an awaitable that passes the suspended coroutine's waker to
    /// `action`.
    pub fn new(action: impl FnOnce(Waker) + Send + 'static) -> Self {
        Self {
            action: Some(Box::new(action)),
        }
    }
}

impl Future for ExternalTask {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        match self.action.take() {
            Some(action) => {
                action(cx.waker().clone());
                Poll::Pending
            }
            None => Poll::Ready(()),
        }
    }
}

impl std::fmt::Debug for ExternalTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExternalTask")
            .field("suspended", &self.action.is_none())
            .finish()
    }
}

/// An awaitable that hands the current frame's waker to `action` and
/// completes immediately, for coroutines that need to park themselves
/// somewhere before suspending on a later await.
pub fn capture_waker(action: impl FnOnce(Waker) + Send + 'static) -> WakerCapture {
    WakerCapture {
        action: Some(Box::new(action)),
    }
}

/// Future returned by [`capture_waker`].
pub struct WakerCapture {
    action: Option<Box<dyn FnOnce(Waker) + Send>>,
}

impl Future for WakerCapture {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if let Some(action) = self.action.take() {
            action(cx.waker().clone());
        }
        Poll::Ready(())
    }
}
