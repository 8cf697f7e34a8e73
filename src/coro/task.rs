//! Single-shot awaitable coroutine.

use super::frame::Frame;
use std::future::Future;
use std::panic;
use std::pin::Pin;
use std::sync::mpsc;
use std::sync::Arc;
use std::task::{Context, Poll};

/// A lazily-started coroutine producing exactly one value.
///
/// The value owns its frame exclusively and is move-only: moving a `Task`
/// transfers the frame, dropping it destroys the frame (a pending
/// continuation hop keeps the frame alive until the hop has run).
///
/// A freshly created task is suspended; nothing runs until the first
/// [`resume`](Task::resume) or until an awaiting coroutine drives it. On
/// completion the awaiting coroutine is resumed *through the scheduler*
/// (see the [module docs](super)), so synchronous use outside a running
/// scheduler requires the caller to drive the scheduler itself.
pub struct Task<T> {
    frame: Arc<Frame<T>>,
}

impl<T: Send + 'static> Task<T> {
    /// Wraps a future as a suspended coroutine frame.
    pub fn new(future: impl Future<Output = T> + Send + 'static) -> Self {
        Self {
            frame: Frame::new(future),
        }
    }

    /// Advances the frame one step. No-op once the frame completed.
    pub fn resume(&self) {
        self.frame.resume();
    }

    /// Whether the frame has run to completion.
    #[must_use]
    pub fn done(&self) -> bool {
        self.frame.done()
    }

    /// Moves the produced value out of the frame.
    ///
    /// # Panics
    ///
    /// Re-raises a panic captured from the coroutine body; panics when the
    /// frame has not produced a value yet or the value was already taken.
    pub fn result(&mut self) -> T {
        match self.frame.take_result() {
            Some(Ok(value)) => value,
            Some(Err(payload)) => panic::resume_unwind(payload),
            None => panic!("result() called on a coroutine task without a pending value"),
        }
    }

    /// Returns an awaitable for this task's completion.
    ///
    /// Awaiting installs the current coroutine as the caller, resumes this
    /// task once and suspends; the completion hop resumes the caller, and
    /// the awaited value is moved out. A panic captured by this task is
    /// re-raised into the awaiting coroutine.
    pub fn join(&self) -> Join<'_, T> {
        Join {
            frame: &self.frame,
            started: false,
        }
    }

    /// Converts the task into a blocking call.
    ///
    /// Spawns a wrapper coroutine that awaits `self` and publishes the
    /// value, resumes it once and blocks until the value arrives. The
    /// completion hop runs on the global scheduler's workers, so the
    /// calling thread must not be one the pool needs to make progress;
    /// calling this from inside a task that exhausts the pool deadlocks.
    ///
    /// # Panics
    ///
    /// Panics when the coroutine failed instead of producing a value.
    pub fn wait(self) -> T {
        let (tx, rx) = mpsc::sync_channel(1);
        let wrapper = Task::new(async move {
            let value = self.join().await;
            let _ = tx.send(value);
        });
        wrapper.resume();
        match rx.recv() {
            Ok(value) => value,
            Err(_) => panic!("coroutine task failed before producing a value"),
        }
    }
}

impl<T> std::fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task").finish_non_exhaustive()
    }
}

/// Future returned by [`Task::join`].
pub struct Join<'a, T> {
    frame: &'a Arc<Frame<T>>,
    started: bool,
}

impl<T: Send + 'static> Join<'_, T> {
    fn finish(frame: &Arc<Frame<T>>) -> Poll<T> {
        match frame.take_result() {
            Some(Ok(value)) => Poll::Ready(value),
            Some(Err(payload)) => panic::resume_unwind(payload),
            None => panic!("awaited coroutine task completed without a value"),
        }
    }
}

impl<T: Send + 'static> Future for Join<'_, T> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<T> {
        let this = self.get_mut();
        if this.frame.done() {
            return Self::finish(this.frame);
        }
        this.frame.set_caller(cx.waker().clone());
        if !this.started {
            this.started = true;
            this.frame.resume();
        }
        // The frame may have completed while (or right before) the caller
        // was installed; re-check so the completion hop is not the only
        // path back here.
        if this.frame.done() {
            return Self::finish(this.frame);
        }
        Poll::Pending
    }
}
