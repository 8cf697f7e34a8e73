//! The resumable frame backing both coroutine primitives.
//!
//! A frame owns a boxed future plus its value, captured-panic and caller
//! slots. The frame is its own waker: waking it polls the future exactly
//! one more step. A wake that arrives while a poll is in flight sets a
//! re-poll flag instead of recursing, which is what keeps external
//! resumption safe from any thread.
//!
//! When a frame completes *and a caller waker is installed*, it does not
//! wake the caller inline: it submits a task to the global scheduler
//! (group [`FINAL_SUSPEND_GROUP`], priority [`FINAL_SUSPEND_PRIORITY`])
//! whose action performs the wake. Resuming the continuation inline would
//! grow the stack linearly with await depth; routing through the scheduler
//! lets the worker unwind first.

use crate::scheduler::Scheduler;
use std::any::Any;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Wake, Waker};

/// Task group of the continuation hop submitted on frame completion.
pub const FINAL_SUSPEND_GROUP: &str = "final-suspend";

/// Priority of the continuation hop.
pub const FINAL_SUSPEND_PRIORITY: i64 = 100;

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

pub(crate) struct Frame<T> {
    state: Mutex<FrameState<T>>,
}

struct FrameState<T> {
    /// `None` while a poll is in flight or once the frame completed.
    future: Option<BoxFuture<T>>,
    value: Option<T>,
    panic: Option<Box<dyn Any + Send>>,
    caller: Option<Waker>,
    polling: bool,
    repoll: bool,
    done: bool,
}

impl<T: Send + 'static> Frame<T> {
    pub(crate) fn new(future: impl Future<Output = T> + Send + 'static) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(FrameState {
                future: Some(Box::pin(future)),
                value: None,
                panic: None,
                caller: None,
                polling: false,
                repoll: false,
                done: false,
            }),
        })
    }

    pub(crate) fn done(&self) -> bool {
        self.state.lock().unwrap().done
    }

    /// Installs the waker resumed by the completion hop.
    pub(crate) fn set_caller(&self, waker: Waker) {
        self.state.lock().unwrap().caller = Some(waker);
    }

    /// Moves the completed value or captured panic out of the frame.
    pub(crate) fn take_result(&self) -> Option<std::result::Result<T, Box<dyn Any + Send>>> {
        let mut state = self.state.lock().unwrap();
        if let Some(payload) = state.panic.take() {
            return Some(Err(payload));
        }
        state.value.take().map(Ok)
    }

    /// Moves a captured panic out without touching the value slot.
    pub(crate) fn take_panic(&self) -> Option<Box<dyn Any + Send>> {
        self.state.lock().unwrap().panic.take()
    }

    /// Advances the frame one step. No-op on a completed frame; a resume
    /// arriving while another is polling is deferred to that poller.
    pub(crate) fn resume(self: &Arc<Self>) {
        let mut future = {
            let mut state = self.state.lock().unwrap();
            if state.done {
                return;
            }
            if state.polling {
                state.repoll = true;
                return;
            }
            let Some(future) = state.future.take() else {
                return;
            };
            state.polling = true;
            future
        };
        let waker = Waker::from(Arc::clone(self));
        loop {
            let poll = panic::catch_unwind(AssertUnwindSafe(|| {
                let mut cx = Context::from_waker(&waker);
                future.as_mut().poll(&mut cx)
            }));
            let mut state = self.state.lock().unwrap();
            match poll {
                Ok(Poll::Pending) => {
                    if state.repoll {
                        // A wake raced with the poll; its step runs now.
                        state.repoll = false;
                        drop(state);
                        continue;
                    }
                    state.future = Some(future);
                    state.polling = false;
                    return;
                }
                Ok(Poll::Ready(value)) => {
                    state.value = Some(value);
                }
                Err(payload) => {
                    state.panic = Some(payload);
                }
            }
            state.done = true;
            state.polling = false;
            let caller = state.caller.take();
            drop(state);
            if let Some(caller) = caller {
                Scheduler::global().submit(FINAL_SUSPEND_GROUP, FINAL_SUSPEND_PRIORITY, move || {
                    caller.wake();
                });
            }
            return;
        }
    }
}

impl<T: Send + 'static> Wake for Frame<T> {
    fn wake(self: Arc<Self>) {
        self.resume();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.resume();
    }
}
