//! Scheduled task value types.
//!
//! A [`ScheduledTask`] pairs a nullary action with the priority that orders
//! it in the queue, the group name under which it is counted and observed,
//! and an optional opaque parameter that cancellation predicates may
//! inspect. The scheduler itself never looks inside the parameter.

use std::any::Any;
use std::fmt;
use std::panic::Location;
use std::sync::Arc;

/// Opaque per-task parameter, inspected only by cancellation predicates.
pub type TaskParam = Arc<dyn Any + Send + Sync>;

/// The boxed action a task runs on a worker.
pub type TaskAction = Box<dyn FnOnce() + Send + 'static>;

/// A unit of work queued for execution.
///
/// Ordering is by `priority` alone; two tasks with equal priority compare
/// equal and their relative execution order is unspecified.
pub struct ScheduledTask {
    /// Queue priority; larger values run first.
    pub priority: i64,
    /// Group identifier for statistics and error routing. The shutdown
    /// report aggregates groups by the prefix before the first `:`.
    pub group: String,
    /// Opaque parameter made available to cancellation predicates.
    pub param: Option<TaskParam>,
    action: TaskAction,
}

impl ScheduledTask {
    /// Creates a task for `group` at `priority` running `action`.
    pub fn new(
        group: impl Into<String>,
        priority: i64,
        action: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            priority,
            group: group.into(),
            param: None,
            action: Box::new(action),
        }
    }

    /// Attaches an opaque parameter for cancellation predicates.
    #[must_use]
    pub fn with_param(mut self, param: TaskParam) -> Self {
        self.param = Some(param);
        self
    }

    /// Decomposes the task for execution or re-wrapping.
    pub(crate) fn into_parts(self) -> (i64, String, Option<TaskParam>, TaskAction) {
        (self.priority, self.group, self.param, self.action)
    }
}

impl fmt::Debug for ScheduledTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduledTask")
            .field("priority", &self.priority)
            .field("group", &self.group)
            .field("param", &self.param.is_some())
            .finish_non_exhaustive()
    }
}

impl PartialEq for ScheduledTask {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority
    }
}

impl Eq for ScheduledTask {}

impl PartialOrd for ScheduledTask {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledTask {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.priority.cmp(&other.priority)
    }
}

/// The value delivered to a group's error observer when a task panics.
///
/// Carries the identity of the failed task (its action has already been
/// consumed), the worker-side catch location and a formatted message.
pub struct ScheduledTaskError {
    location: &'static Location<'static>,
    priority: i64,
    group: String,
    param: Option<TaskParam>,
    message: String,
}

impl ScheduledTaskError {
    pub(crate) fn new(
        location: &'static Location<'static>,
        priority: i64,
        group: String,
        param: Option<TaskParam>,
        message: String,
    ) -> Self {
        Self {
            location,
            priority,
            group,
            param,
            message,
        }
    }

    /// The source location of the worker catch site.
    #[must_use]
    pub const fn location(&self) -> &'static Location<'static> {
        self.location
    }

    /// Priority of the failed task.
    #[must_use]
    pub const fn priority(&self) -> i64 {
        self.priority
    }

    /// Group of the failed task.
    #[must_use]
    pub fn group(&self) -> &str {
        &self.group
    }

    /// Parameter of the failed task, if any was attached.
    #[must_use]
    pub const fn param(&self) -> Option<&TaskParam> {
        self.param.as_ref()
    }

    /// The formatted failure message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for ScheduledTaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl fmt::Debug for ScheduledTaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduledTaskError")
            .field("group", &self.group)
            .field("priority", &self.priority)
            .field("message", &self.message)
            .field("location", &format_args!("{}", self.location))
            .finish()
    }
}

/// Renders a caught panic payload as text.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&'static str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
