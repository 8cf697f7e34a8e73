//! Error types for scheduler configuration and lifecycle failures.
//!
//! Failures of *submitted work* never surface here: a panicking task is
//! caught at the worker boundary, logged, offered to the group's error
//! observer and folded into the drain result. The [`Error`] type below
//! covers the caller-side failures only: misconfiguration, lifecycle
//! violations and the aggregate "some tasks failed" outcome of a drain.

use core::fmt;

/// The kind of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The resolved worker count was zero.
    NoWorkers,
    /// The `DT_WORKERS` environment variable held an unparseable value.
    InvalidEnv,
    /// An error observer was already installed for the group and `replace`
    /// was not requested.
    DuplicateObserver,
    /// An error observer was installed while the group had work in flight.
    ObserverAfterSubmit,
    /// A `process` call was made while another one was still draining.
    ReentrantProcess,
    /// A `wait_all` call was made while another one was still running.
    ConcurrentWaitAll,
    /// `wait_all` was called on a pool with fewer than four workers.
    WaitAllPoolTooSmall,
    /// One or more scheduled tasks failed during a drain.
    TasksFailed,
}

impl ErrorKind {
    /// A short static description of the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NoWorkers => "the number of worker threads must be greater than zero",
            Self::InvalidEnv => "invalid environment override",
            Self::DuplicateObserver => "error observer already set",
            Self::ObserverAfterSubmit => "error observer installed after task submission",
            Self::ReentrantProcess => "nested process call",
            Self::ConcurrentWaitAll => "concurrent wait_all call",
            Self::WaitAllPoolTooSmall => "wait_all requires a larger worker pool",
            Self::TasksFailed => "scheduled tasks failed",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The error type for scheduler operations.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    context: Option<String>,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            context: None,
        }
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Adds context text to the error.
    #[must_use]
    pub fn with_context(mut self, ctx: impl Into<String>) -> Self {
        self.context = Some(ctx.into());
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.context {
            Some(ctx) => write!(f, "{}: {ctx}", self.kind),
            None => write!(f, "{}", self.kind),
        }
    }
}

impl std::error::Error for Error {}

/// Convenience alias for results carrying a scheduler [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
