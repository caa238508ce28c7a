//! Three-valued outcome type with severity lattice.
//!
//! The outcome type represents the terminal result of a submitted task:
//!
//! - `Ok(T)`: the task body ran to completion
//! - `Cancelled(CancelReason)`: the task was cancelled before or during its run
//! - `Failed(FailurePayload)`: the task body panicked
//!
//! These form a severity lattice: `Ok < Cancelled < Failed`. A failed task
//! never takes its queue, its domain, or the worker pool down with it; the
//! failure travels to whoever observes the outcome.

use super::cancel::CancelReason;
use crate::error::Error;
use core::fmt;
use std::any::Any;

/// Payload from a caught task failure.
///
/// Wraps the panic value for safe transport across task boundaries.
#[derive(Debug, Clone)]
pub struct FailurePayload {
    message: String,
}

impl FailurePayload {
    /// Creates a new failure payload with the given message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Extracts a message from a caught panic value.
    ///
    /// String and `&str` payloads are preserved verbatim; anything else gets
    /// a generic description.
    #[must_use]
    pub fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "task panicked with a non-string payload".to_string()
        };
        Self { message }
    }

    /// Returns the failure message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for FailurePayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task failed: {}", self.message)
    }
}

/// The three-valued terminal outcome of a submitted task.
///
/// Forms a severity lattice where worse outcomes dominate:
/// `Ok < Cancelled < Failed`
#[derive(Debug, Clone)]
pub enum Outcome<T> {
    /// The task body ran to completion.
    Ok(T),
    /// The task was cancelled.
    Cancelled(CancelReason),
    /// The task body panicked.
    Failed(FailurePayload),
}

impl<T> Outcome<T> {
    /// Returns the severity level of this outcome (0 = Ok, 2 = Failed).
    #[must_use]
    pub const fn severity(&self) -> u8 {
        match self {
            Self::Ok(_) => 0,
            Self::Cancelled(_) => 1,
            Self::Failed(_) => 2,
        }
    }

    /// Returns true if this outcome is `Ok`.
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }

    /// Returns true if this outcome is `Cancelled`.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    /// Returns true if this outcome is `Failed`.
    #[must_use]
    pub const fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    /// Converts this outcome to a standard Result, with cancellation and
    /// failure as errors.
    pub fn into_result(self) -> Result<T, Error> {
        match self {
            Self::Ok(v) => Ok(v),
            Self::Cancelled(r) => Err(Error::Cancelled(r)),
            Self::Failed(p) => Err(Error::TaskFailed(p)),
        }
    }

    /// Maps the success value using the provided function.
    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Outcome<U> {
        match self {
            Self::Ok(v) => Outcome::Ok(f(v)),
            Self::Cancelled(r) => Outcome::Cancelled(r),
            Self::Failed(p) => Outcome::Failed(p),
        }
    }

    /// Returns the success value or panics.
    ///
    /// # Panics
    ///
    /// Panics if the outcome is not `Ok`.
    #[track_caller]
    pub fn unwrap(self) -> T {
        match self {
            Self::Ok(v) => v,
            Self::Cancelled(r) => {
                panic!("called `Outcome::unwrap()` on a `Cancelled` value: {r}")
            }
            Self::Failed(p) => panic!("called `Outcome::unwrap()` on a `Failed` value: {p}"),
        }
    }

    /// Returns the success value or a default.
    pub fn unwrap_or(self, default: T) -> T {
        match self {
            Self::Ok(v) => v,
            _ => default,
        }
    }

    /// Returns the success value or computes it from a closure.
    pub fn unwrap_or_else<F: FnOnce() -> T>(self, f: F) -> T {
        match self {
            Self::Ok(v) => v,
            _ => f(),
        }
    }

    /// Borrows the success value, if any.
    #[must_use]
    pub const fn as_ok(&self) -> Option<&T> {
        match self {
            Self::Ok(v) => Some(v),
            _ => None,
        }
    }
}
