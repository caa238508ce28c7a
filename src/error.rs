//! Error types and error handling strategy for Seriate.
//!
//! Error handling follows these principles:
//!
//! - Errors are explicit and typed (no stringly-typed errors)
//! - Task panics are isolated and converted to `Outcome::Failed`; they reach
//!   the caller as [`Error::TaskFailed`], never as a crashed worker
//! - Errors are classified by recoverability for retry logic
//!
//! # Error Categories
//!
//! - **Task**: Failures of an individual task body
//! - **Cancellation**: A task was cancelled before completion
//! - **Queue**: Queue lifecycle and submission errors
//! - **Gate**: Admission gate errors
//! - **Runtime**: Runtime lifecycle errors
//!
//! Isolation violations (smuggling a reference to domain state out of its
//! domain) are a contract-violation class, not a runtime error: the `Send +
//! 'static` bounds on domain operations reject the shared-mutability types
//! that would make one expressible, so there is no variant for them here.

use crate::types::{CancelReason, FailurePayload};

/// The main error type for Seriate operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// The task body panicked. The panic was caught and recorded; the worker
    /// that ran the task is unaffected.
    #[error("{0}")]
    TaskFailed(FailurePayload),

    /// The task was cancelled before it completed.
    #[error("cancelled: {0}")]
    Cancelled(CancelReason),

    /// A blocking submission targeted a serial queue that is already
    /// executing on the calling thread. Without detection this is a
    /// guaranteed deadlock: the caller would wait for a queue that cannot
    /// advance until the caller returns.
    #[error("blocking submission to queue `{queue}` from a task already running on it would deadlock")]
    ReentrantDeadlock {
        /// Label of the queue involved.
        queue: String,
    },

    /// The target queue no longer accepts submissions.
    #[error("queue `{queue}` is closed")]
    QueueClosed {
        /// Label of the queue involved.
        queue: String,
    },

    /// The concurrency gate was closed while waiting or before acquiring.
    #[error("concurrency gate is closed")]
    GateClosed,

    /// A non-blocking acquire found no free permit (or earlier waiters).
    #[error("no permits available")]
    NoPermits,

    /// The runtime was built without a main domain.
    #[error("runtime was built without a main domain")]
    MainDomainDisabled,

    /// The runtime builder was given an unusable configuration.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// What was wrong with the configuration.
        message: String,
    },

    /// The runtime is shutting down and no longer accepts work.
    #[error("runtime is shutting down")]
    Shutdown,
}

impl Error {
    /// Returns the error category.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::TaskFailed(_) => ErrorCategory::Task,
            Self::Cancelled(_) => ErrorCategory::Cancellation,
            Self::ReentrantDeadlock { .. } | Self::QueueClosed { .. } => ErrorCategory::Queue,
            Self::GateClosed | Self::NoPermits => ErrorCategory::Gate,
            Self::MainDomainDisabled | Self::InvalidConfig { .. } | Self::Shutdown => {
                ErrorCategory::Runtime
            }
        }
    }

    /// Returns the recoverability classification.
    ///
    /// This helps retry logic decide whether to attempt recovery.
    #[must_use]
    pub const fn recoverability(&self) -> Recoverability {
        match self {
            // A free permit may appear at any moment.
            Self::NoPermits => Recoverability::Transient,

            // Programming errors and terminal lifecycle states.
            Self::Cancelled(_)
            | Self::ReentrantDeadlock { .. }
            | Self::QueueClosed { .. }
            | Self::GateClosed
            | Self::MainDomainDisabled
            | Self::InvalidConfig { .. }
            | Self::Shutdown => Recoverability::Permanent,

            // Whether a panicking task succeeds on retry depends on the task.
            Self::TaskFailed(_) => Recoverability::Unknown,
        }
    }

    /// Returns true if this error is typically retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self.recoverability(), Recoverability::Transient)
    }

    /// Returns true if this error represents cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    /// Returns true if this error carries a task failure.
    #[must_use]
    pub const fn is_task_failure(&self) -> bool {
        matches!(self, Self::TaskFailed(_))
    }

    /// Returns true if this error is a detected reentrant deadlock.
    #[must_use]
    pub const fn is_reentrant_deadlock(&self) -> bool {
        matches!(self, Self::ReentrantDeadlock { .. })
    }
}

/// High-level error category for grouping related errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Failures of an individual task body.
    Task,
    /// Cancellation of a task before completion.
    Cancellation,
    /// Queue lifecycle and submission failures.
    Queue,
    /// Admission gate failures.
    Gate,
    /// Runtime lifecycle failures.
    Runtime,
}

/// Classification of error recoverability for retry logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Recoverability {
    /// Temporary failure that may succeed on retry.
    Transient,
    /// Permanent failure that will not succeed on retry.
    Permanent,
    /// Recoverability depends on context and cannot be determined
    /// from the error alone.
    Unknown,
}

impl Recoverability {
    /// Returns true if this error is safe to retry.
    #[must_use]
    pub const fn should_retry(&self) -> bool {
        matches!(self, Self::Transient)
    }

    /// Returns true if this error should never be retried.
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent)
    }
}

/// A specialized Result type for Seriate operations.
pub type Result<T> = core::result::Result<T, Error>;
