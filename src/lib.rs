//! Seriate: serial execution queues, isolation domains, and bounded
//! concurrency on one shared worker pool.
//!
//! # Overview
//!
//! Seriate brings dispatch-queue structure to thread-pool concurrency. Work
//! is submitted to lightweight queues rather than to threads: a serial queue
//! runs its tasks one at a time in submission order, a concurrent queue runs
//! them in parallel with barrier fences, and every queue draws workers from
//! one shared, bounded pool. State that must never be touched concurrently
//! lives in an isolation domain, reachable only through that domain's serial
//! queue.
//!
//! # Core guarantees
//!
//! - **Serial order**: a serial queue is FIFO and never overlaps two tasks
//! - **Barriers**: a barrier task on a concurrent queue runs alone, after
//!   everything before it and before everything after it
//! - **Failure isolation**: a panicking task becomes a `Failed` outcome for
//!   its observer; the queue, the domain, and the pool keep running
//! - **Cancellation is a result, not a drop**: a task cancelled before it
//!   starts completes as `Cancelled`; a running task is never preempted
//! - **Deadlock fail-fast**: a reentrant synchronous submit on a queue that
//!   cannot make progress reports an error instead of hanging (policy)
//!
//! # Module structure
//!
//! - [`runtime`]: worker pool, queues, task handles, builder and config
//! - [`domain`]: isolation domains and bindings
//! - [`gate`]: bounded concurrency gate (FIFO counting semaphore)
//! - [`error`]: error taxonomy with category and recoverability
//! - [`types`]: identifiers, outcomes, cancellation reasons
//! - [`observability`]: metrics counters and snapshots
//! - [`test_utils`]: logging and assertion helpers for tests

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::doc_markdown)]

pub mod domain;
pub mod error;
pub mod gate;
pub mod observability;
pub mod runtime;
pub mod test_utils;
pub mod types;

// Re-exports for convenient access to core types
pub use domain::{Binding, Domain};
pub use error::{Error, ErrorCategory, Recoverability, Result};
pub use gate::{ConcurrencyGate, GatePermit};
pub use observability::{MetricsSnapshot, RuntimeMetrics};
pub use runtime::{
    Queue, QueueKind, ReentrancyPolicy, Runtime, RuntimeBuilder, RuntimeConfig, TaskContext,
    TaskHandle,
};
pub use types::{CancelKind, CancelReason, DomainId, FailurePayload, Outcome, QueueId, TaskId};
