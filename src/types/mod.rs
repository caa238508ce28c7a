//! Core types for the Seriate runtime.
//!
//! This module contains the fundamental types used throughout the runtime:
//!
//! - [`id`]: Identifier types (`QueueId`, `TaskId`, `DomainId`)
//! - [`outcome`]: Three-valued outcome type with severity lattice
//! - [`cancel`]: Cancellation reason and kind types

pub mod cancel;
pub mod id;
pub mod outcome;

pub use cancel::{CancelKind, CancelReason};
pub use id::{DomainId, QueueId, TaskId};
pub use outcome::{FailurePayload, Outcome};
