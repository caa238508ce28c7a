//! Shared helpers for unit and integration tests.
//!
//! Call [`init_test_logging`] at the top of a test to get tracing output
//! captured by the test harness. The `test_phase!`, `test_section!` and
//! `test_complete!` macros mark progress in long conformance tests so a
//! failure's log shows where it happened. `assert_with_log!` records the
//! assertion either way; the `assert_outcome_*!` macros destructure an
//! [`Outcome`](crate::types::Outcome) and panic with the full value when
//! the variant is wrong.

use std::sync::Once;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// Initializes test logging at debug level. Safe to call repeatedly.
pub fn init_test_logging() {
    init_test_logging_with_level(tracing::Level::DEBUG);
}

/// Initializes test logging at the given level.
///
/// `RUST_LOG` takes precedence when set. Output goes through the test
/// writer so it is captured per test and shown only on failure.
pub fn init_test_logging_with_level(level: tracing::Level) {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(format!("seriate={level}")));
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_file(true)
            .with_line_number(true)
            .with_target(true)
            .with_thread_ids(true)
            .with_span_events(FmtSpan::CLOSE)
            .with_ansi(false)
            .try_init()
            .ok();
    });
}

/// Serializes tests that mutate process environment variables.
pub fn env_lock() -> std::sync::MutexGuard<'static, ()> {
    static LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
    LOCK.lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Marks the start of a test phase in the captured log.
#[macro_export]
macro_rules! test_phase {
    ($name:expr) => {
        tracing::info!("======== PHASE: {} ========", $name);
    };
}

/// Marks a smaller step inside a phase.
#[macro_export]
macro_rules! test_section {
    ($name:expr) => {
        tracing::info!("-------- {} --------", $name);
    };
}

/// Marks a test as finished in the captured log.
#[macro_export]
macro_rules! test_complete {
    ($name:expr) => {
        tracing::info!("======== COMPLETE: {} ========", $name);
    };
}

/// Asserts a condition, logging the check and its result.
#[macro_export]
macro_rules! assert_with_log {
    ($cond:expr, $msg:expr) => {
        if $cond {
            tracing::debug!("ok: {}", $msg);
        } else {
            tracing::error!("FAILED: {}", $msg);
            panic!("assertion failed: {}", $msg);
        }
    };
    ($cond:expr, $msg:expr, $($arg:tt)+) => {
        if $cond {
            tracing::debug!("ok: {}", format_args!($msg, $($arg)+));
        } else {
            tracing::error!("FAILED: {}", format_args!($msg, $($arg)+));
            panic!("assertion failed: {}", format_args!($msg, $($arg)+));
        }
    };
}

/// Destructures an `Ok` outcome, returning its value.
#[macro_export]
macro_rules! assert_outcome_ok {
    ($outcome:expr) => {
        match $outcome {
            $crate::Outcome::Ok(value) => value,
            other => panic!("expected Ok outcome, got {other:?}"),
        }
    };
}

/// Destructures a `Cancelled` outcome, returning its reason.
#[macro_export]
macro_rules! assert_outcome_cancelled {
    ($outcome:expr) => {
        match $outcome {
            $crate::Outcome::Cancelled(reason) => reason,
            other => panic!("expected Cancelled outcome, got {other:?}"),
        }
    };
}

/// Destructures a `Failed` outcome, returning its payload.
#[macro_export]
macro_rules! assert_outcome_failed {
    ($outcome:expr) => {
        match $outcome {
            $crate::Outcome::Failed(payload) => payload,
            other => panic!("expected Failed outcome, got {other:?}"),
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logging_init_is_idempotent() {
        init_test_logging();
        init_test_logging();
        tracing::debug!("still here");
    }

    #[test]
    fn outcome_macros_destructure() {
        use crate::types::{CancelKind, CancelReason, FailurePayload, Outcome};

        let value = assert_outcome_ok!(Outcome::<u32>::Ok(3));
        assert_eq!(value, 3);

        let reason =
            assert_outcome_cancelled!(Outcome::<u32>::Cancelled(CancelReason::shutdown()));
        assert_eq!(reason.kind(), CancelKind::Shutdown);

        let payload = assert_outcome_failed!(Outcome::<u32>::Failed(FailurePayload::new("x")));
        assert_eq!(payload.message(), "x");
    }
}
