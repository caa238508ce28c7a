//! Runtime configuration.
//!
//! [`RuntimeConfig`] collects every tunable of the runtime in one place.
//! Values come from three layers, later layers winning: built-in defaults,
//! programmatic settings via [`RuntimeBuilder`](crate::runtime::RuntimeBuilder),
//! and environment overrides applied by [`RuntimeConfig::with_env_overrides`].
//!
//! | Field                | Default                       | Env override                  |
//! |----------------------|-------------------------------|-------------------------------|
//! | `worker_threads`     | `available_parallelism()`     | `SERIATE_WORKER_THREADS`      |
//! | `max_worker_threads` | 64                            | `SERIATE_MAX_WORKER_THREADS`  |
//! | `stack_size`         | 2 MiB                         | `SERIATE_STACK_SIZE`          |
//! | `thread_name_prefix` | `seriate-worker`              | none                          |
//! | `idle_timeout`       | 10 s                          | `SERIATE_IDLE_TIMEOUT_MS`     |
//! | `enable_main_domain` | `true`                        | `SERIATE_MAIN_DOMAIN`         |
//! | `reentrancy`         | `Detect` (debug builds)       | `SERIATE_REENTRANCY`          |
//!
//! The 64-thread ceiling mirrors the classic thread-explosion cap: a burst
//! of blocking submissions grows the pool only up to this bound, after which
//! work queues up instead of spawning more threads.

use crate::runtime::queue::ReentrancyPolicy;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::time::Duration;

/// Hard default for the worker thread ceiling.
pub const DEFAULT_MAX_WORKER_THREADS: usize = 64;

/// Smallest stack size accepted for worker threads.
const MIN_STACK_SIZE: usize = 64 * 1024;

/// Configuration for a [`Runtime`](crate::runtime::Runtime).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Number of worker threads kept alive once spawned. Workers above this
    /// floor retire after `idle_timeout` without work.
    pub worker_threads: usize,
    /// Ceiling on pool size. Submissions beyond this queue up rather than
    /// spawning threads.
    pub max_worker_threads: usize,
    /// Stack size for worker threads, in bytes.
    pub stack_size: usize,
    /// Prefix for worker thread names.
    pub thread_name_prefix: String,
    /// How long a worker above the floor stays parked before retiring.
    pub idle_timeout: Duration,
    /// Whether the runtime starts the pinned main domain.
    pub enable_main_domain: bool,
    /// Default reentrancy policy for queues created by this runtime.
    pub reentrancy: ReentrancyPolicy,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            worker_threads: std::thread::available_parallelism().map_or(4, NonZeroUsize::get),
            max_worker_threads: DEFAULT_MAX_WORKER_THREADS,
            stack_size: 2 * 1024 * 1024,
            thread_name_prefix: "seriate-worker".to_string(),
            idle_timeout: Duration::from_secs(10),
            enable_main_domain: true,
            reentrancy: ReentrancyPolicy::default(),
        }
    }
}

impl RuntimeConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Clamps fields into usable ranges.
    ///
    /// The ceiling is raised to at least the floor, the floor to at least
    /// one thread, and the stack size to the platform minimum.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.worker_threads = self.worker_threads.max(1);
        self.max_worker_threads = self.max_worker_threads.max(self.worker_threads);
        self.stack_size = self.stack_size.max(MIN_STACK_SIZE);
        self
    }

    /// Applies environment variable overrides on top of the current values.
    ///
    /// Unparsable values are logged at warn level and ignored.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(value) = read_env_parsed::<usize>("SERIATE_WORKER_THREADS") {
            self.worker_threads = value;
        }
        if let Some(value) = read_env_parsed::<usize>("SERIATE_MAX_WORKER_THREADS") {
            self.max_worker_threads = value;
        }
        if let Some(value) = read_env_parsed::<usize>("SERIATE_STACK_SIZE") {
            self.stack_size = value;
        }
        if let Some(value) = read_env_parsed::<u64>("SERIATE_IDLE_TIMEOUT_MS") {
            self.idle_timeout = Duration::from_millis(value);
        }
        if let Some(value) = read_env_bool("SERIATE_MAIN_DOMAIN") {
            self.enable_main_domain = value;
        }
        if let Ok(raw) = std::env::var("SERIATE_REENTRANCY") {
            match raw.to_ascii_lowercase().as_str() {
                "detect" => self.reentrancy = ReentrancyPolicy::Detect,
                "hang" => self.reentrancy = ReentrancyPolicy::Hang,
                other => {
                    tracing::warn!(
                        value = other,
                        "ignoring SERIATE_REENTRANCY: expected `detect` or `hang`"
                    );
                }
            }
        }
        self
    }
}

fn read_env_parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(var = name, value = %raw, "ignoring unparsable environment override");
            None
        }
    }
}

fn read_env_bool(name: &str) -> Option<bool> {
    let raw = std::env::var(name).ok()?;
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" => Some(false),
        _ => {
            tracing::warn!(var = name, value = %raw, "ignoring unparsable environment override");
            None
        }
    }
}
