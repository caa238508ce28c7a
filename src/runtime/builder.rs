//! Fluent construction of a [`Runtime`].

use crate::error::{Error, Result};
use crate::runtime::config::RuntimeConfig;
use crate::runtime::queue::ReentrancyPolicy;
use crate::runtime::Runtime;
use std::time::Duration;

/// Builder for a [`Runtime`].
///
/// Obtained from [`Runtime::builder`]. Every setter has a sensible default;
/// see [`RuntimeConfig`] for the full table.
///
/// ```
/// use seriate::{ReentrancyPolicy, Runtime};
/// use std::time::Duration;
///
/// let runtime = Runtime::builder()
///     .worker_threads(2)
///     .idle_timeout(Duration::from_secs(1))
///     .reentrancy_policy(ReentrancyPolicy::Detect)
///     .build()
///     .unwrap();
/// # runtime.shutdown(Duration::from_secs(5));
/// ```
#[derive(Debug, Clone, Default)]
pub struct RuntimeBuilder {
    config: RuntimeConfig,
}

impl RuntimeBuilder {
    /// Starts from the built-in defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Preset: one worker, no growth. Every queue in the runtime shares a
    /// single thread, which makes interleavings easy to reason about in
    /// tests.
    #[must_use]
    pub fn single_worker() -> Self {
        Self::new().worker_threads(1).max_worker_threads(1)
    }

    /// Preset: sized for throughput. A floor of one worker per core and a
    /// longer idle timeout so bursts do not pay respawn costs.
    #[must_use]
    pub fn high_throughput() -> Self {
        Self::new().idle_timeout(Duration::from_secs(30))
    }

    /// Sets the worker floor: threads kept alive once spawned.
    #[must_use]
    pub fn worker_threads(mut self, count: usize) -> Self {
        self.config.worker_threads = count;
        self
    }

    /// Sets the worker ceiling.
    #[must_use]
    pub fn max_worker_threads(mut self, count: usize) -> Self {
        self.config.max_worker_threads = count;
        self
    }

    /// Sets the stack size for worker threads, in bytes.
    #[must_use]
    pub fn stack_size(mut self, bytes: usize) -> Self {
        self.config.stack_size = bytes;
        self
    }

    /// Sets the prefix used for worker thread names.
    #[must_use]
    pub fn thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.thread_name_prefix = prefix.into();
        self
    }

    /// Sets how long an above-floor worker idles before retiring.
    #[must_use]
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.idle_timeout = timeout;
        self
    }

    /// Enables or disables the pinned main domain.
    #[must_use]
    pub fn enable_main_domain(mut self, enabled: bool) -> Self {
        self.config.enable_main_domain = enabled;
        self
    }

    /// Sets the reentrancy policy for queues created by this runtime.
    #[must_use]
    pub fn reentrancy_policy(mut self, policy: ReentrancyPolicy) -> Self {
        self.config.reentrancy = policy;
        self
    }

    /// Applies `SERIATE_*` environment overrides on top of the current
    /// settings.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        self.config = self.config.with_env_overrides();
        self
    }

    /// Builds the runtime.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidConfig`] if either thread count was explicitly set
    /// to zero.
    pub fn build(self) -> Result<Runtime> {
        if self.config.worker_threads == 0 {
            return Err(Error::InvalidConfig {
                message: "worker_threads must be at least 1".to_string(),
            });
        }
        if self.config.max_worker_threads == 0 {
            return Err(Error::InvalidConfig {
                message: "max_worker_threads must be at least 1".to_string(),
            });
        }
        Ok(Runtime::with_config(self.config.normalized()))
    }
}
