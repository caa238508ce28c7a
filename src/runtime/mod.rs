//! The runtime: one worker pool, many queues, orderly shutdown.
//!
//! A [`Runtime`] owns the shared [worker pool](pool) every queue dispatches
//! onto, an optional pinned main domain, and a registry of the queues it
//! has created. Clones share the same runtime. Everything else in this
//! crate is created through it:
//!
//! - [`Runtime::serial_queue`] / [`Runtime::concurrent_queue`] for plain
//!   execution queues,
//! - [`Runtime::domain`] for isolated state,
//! - [`Runtime::gate`] for bounded concurrency,
//! - [`Runtime::main`] for the pinned main domain.
//!
//! [`Runtime::shutdown`] closes every queue (cancelling pending tasks),
//! drains the pinned thread, and waits for the pool to finish in-flight
//! work. Dropping the last runtime clone without calling `shutdown` drains
//! gracefully too, just without the cancellation sweep.

pub mod builder;
pub mod config;
pub(crate) mod pool;
pub mod queue;
pub mod task;

pub use builder::RuntimeBuilder;
pub use config::RuntimeConfig;
pub use queue::{Queue, QueueKind, ReentrancyPolicy};
pub use task::{TaskContext, TaskHandle};

use crate::domain::Domain;
use crate::error::{Error, Result};
use crate::gate::ConcurrencyGate;
use crate::observability::{MetricsSnapshot, RuntimeMetrics};
use crate::runtime::pool::{Executor, PinnedWorker, WorkerPool};
use crate::runtime::queue::WeakQueue;
use crate::types::CancelReason;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct RuntimeInner {
    config: RuntimeConfig,
    metrics: Arc<RuntimeMetrics>,
    queues: Mutex<Vec<WeakQueue>>,
    main_domain: Option<Domain<()>>,
    pinned: Option<PinnedWorker>,
    pool: WorkerPool,
    shutdown: AtomicBool,
}

impl Drop for RuntimeInner {
    fn drop(&mut self) {
        if let Some(pinned) = &self.pinned {
            pinned.shutdown_and_wait();
        }
    }
}

/// Handle to a task execution runtime.
///
/// Cheap to clone; all clones share one pool and one shutdown state.
///
/// # Examples
///
/// ```
/// let runtime = seriate::Runtime::builder().build().unwrap();
/// let queue = runtime.serial_queue("io");
///
/// let answer = queue.run_sync(|| 6 * 7).unwrap();
/// assert_eq!(answer, 42);
///
/// runtime.shutdown(std::time::Duration::from_secs(5));
/// ```
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

impl Runtime {
    /// Starts building a runtime.
    #[must_use]
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    pub(crate) fn with_config(config: RuntimeConfig) -> Self {
        let metrics = Arc::new(RuntimeMetrics::new());
        let pool = WorkerPool::new(&config, Arc::clone(&metrics));
        let mut registry = Vec::new();
        let (pinned, main_domain) = if config.enable_main_domain {
            let worker = PinnedWorker::new(&format!("{}-main", config.thread_name_prefix));
            let queue = Queue::new(
                "main",
                QueueKind::Serial,
                config.reentrancy,
                Executor::Pinned(worker.clone()),
                Arc::clone(&metrics),
            );
            registry.push(queue.downgrade());
            (Some(worker), Some(Domain::new("main", (), queue)))
        } else {
            (None, None)
        };
        tracing::debug!(
            workers = config.worker_threads,
            max_workers = config.max_worker_threads,
            main_domain = config.enable_main_domain,
            "runtime created"
        );
        Self {
            inner: Arc::new(RuntimeInner {
                config,
                metrics,
                queues: Mutex::new(registry),
                main_domain,
                pinned,
                pool,
                shutdown: AtomicBool::new(false),
            }),
        }
    }

    /// The configuration this runtime was built with, post-normalization.
    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    /// Creates a serial queue on the shared pool.
    pub fn serial_queue(&self, label: impl Into<String>) -> Queue {
        self.make_queue(label.into(), QueueKind::Serial)
    }

    /// Creates a concurrent queue on the shared pool.
    pub fn concurrent_queue(&self, label: impl Into<String>) -> Queue {
        self.make_queue(label.into(), QueueKind::Concurrent)
    }

    fn make_queue(&self, label: String, kind: QueueKind) -> Queue {
        let queue = Queue::new(
            label,
            kind,
            self.inner.config.reentrancy,
            Executor::Pool(self.inner.pool.handle()),
            Arc::clone(&self.inner.metrics),
        );
        // Queues created during or after shutdown are born closed.
        if self.inner.shutdown.load(Ordering::SeqCst) {
            queue.close_with(CancelReason::shutdown());
        }
        let mut registry = self.inner.queues.lock();
        registry.retain(|weak| weak.upgrade().is_some());
        registry.push(queue.downgrade());
        queue
    }

    /// Creates an isolation domain owning `initial`.
    ///
    /// The domain gets its own private serial queue on the shared pool.
    pub fn domain<S: Send + 'static>(&self, label: impl Into<String>, initial: S) -> Domain<S> {
        let label = label.into();
        let queue = self.make_queue(label.clone(), QueueKind::Serial);
        Domain::new(label, initial, queue)
    }

    /// The pinned main domain.
    ///
    /// Every operation submitted here runs on one dedicated thread, named
    /// after the worker prefix with a `-main` suffix. Use it for work that
    /// must always happen on the same thread.
    ///
    /// # Errors
    ///
    /// [`Error::MainDomainDisabled`] if the runtime was built with the main
    /// domain turned off.
    pub fn main(&self) -> Result<&Domain<()>> {
        self.inner
            .main_domain
            .as_ref()
            .ok_or(Error::MainDomainDisabled)
    }

    /// Creates a concurrency gate with `limit` permits.
    ///
    /// Gates are independent of queues; one gate may admit tasks from any
    /// number of them. Limits below one are raised to one.
    #[must_use]
    pub fn gate(&self, limit: usize) -> ConcurrencyGate {
        ConcurrencyGate::new(limit, Arc::clone(&self.inner.metrics))
    }

    /// A point-in-time snapshot of runtime counters.
    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    /// Returns true once [`shutdown`](Self::shutdown) has begun.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.load(Ordering::SeqCst)
    }

    /// Shuts the runtime down.
    ///
    /// Closes every live queue, cancelling their pending tasks with a
    /// shutdown reason while tasks already executing run to completion.
    /// Then drains the pinned main thread and waits up to `timeout` for the
    /// pool to go quiet. Returns `true` if everything stopped in time.
    /// Calling it again is harmless.
    pub fn shutdown(&self, timeout: Duration) -> bool {
        let first = !self.inner.shutdown.swap(true, Ordering::SeqCst);
        if first {
            tracing::info!("runtime shutting down");
        }
        let live: Vec<Queue> = {
            let registry = self.inner.queues.lock();
            registry.iter().filter_map(WeakQueue::upgrade).collect()
        };
        for queue in &live {
            queue.close_with(CancelReason::shutdown());
        }
        if let Some(pinned) = &self.inner.pinned {
            pinned.shutdown_and_wait();
        }
        let drained = self.inner.pool.shutdown_and_wait(timeout);
        if !drained {
            tracing::warn!("runtime shutdown timed out with workers still busy");
        }
        drained
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("workers", &self.inner.pool.active_threads())
            .field("shutdown", &self.inner.shutdown.load(Ordering::SeqCst))
            .finish()
    }
}
