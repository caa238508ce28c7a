//! Shared worker pool and the pinned single-thread executor.
//!
//! All queues in a runtime dispatch onto one [`WorkerPool`]. The pool grows
//! lazily: a submission spawns a thread only when every live worker is busy
//! and the ceiling has not been reached. Workers above the configured floor
//! retire after sitting idle for the configured timeout, so a burst of work
//! does not leave threads around forever.
//!
//! Jobs are type-erased closures pushed onto a lock-free injector queue;
//! idle workers park on a condvar and are woken one at a time. A panic in a
//! job is caught and logged, never taking the worker down. Task-level panic
//! folding happens a layer above, so a panic reaching this code means queue
//! bookkeeping itself went wrong.
//!
//! [`PinnedWorker`] is the degenerate cousin: a single dedicated thread with
//! its own injector, used for the main domain so that every operation bound
//! to it runs on one well-known thread.

use crate::observability::RuntimeMetrics;
use crate::runtime::config::RuntimeConfig;
use crossbeam_queue::SegQueue;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// A type-erased unit of work dispatched to an executor.
pub(crate) type Runnable = Box<dyn FnOnce() + Send + 'static>;

struct PoolInner {
    min_threads: usize,
    max_threads: usize,
    stack_size: usize,
    thread_name_prefix: String,
    idle_timeout: Duration,
    injector: SegQueue<Runnable>,
    active_threads: AtomicUsize,
    busy_threads: AtomicUsize,
    pending_count: AtomicUsize,
    name_counter: AtomicUsize,
    shutdown: AtomicBool,
    park_lock: Mutex<()>,
    park_condvar: Condvar,
    thread_handles: Mutex<Vec<JoinHandle<()>>>,
    metrics: Arc<RuntimeMetrics>,
}

impl PoolInner {
    fn drain_inline(&self) {
        while let Some(job) = self.injector.pop() {
            self.pending_count.fetch_sub(1, Ordering::SeqCst);
            job();
        }
    }
}

fn execute_on_inner(inner: &Arc<PoolInner>, job: Runnable) {
    if inner.shutdown.load(Ordering::SeqCst) {
        tracing::warn!("job submitted after pool shutdown; running on the caller");
        job();
        return;
    }
    inner.injector.push(job);
    inner.pending_count.fetch_add(1, Ordering::SeqCst);
    // A shutdown may have landed between the check and the push. If the
    // workers are already gone nothing will drain the injector, so do it
    // here to keep the all-jobs-run guarantee.
    if inner.shutdown.load(Ordering::SeqCst) && inner.active_threads.load(Ordering::SeqCst) == 0 {
        inner.drain_inline();
        return;
    }
    maybe_spawn_worker(inner);
    let _guard = inner.park_lock.lock().expect("pool park lock poisoned");
    inner.park_condvar.notify_one();
}

/// Spawns a worker when all live workers are busy and work is waiting.
fn maybe_spawn_worker(inner: &Arc<PoolInner>) {
    loop {
        if inner.shutdown.load(Ordering::SeqCst) {
            return;
        }
        let active = inner.active_threads.load(Ordering::SeqCst);
        if active >= inner.max_threads {
            return;
        }
        let busy = inner.busy_threads.load(Ordering::SeqCst);
        if busy < active || inner.pending_count.load(Ordering::SeqCst) == 0 {
            return;
        }
        if inner
            .active_threads
            .compare_exchange(active, active + 1, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            spawn_worker(inner);
            return;
        }
    }
}

fn spawn_worker(inner: &Arc<PoolInner>) {
    let index = inner.name_counter.fetch_add(1, Ordering::SeqCst);
    let name = format!("{}-{index}", inner.thread_name_prefix);
    let loop_inner = Arc::clone(inner);
    let handle = thread::Builder::new()
        .name(name)
        .stack_size(inner.stack_size)
        .spawn(move || worker_loop(&loop_inner))
        .expect("failed to spawn worker thread");
    inner.metrics.workers_spawned.increment();
    inner.metrics.workers_active.increment();
    inner
        .thread_handles
        .lock()
        .expect("pool handle lock poisoned")
        .push(handle);
}

fn worker_loop(inner: &Arc<PoolInner>) {
    loop {
        if let Some(job) = inner.injector.pop() {
            inner.pending_count.fetch_sub(1, Ordering::SeqCst);
            inner.busy_threads.fetch_add(1, Ordering::SeqCst);
            inner.metrics.workers_busy.increment();
            let outcome = catch_unwind(AssertUnwindSafe(job));
            inner.busy_threads.fetch_sub(1, Ordering::SeqCst);
            inner.metrics.workers_busy.decrement();
            if outcome.is_err() {
                tracing::error!("worker job panicked; the worker continues");
            }
            continue;
        }
        if inner.shutdown.load(Ordering::SeqCst) {
            break;
        }
        let guard = inner.park_lock.lock().expect("pool park lock poisoned");
        // Re-check with the lock held so a submission racing the park cannot
        // strand its job.
        if !inner.injector.is_empty() || inner.shutdown.load(Ordering::SeqCst) {
            drop(guard);
            continue;
        }
        if inner.active_threads.load(Ordering::SeqCst) > inner.min_threads {
            let (guard, result) = inner
                .park_condvar
                .wait_timeout(guard, inner.idle_timeout)
                .expect("pool park lock poisoned");
            let retire = result.timed_out()
                && inner.injector.is_empty()
                && !inner.shutdown.load(Ordering::SeqCst)
                && inner.active_threads.load(Ordering::SeqCst) > inner.min_threads;
            if retire {
                // Decrement under the lock so two idle workers timing out
                // together cannot both leave and sink below the floor.
                inner.active_threads.fetch_sub(1, Ordering::SeqCst);
                inner.metrics.workers_active.decrement();
                inner.metrics.workers_retired.increment();
                drop(guard);
                tracing::debug!("idle worker retired");
                return;
            }
            drop(guard);
        } else {
            drop(
                inner
                    .park_condvar
                    .wait(guard)
                    .expect("pool park lock poisoned"),
            );
        }
    }
    inner.active_threads.fetch_sub(1, Ordering::SeqCst);
    inner.metrics.workers_active.decrement();
}

/// Owner of the shared worker pool.
///
/// The runtime holds exactly one; queues receive cheap [`WorkerPoolHandle`]
/// clones. Dropping the owner shuts the pool down and waits briefly for the
/// workers to exit.
pub(crate) struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl WorkerPool {
    pub(crate) fn new(config: &RuntimeConfig, metrics: Arc<RuntimeMetrics>) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                min_threads: config.worker_threads,
                max_threads: config.max_worker_threads,
                stack_size: config.stack_size,
                thread_name_prefix: config.thread_name_prefix.clone(),
                idle_timeout: config.idle_timeout,
                injector: SegQueue::new(),
                active_threads: AtomicUsize::new(0),
                busy_threads: AtomicUsize::new(0),
                pending_count: AtomicUsize::new(0),
                name_counter: AtomicUsize::new(0),
                shutdown: AtomicBool::new(false),
                park_lock: Mutex::new(()),
                park_condvar: Condvar::new(),
                thread_handles: Mutex::new(Vec::new()),
                metrics,
            }),
        }
    }

    pub(crate) fn handle(&self) -> WorkerPoolHandle {
        WorkerPoolHandle {
            inner: Arc::clone(&self.inner),
        }
    }

    #[cfg(test)]
    fn execute(&self, job: Runnable) {
        execute_on_inner(&self.inner, job);
    }

    /// Signals every worker to exit once the injector is empty.
    pub(crate) fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        let _guard = self
            .inner
            .park_lock
            .lock()
            .expect("pool park lock poisoned");
        self.inner.park_condvar.notify_all();
    }

    /// Shuts down and waits for all workers to exit, up to `timeout`.
    ///
    /// Returns `true` if the pool drained within the deadline. Accepted jobs
    /// still queued after the workers exit are run on the calling thread.
    pub(crate) fn shutdown_and_wait(&self, timeout: Duration) -> bool {
        self.shutdown();
        let deadline = Instant::now() + timeout;
        while self.inner.active_threads.load(Ordering::SeqCst) > 0 {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(10));
            let _guard = self
                .inner
                .park_lock
                .lock()
                .expect("pool park lock poisoned");
            self.inner.park_condvar.notify_all();
        }
        let handles = {
            let mut slot = self
                .inner
                .thread_handles
                .lock()
                .expect("pool handle lock poisoned");
            std::mem::take(&mut *slot)
        };
        for handle in handles {
            let _ = handle.join();
        }
        self.inner.drain_inline();
        true
    }

    pub(crate) fn active_threads(&self) -> usize {
        self.inner.active_threads.load(Ordering::SeqCst)
    }

    #[cfg(test)]
    fn busy_threads(&self) -> usize {
        self.inner.busy_threads.load(Ordering::SeqCst)
    }

    #[cfg(test)]
    fn pending_jobs(&self) -> usize {
        self.inner.pending_count.load(Ordering::SeqCst)
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if !self.shutdown_and_wait(Duration::from_secs(5)) {
            tracing::warn!("worker pool shutdown timed out; detaching remaining threads");
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("active", &self.inner.active_threads.load(Ordering::SeqCst))
            .field("busy", &self.inner.busy_threads.load(Ordering::SeqCst))
            .field("pending", &self.inner.pending_count.load(Ordering::SeqCst))
            .field("max", &self.inner.max_threads)
            .finish()
    }
}

/// Cheap cloneable handle used by queues to dispatch jobs.
#[derive(Clone)]
pub(crate) struct WorkerPoolHandle {
    inner: Arc<PoolInner>,
}

impl WorkerPoolHandle {
    pub(crate) fn execute(&self, job: Runnable) {
        execute_on_inner(&self.inner, job);
    }
}

impl std::fmt::Debug for WorkerPoolHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("WorkerPoolHandle")
    }
}

struct PinnedInner {
    injector: SegQueue<Runnable>,
    shutdown: AtomicBool,
    park_lock: Mutex<()>,
    park_condvar: Condvar,
    thread: Mutex<Option<JoinHandle<()>>>,
}

/// A single dedicated thread with its own job queue.
///
/// Backs the main domain: everything dispatched here runs on the same
/// thread, in submission order.
#[derive(Clone)]
pub(crate) struct PinnedWorker {
    inner: Arc<PinnedInner>,
}

impl PinnedWorker {
    pub(crate) fn new(name: &str) -> Self {
        let inner = Arc::new(PinnedInner {
            injector: SegQueue::new(),
            shutdown: AtomicBool::new(false),
            park_lock: Mutex::new(()),
            park_condvar: Condvar::new(),
            thread: Mutex::new(None),
        });
        let thread_inner = Arc::clone(&inner);
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || pinned_loop(&thread_inner))
            .expect("failed to spawn pinned thread");
        *inner.thread.lock().expect("pinned thread lock poisoned") = Some(handle);
        Self { inner }
    }

    pub(crate) fn execute(&self, job: Runnable) {
        if self.inner.shutdown.load(Ordering::SeqCst) {
            tracing::warn!("job submitted after pinned worker shutdown; running on the caller");
            job();
            return;
        }
        self.inner.injector.push(job);
        let _guard = self
            .inner
            .park_lock
            .lock()
            .expect("pinned park lock poisoned");
        self.inner.park_condvar.notify_one();
    }

    /// Shuts the thread down and waits for it to drain and exit.
    ///
    /// Safe to call from the pinned thread itself; in that case the join is
    /// skipped and the loop drains on its way out.
    pub(crate) fn shutdown_and_wait(&self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        {
            let _guard = self
                .inner
                .park_lock
                .lock()
                .expect("pinned park lock poisoned");
            self.inner.park_condvar.notify_all();
        }
        let handle = self
            .inner
            .thread
            .lock()
            .expect("pinned thread lock poisoned")
            .take();
        if let Some(handle) = handle {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            let _ = handle.join();
        }
        while let Some(job) = self.inner.injector.pop() {
            job();
        }
    }
}

impl std::fmt::Debug for PinnedWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PinnedWorker")
    }
}

fn pinned_loop(inner: &Arc<PinnedInner>) {
    loop {
        if let Some(job) = inner.injector.pop() {
            if catch_unwind(AssertUnwindSafe(job)).is_err() {
                tracing::error!("pinned job panicked; the thread continues");
            }
            continue;
        }
        if inner.shutdown.load(Ordering::SeqCst) {
            break;
        }
        let guard = inner.park_lock.lock().expect("pinned park lock poisoned");
        if !inner.injector.is_empty() || inner.shutdown.load(Ordering::SeqCst) {
            drop(guard);
            continue;
        }
        drop(
            inner
                .park_condvar
                .wait(guard)
                .expect("pinned park lock poisoned"),
        );
    }
}

/// Where a queue sends its ready tasks.
#[derive(Clone, Debug)]
pub(crate) enum Executor {
    /// The shared worker pool.
    Pool(WorkerPoolHandle),
    /// A dedicated pinned thread.
    Pinned(PinnedWorker),
}

impl Executor {
    pub(crate) fn execute(&self, job: Runnable) {
        match self {
            Self::Pool(handle) => handle.execute(job),
            Self::Pinned(worker) => worker.execute(job),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn test_config(min: usize, max: usize, idle_ms: u64) -> RuntimeConfig {
        RuntimeConfig {
            worker_threads: min,
            max_worker_threads: max,
            idle_timeout: Duration::from_millis(idle_ms),
            ..RuntimeConfig::default()
        }
        .normalized()
    }

    fn wait_for(timeout: Duration, mut pred: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if pred() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        pred()
    }

    #[test]
    fn executes_submitted_jobs() {
        let pool = WorkerPool::new(&test_config(1, 4, 500), Arc::new(RuntimeMetrics::new()));
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..32 {
            let counter = Arc::clone(&counter);
            pool.execute(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }));
        }
        assert!(wait_for(Duration::from_secs(5), || {
            counter.load(Ordering::SeqCst) == 32
        }));
        assert_eq!(pool.pending_jobs(), 0);
    }

    #[test]
    fn pool_respects_thread_ceiling() {
        let pool = WorkerPool::new(&test_config(1, 2, 500), Arc::new(RuntimeMetrics::new()));
        let concurrent = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let done = Arc::new(AtomicUsize::new(0));
        for _ in 0..6 {
            let concurrent = Arc::clone(&concurrent);
            let peak = Arc::clone(&peak);
            let done = Arc::clone(&done);
            pool.execute(Box::new(move || {
                let now = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(30));
                concurrent.fetch_sub(1, Ordering::SeqCst);
                done.fetch_add(1, Ordering::SeqCst);
            }));
        }
        assert!(wait_for(Duration::from_secs(5), || {
            done.load(Ordering::SeqCst) == 6
        }));
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert!(wait_for(Duration::from_secs(1), || pool.busy_threads() == 0));
    }

    #[test]
    fn worker_survives_panicking_job() {
        let pool = WorkerPool::new(&test_config(1, 1, 500), Arc::new(RuntimeMetrics::new()));
        let ran = Arc::new(AtomicUsize::new(0));

        pool.execute(Box::new(|| panic!("job blew up")));
        let ran_clone = Arc::clone(&ran);
        pool.execute(Box::new(move || {
            ran_clone.fetch_add(1, Ordering::SeqCst);
        }));

        assert!(wait_for(Duration::from_secs(5), || {
            ran.load(Ordering::SeqCst) == 1
        }));
        assert_eq!(pool.active_threads(), 1);
    }

    #[test]
    fn shutdown_drains_queued_jobs() {
        let pool = WorkerPool::new(&test_config(1, 2, 500), Arc::new(RuntimeMetrics::new()));
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..16 {
            let counter = Arc::clone(&counter);
            pool.execute(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }));
        }
        assert!(pool.shutdown_and_wait(Duration::from_secs(5)));
        assert_eq!(counter.load(Ordering::SeqCst), 16);
    }

    #[test]
    fn idle_workers_retire_to_floor() {
        let metrics = Arc::new(RuntimeMetrics::new());
        let pool = WorkerPool::new(&test_config(1, 4, 40), Arc::clone(&metrics));
        let release = Arc::new(AtomicBool::new(false));
        // Force the pool wide one blocked job at a time, so each submission
        // sees every live worker busy and spawns another.
        for n in 1..=3 {
            let release = Arc::clone(&release);
            pool.execute(Box::new(move || {
                while !release.load(Ordering::SeqCst) {
                    thread::sleep(Duration::from_millis(1));
                }
            }));
            assert!(wait_for(Duration::from_secs(5), || pool.busy_threads() == n));
        }
        assert_eq!(pool.active_threads(), 3);

        release.store(true, Ordering::SeqCst);
        assert!(wait_for(Duration::from_secs(5), || pool.busy_threads() == 0));
        // After the idle timeout the extras retire down to the floor.
        assert!(wait_for(Duration::from_secs(5), || pool.active_threads() == 1));
        assert!(metrics.workers_retired.get() >= 2);
    }

    #[test]
    fn pinned_worker_runs_everything_on_one_thread_in_order() {
        let worker = PinnedWorker::new("pinned-test");
        let order = Arc::new(Mutex::new(Vec::new()));
        let threads = Arc::new(Mutex::new(Vec::new()));
        for i in 0..8 {
            let order = Arc::clone(&order);
            let threads = Arc::clone(&threads);
            worker.execute(Box::new(move || {
                order.lock().unwrap().push(i);
                threads.lock().unwrap().push(thread::current().id());
            }));
        }
        assert!(wait_for(Duration::from_secs(5), || {
            order.lock().unwrap().len() == 8
        }));
        worker.shutdown_and_wait();
        assert_eq!(*order.lock().unwrap(), (0..8).collect::<Vec<_>>());
        let threads = threads.lock().unwrap();
        assert!(threads.windows(2).all(|pair| pair[0] == pair[1]));
    }

    #[test]
    fn pinned_worker_drains_on_shutdown() {
        let worker = PinnedWorker::new("pinned-drain");
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..16 {
            let counter = Arc::clone(&counter);
            worker.execute(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }));
        }
        worker.shutdown_and_wait();
        assert_eq!(counter.load(Ordering::SeqCst), 16);
    }
}
