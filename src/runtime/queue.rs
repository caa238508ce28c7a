//! Serial and concurrent execution queues.
//!
//! A [`Queue`] is a lightweight dispatch surface over the shared worker
//! pool. It owns no thread. Instead it decides, per task, when the pool may
//! run it:
//!
//! - A **serial** queue admits one task at a time, in submission order. It
//!   is the mutual-exclusion primitive of this crate: state confined to a
//!   serial queue needs no lock.
//! - A **concurrent** queue admits any number of tasks at once, started in
//!   submission order, except around **barriers**. A barrier task waits for
//!   every earlier task to finish, runs alone, and only then lets later
//!   tasks proceed. On a serial queue a barrier degenerates to an ordinary
//!   task.
//!
//! [`Queue::run_sync`] is the blocking submission form. When the queue is
//! idle (and not pinned to a dedicated thread) the closure runs inline on
//! the calling thread with the queue claimed, skipping the pool round-trip.
//! Otherwise the caller enqueues normally and blocks until its turn.
//!
//! Blocking submission to a queue the calling thread is already executing
//! on cannot complete: the queue will not advance until the current task
//! returns. Each queue carries a [`ReentrancyPolicy`] deciding whether that
//! mistake fails fast with [`Error::ReentrantDeadlock`] or hangs the way a
//! raw dispatch system would.

use crate::error::{Error, Result};
use crate::observability::RuntimeMetrics;
use crate::runtime::pool::Executor;
use crate::runtime::task::{CancelCell, CompletionCell, TaskCell, TaskContext, TaskHandle};
use crate::types::{CancelReason, FailurePayload, QueueId, TaskId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// Admission discipline of a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueKind {
    /// One task at a time, in submission order.
    Serial,
    /// Tasks overlap freely between barriers.
    Concurrent,
}

impl std::fmt::Display for QueueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Serial => f.write_str("serial"),
            Self::Concurrent => f.write_str("concurrent"),
        }
    }
}

/// What a queue does when a blocking submission is guaranteed to deadlock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReentrancyPolicy {
    /// Fail fast with [`Error::ReentrantDeadlock`].
    Detect,
    /// Enqueue anyway and hang deterministically.
    Hang,
}

impl Default for ReentrancyPolicy {
    /// Debug builds detect, release builds hang.
    ///
    /// Detection costs a thread-local lookup per blocking submission, which
    /// release builds opt out of by default.
    fn default() -> Self {
        if cfg!(debug_assertions) {
            Self::Detect
        } else {
            Self::Hang
        }
    }
}

thread_local! {
    /// Queues the current thread is executing a task for, innermost last.
    static EXECUTING: RefCell<Vec<QueueId>> = const { RefCell::new(Vec::new()) };
}

/// RAII marker for "this thread is executing a task of queue X".
struct ExecutionGuard {
    queue_id: QueueId,
}

impl ExecutionGuard {
    fn enter(queue_id: QueueId) -> Self {
        EXECUTING.with(|stack| stack.borrow_mut().push(queue_id));
        Self { queue_id }
    }

    fn is_executing(queue_id: QueueId) -> bool {
        EXECUTING.with(|stack| stack.borrow().contains(&queue_id))
    }
}

impl Drop for ExecutionGuard {
    fn drop(&mut self) {
        EXECUTING.with(|stack| {
            let mut stack = stack.borrow_mut();
            if let Some(pos) = stack.iter().rposition(|id| *id == self.queue_id) {
                stack.remove(pos);
            }
        });
    }
}

struct QueueState {
    pending: VecDeque<TaskCell>,
    /// Tasks currently executing (including inline claims).
    running: usize,
    /// A barrier task is executing; nothing else may start.
    barrier_active: bool,
    closed: bool,
    /// Reason used to cancel submissions arriving after the close.
    close_reason: Option<CancelReason>,
}

struct QueueInner {
    id: QueueId,
    label: String,
    kind: QueueKind,
    policy: ReentrancyPolicy,
    executor: Executor,
    metrics: Arc<RuntimeMetrics>,
    state: Mutex<QueueState>,
}

impl QueueInner {
    /// Moves every admissible pending task into `ready`.
    ///
    /// On a concurrent queue the pending deque is only ever non-empty when
    /// a barrier is active or parked at the front; plain tasks never wait.
    fn schedule_locked(&self, state: &mut QueueState, ready: &mut Vec<TaskCell>) {
        match self.kind {
            QueueKind::Serial => {
                if state.running == 0 {
                    if let Some(cell) = state.pending.pop_front() {
                        state.running = 1;
                        ready.push(cell);
                    }
                }
            }
            QueueKind::Concurrent => loop {
                if state.barrier_active {
                    break;
                }
                let front_is_barrier = match state.pending.front() {
                    None => break,
                    Some(cell) => cell.is_barrier(),
                };
                if front_is_barrier {
                    if state.running == 0 {
                        if let Some(cell) = state.pending.pop_front() {
                            state.barrier_active = true;
                            state.running = 1;
                            ready.push(cell);
                        }
                    }
                    break;
                }
                if let Some(cell) = state.pending.pop_front() {
                    state.running += 1;
                    ready.push(cell);
                }
            },
        }
    }

    /// True when the executor binds tasks to a dedicated thread.
    ///
    /// Pinned queues never run closures inline: the whole point of pinning
    /// is that task code executes on that one thread.
    fn is_pinned(&self) -> bool {
        matches!(self.executor, Executor::Pinned(_))
    }
}

fn dispatch_all(inner: &Arc<QueueInner>, cells: Vec<TaskCell>) {
    for cell in cells {
        let run_inner = Arc::clone(inner);
        inner
            .executor
            .execute(Box::new(move || run_cell(&run_inner, cell)));
    }
}

fn run_cell(inner: &Arc<QueueInner>, cell: TaskCell) {
    let barrier = cell.is_barrier();
    {
        let _guard = ExecutionGuard::enter(inner.id);
        cell.run(inner.id);
    }
    task_finished(inner, barrier);
}

/// Releases one execution slot and dispatches whatever became runnable.
fn task_finished(inner: &Arc<QueueInner>, barrier: bool) {
    let mut ready = Vec::new();
    {
        let mut state = inner.state.lock();
        state.running -= 1;
        if barrier {
            state.barrier_active = false;
        }
        inner.schedule_locked(&mut state, &mut ready);
    }
    dispatch_all(inner, ready);
}

/// Enqueues a cell, or cancel-completes it if the queue is closed.
fn enqueue_cell(inner: &Arc<QueueInner>, cell: TaskCell) {
    let mut ready = Vec::new();
    let rejected = {
        let mut state = inner.state.lock();
        if state.closed {
            let reason = state
                .close_reason
                .clone()
                .unwrap_or_else(CancelReason::queue_closed);
            Some((cell, reason))
        } else {
            state.pending.push_back(cell);
            inner.schedule_locked(&mut state, &mut ready);
            None
        }
    };
    match rejected {
        Some((cell, reason)) => {
            tracing::debug!(queue = %inner.label, task = %cell.id(), "submission to closed queue cancelled");
            cell.cancel(reason);
            cell.run(inner.id);
        }
        None => dispatch_all(inner, ready),
    }
}

/// How a blocking submission will be executed.
enum SyncClaim {
    /// Queue idle and unpinned: run on the calling thread, queue claimed.
    Inline,
    /// Enqueue normally and wait.
    Queued,
    /// The calling thread is executing on this queue and waiting would
    /// deadlock.
    Reentrant,
}

/// A serial or concurrent execution queue.
///
/// Cloning is cheap and shares the queue. See the [module docs](self) for
/// the execution model.
#[derive(Clone)]
pub struct Queue {
    inner: Arc<QueueInner>,
}

impl Queue {
    pub(crate) fn new(
        label: impl Into<String>,
        kind: QueueKind,
        policy: ReentrancyPolicy,
        executor: Executor,
        metrics: Arc<RuntimeMetrics>,
    ) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                id: QueueId::next(),
                label: label.into(),
                kind,
                policy,
                executor,
                metrics,
                state: Mutex::new(QueueState {
                    pending: VecDeque::new(),
                    running: 0,
                    barrier_active: false,
                    closed: false,
                    close_reason: None,
                }),
            }),
        }
    }

    /// The unique identifier of this queue.
    #[must_use]
    pub fn id(&self) -> QueueId {
        self.inner.id
    }

    /// The label given at creation, used in errors and logs.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// The admission discipline of this queue.
    #[must_use]
    pub fn kind(&self) -> QueueKind {
        self.inner.kind
    }

    /// Returns true once the queue has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Submits a task and returns immediately.
    ///
    /// The closure runs on a pool worker once the queue admits it. The
    /// returned handle observes or cancels the task; dropping the handle
    /// detaches the task without cancelling it.
    pub fn submit<R, F>(&self, f: F) -> TaskHandle<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        self.submit_with(move |_cx| f())
    }

    /// Like [`submit`](Self::submit), passing the task its [`TaskContext`]
    /// for cooperative cancellation.
    pub fn submit_with<R, F>(&self, f: F) -> TaskHandle<R>
    where
        F: FnOnce(&TaskContext) -> R + Send + 'static,
        R: Send + 'static,
    {
        self.submit_cell(false, f)
    }

    /// Submits a barrier task.
    ///
    /// On a concurrent queue the barrier waits for all earlier tasks, runs
    /// alone, and releases later tasks when it finishes. On a serial queue
    /// this is identical to [`submit`](Self::submit).
    pub fn submit_barrier<R, F>(&self, f: F) -> TaskHandle<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        self.submit_barrier_with(move |_cx| f())
    }

    /// Like [`submit_barrier`](Self::submit_barrier), passing the task its
    /// [`TaskContext`].
    pub fn submit_barrier_with<R, F>(&self, f: F) -> TaskHandle<R>
    where
        F: FnOnce(&TaskContext) -> R + Send + 'static,
        R: Send + 'static,
    {
        self.submit_cell(true, f)
    }

    fn submit_cell<R, F>(&self, barrier: bool, f: F) -> TaskHandle<R>
    where
        F: FnOnce(&TaskContext) -> R + Send + 'static,
        R: Send + 'static,
    {
        let barrier = barrier && self.inner.kind == QueueKind::Concurrent;
        let (cell, handle) =
            TaskCell::new(self.inner.id, barrier, Arc::clone(&self.inner.metrics), f);
        self.inner.metrics.tasks_submitted.increment();
        enqueue_cell(&self.inner, cell);
        handle
    }

    /// Enqueues a task whose handle already exists.
    ///
    /// Used by the concurrency gate to submit the body of a deferred
    /// acquisition once its permit arrives. Honors any cancellation already
    /// requested through the pre-created handle.
    pub(crate) fn submit_prepared<R, F>(
        &self,
        task_id: TaskId,
        cancel: Arc<CancelCell>,
        completion: Arc<CompletionCell<R>>,
        f: F,
    ) where
        F: FnOnce(&TaskContext) -> R + Send + 'static,
        R: Send + 'static,
    {
        let cell = TaskCell::from_parts(
            task_id,
            false,
            cancel,
            completion,
            Arc::clone(&self.inner.metrics),
            f,
        );
        self.inner.metrics.tasks_submitted.increment();
        enqueue_cell(&self.inner, cell);
    }

    /// Submits a task and blocks until it completes, returning its value.
    ///
    /// When the queue is idle the closure runs directly on the calling
    /// thread with the queue claimed, skipping the worker pool. Queues
    /// pinned to a dedicated thread never take that shortcut.
    ///
    /// # Errors
    ///
    /// [`Error::ReentrantDeadlock`] if called from a task already executing
    /// on this queue under [`ReentrancyPolicy::Detect`];
    /// [`Error::QueueClosed`] if the queue is closed;
    /// [`Error::TaskFailed`] if the closure panicked;
    /// [`Error::Cancelled`] if the queue was closed while the task waited.
    pub fn run_sync<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        self.run_sync_with(move |_cx| f())
    }

    /// Like [`run_sync`](Self::run_sync), passing the task its
    /// [`TaskContext`].
    ///
    /// # Errors
    ///
    /// Same as [`run_sync`](Self::run_sync).
    pub fn run_sync_with<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&TaskContext) -> R + Send + 'static,
        R: Send + 'static,
    {
        let inner = &self.inner;
        let claim = {
            let mut state = inner.state.lock();
            if state.closed {
                return Err(Error::QueueClosed {
                    queue: inner.label.clone(),
                });
            }
            let idle = state.pending.is_empty()
                && !state.barrier_active
                && match inner.kind {
                    QueueKind::Serial => state.running == 0,
                    QueueKind::Concurrent => true,
                };
            if idle && !inner.is_pinned() {
                state.running += 1;
                SyncClaim::Inline
            } else if ExecutionGuard::is_executing(inner.id) {
                SyncClaim::Reentrant
            } else {
                SyncClaim::Queued
            }
        };
        match claim {
            SyncClaim::Inline => self.run_inline(f),
            SyncClaim::Queued => self.run_queued(f),
            SyncClaim::Reentrant => match inner.policy {
                ReentrancyPolicy::Detect => {
                    inner.metrics.reentrancy_detected.increment();
                    tracing::error!(
                        queue = %inner.label,
                        "blocking submission from a task on the same queue; failing fast"
                    );
                    Err(Error::ReentrantDeadlock {
                        queue: inner.label.clone(),
                    })
                }
                ReentrancyPolicy::Hang => {
                    tracing::warn!(
                        queue = %inner.label,
                        "blocking submission from a task on the same queue; this will hang"
                    );
                    self.run_queued(f)
                }
            },
        }
    }

    /// Runs a blocking submission on the calling thread, queue claimed.
    fn run_inline<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&TaskContext) -> R + Send + 'static,
        R: Send + 'static,
    {
        let inner = &self.inner;
        inner.metrics.tasks_submitted.increment();
        inner.metrics.sync_inline_runs.increment();
        let cancel = Arc::new(CancelCell::new());
        let cx = TaskContext::new(TaskId::next(), inner.id, cancel);
        let result = {
            let _guard = ExecutionGuard::enter(inner.id);
            catch_unwind(AssertUnwindSafe(|| f(&cx)))
        };
        task_finished(inner, false);
        match result {
            Ok(value) => {
                inner.metrics.tasks_completed.increment();
                Ok(value)
            }
            Err(panic) => {
                let payload = FailurePayload::from_panic(panic.as_ref());
                inner.metrics.tasks_failed.increment();
                Err(Error::TaskFailed(payload))
            }
        }
    }

    fn run_queued<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&TaskContext) -> R + Send + 'static,
        R: Send + 'static,
    {
        self.submit_with(f).join().into_result()
    }

    /// Closes the queue.
    ///
    /// Pending tasks complete as cancelled without running; tasks already
    /// executing finish normally. Later submissions complete as cancelled
    /// immediately, and later blocking submissions fail with
    /// [`Error::QueueClosed`]. Closing twice is a no-op.
    pub fn close(&self) {
        self.close_with(CancelReason::queue_closed());
    }

    pub(crate) fn close_with(&self, reason: CancelReason) {
        let drained = {
            let mut state = self.inner.state.lock();
            if state.closed {
                Vec::new()
            } else {
                state.closed = true;
                state.close_reason = Some(reason.clone());
                state.pending.drain(..).collect::<Vec<_>>()
            }
        };
        if !drained.is_empty() {
            tracing::debug!(
                queue = %self.inner.label,
                cancelled = drained.len(),
                "queue closed with pending tasks"
            );
        }
        for cell in drained {
            cell.cancel(reason.clone());
            cell.run(self.inner.id);
        }
    }
}

impl std::fmt::Debug for Queue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Queue")
            .field("id", &self.inner.id)
            .field("label", &self.inner.label)
            .field("kind", &self.inner.kind)
            .field("pending", &state.pending.len())
            .field("running", &state.running)
            .field("closed", &state.closed)
            .finish()
    }
}

/// Non-owning handle used by the runtime's queue registry.
///
/// Tasks in flight keep their queue alive on their own; the registry only
/// needs to find still-live queues at shutdown.
pub(crate) struct WeakQueue(std::sync::Weak<QueueInner>);

impl WeakQueue {
    pub(crate) fn upgrade(&self) -> Option<Queue> {
        self.0.upgrade().map(|inner| Queue { inner })
    }
}

impl Queue {
    pub(crate) fn downgrade(&self) -> WeakQueue {
        WeakQueue(Arc::downgrade(&self.inner))
    }
}
