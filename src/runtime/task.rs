//! Task records, completion latches, and handles.
//!
//! A submitted task moves through a small state machine: queued, running,
//! then exactly one of the terminal outcomes captured by
//! [`Outcome`](crate::types::Outcome). The pieces here implement that
//! lifecycle:
//!
//! - [`TaskCell`] is the type-erased record a queue holds while the task is
//!   pending. Its closure performs the cancel pre-check, runs the user body
//!   under `catch_unwind`, and records the outcome exactly once.
//! - `CompletionCell` is the typed latch the handle waits on: a done flag,
//!   a mutex/condvar pair, and an optional continuation slot.
//! - [`TaskHandle`] is the caller's view: cancel, wait, join, or chain a
//!   continuation onto another queue.
//! - [`TaskContext`] is passed by reference into every task body and carries
//!   identifiers plus the cooperative cancellation flag.
//!
//! Cancellation is soft. A task cancelled before a worker picks it up
//! completes as `Cancelled` without running its body. A task that already
//! started keeps running; the body may poll
//! [`TaskContext::cancel_requested`] (or call [`TaskContext::checkpoint`])
//! and return early, but nothing preempts it.

use crate::error::{Error, Result};
use crate::observability::RuntimeMetrics;
use crate::runtime::queue::Queue;
use crate::types::{CancelReason, FailurePayload, Outcome, QueueId, TaskId};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// Shared cancellation state between a handle and its task record.
#[derive(Debug)]
pub(crate) struct CancelCell {
    requested: AtomicBool,
    reason: Mutex<Option<CancelReason>>,
}

impl CancelCell {
    pub(crate) fn new() -> Self {
        Self {
            requested: AtomicBool::new(false),
            reason: Mutex::new(None),
        }
    }

    /// Records a cancellation request, keeping the most severe reason seen.
    pub(crate) fn request(&self, reason: CancelReason) {
        {
            let mut slot = self.reason.lock().expect("cancel reason lock poisoned");
            match slot.as_mut() {
                Some(existing) => {
                    existing.strengthen(&reason);
                }
                None => *slot = Some(reason),
            }
        }
        self.requested.store(true, Ordering::Release);
    }

    pub(crate) fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }

    pub(crate) fn reason(&self) -> CancelReason {
        self.reason
            .lock()
            .expect("cancel reason lock poisoned")
            .clone()
            .unwrap_or_default()
    }
}

/// Per-task context handed by reference into every task body.
#[derive(Debug)]
pub struct TaskContext {
    task_id: TaskId,
    queue_id: QueueId,
    cancel: Arc<CancelCell>,
}

impl TaskContext {
    pub(crate) fn new(task_id: TaskId, queue_id: QueueId, cancel: Arc<CancelCell>) -> Self {
        Self {
            task_id,
            queue_id,
            cancel,
        }
    }

    /// The identifier of the running task.
    #[must_use]
    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// The identifier of the queue the task is executing on.
    #[must_use]
    pub fn queue_id(&self) -> QueueId {
        self.queue_id
    }

    /// Returns true if cancellation has been requested for this task.
    ///
    /// Cancellation of a running task is cooperative: the runtime never
    /// preempts a body, it only raises this flag.
    #[must_use]
    pub fn cancel_requested(&self) -> bool {
        self.cancel.is_requested()
    }

    /// Returns `Err(Error::Cancelled)` if cancellation has been requested.
    ///
    /// Long-running bodies call this at natural stopping points and bail out
    /// with `?`.
    pub fn checkpoint(&self) -> Result<()> {
        if self.cancel.is_requested() {
            return Err(Error::Cancelled(self.cancel.reason()));
        }
        Ok(())
    }
}

/// A continuation registered on a completion cell, delivered to a queue.
type Continuation<R> = (Queue, Box<dyn FnOnce(Outcome<R>) + Send + 'static>);

struct CompletionState<R> {
    outcome: Option<Outcome<R>>,
    continuation: Option<Continuation<R>>,
    /// Set once the outcome has been (or will be) delivered to an observer.
    observed: bool,
    handle_dropped: bool,
}

/// Typed completion latch shared between the task record and its handle.
pub(crate) struct CompletionCell<R> {
    done: AtomicBool,
    state: Mutex<CompletionState<R>>,
    condvar: Condvar,
}

impl<R> CompletionCell<R> {
    pub(crate) fn new() -> Self {
        Self {
            done: AtomicBool::new(false),
            state: Mutex::new(CompletionState {
                outcome: None,
                continuation: None,
                observed: false,
                handle_dropped: false,
            }),
            condvar: Condvar::new(),
        }
    }

    pub(crate) fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    pub(crate) fn wait(&self) {
        if self.is_done() {
            return;
        }
        let mut guard = self.state.lock().expect("completion lock poisoned");
        while !self.is_done() {
            guard = self.condvar.wait(guard).expect("completion lock poisoned");
        }
        drop(guard);
    }

    pub(crate) fn wait_timeout(&self, timeout: Duration) -> bool {
        if self.is_done() {
            return true;
        }
        let deadline = Instant::now() + timeout;
        let mut guard = self.state.lock().expect("completion lock poisoned");
        while !self.is_done() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            let (next, _) = self
                .condvar
                .wait_timeout(guard, remaining)
                .expect("completion lock poisoned");
            guard = next;
        }
        drop(guard);
        true
    }

    /// Takes the stored outcome, marking it observed.
    pub(crate) fn take(&self) -> Option<Outcome<R>> {
        let mut state = self.state.lock().expect("completion lock poisoned");
        let outcome = state.outcome.take();
        if outcome.is_some() {
            state.observed = true;
        }
        outcome
    }

    pub(crate) fn mark_handle_dropped(&self, task_id: TaskId) {
        let mut state = self.state.lock().expect("completion lock poisoned");
        state.handle_dropped = true;
        if !state.observed {
            if let Some(Outcome::Failed(payload)) = state.outcome.as_ref() {
                tracing::warn!(
                    task = %task_id,
                    failure = %payload.message(),
                    "task failed but its outcome was never observed"
                );
                state.observed = true;
            }
        }
    }
}

impl<R: Send + 'static> CompletionCell<R> {
    /// Records the terminal outcome and wakes waiters.
    ///
    /// Called exactly once per task. If a continuation is registered the
    /// outcome is forwarded to it instead of being stored.
    pub(crate) fn complete(&self, task_id: TaskId, outcome: Outcome<R>) {
        let continuation = {
            let mut state = self.state.lock().expect("completion lock poisoned");
            debug_assert!(state.outcome.is_none(), "task completed twice");
            match state.continuation.take() {
                Some(cont) => {
                    state.observed = true;
                    Some((cont, outcome))
                }
                None => {
                    if state.handle_dropped && !state.observed && outcome.is_failed() {
                        if let Outcome::Failed(payload) = &outcome {
                            tracing::warn!(
                                task = %task_id,
                                failure = %payload.message(),
                                "task failed but its outcome was never observed"
                            );
                        }
                        state.observed = true;
                    }
                    state.outcome = Some(outcome);
                    None
                }
            }
        };
        self.done.store(true, Ordering::Release);
        {
            let _guard = self.state.lock().expect("completion lock poisoned");
            self.condvar.notify_all();
        }
        if let Some(((queue, f), outcome)) = continuation {
            drop(queue.submit(move || f(outcome)));
        }
    }

    /// Registers a continuation, or fires it immediately if already done.
    pub(crate) fn set_continuation(
        &self,
        queue: Queue,
        f: Box<dyn FnOnce(Outcome<R>) + Send + 'static>,
    ) {
        let ready = {
            let mut state = self.state.lock().expect("completion lock poisoned");
            if let Some(outcome) = state.outcome.take() {
                state.observed = true;
                Some((outcome, f))
            } else {
                state.observed = true;
                state.continuation = Some((queue.clone(), f));
                None
            }
        };
        if let Some((outcome, f)) = ready {
            drop(queue.submit(move || f(outcome)));
        }
    }
}

/// Type-erased task record held by a queue while the task is pending.
pub(crate) struct TaskCell {
    id: TaskId,
    barrier: bool,
    cancel: Arc<CancelCell>,
    run: Box<dyn FnOnce(&TaskContext) + Send + 'static>,
}

impl TaskCell {
    /// Builds a task record and its typed handle.
    pub(crate) fn new<R, F>(
        queue_id: QueueId,
        barrier: bool,
        metrics: Arc<RuntimeMetrics>,
        f: F,
    ) -> (Self, TaskHandle<R>)
    where
        F: FnOnce(&TaskContext) -> R + Send + 'static,
        R: Send + 'static,
    {
        let task_id = TaskId::next();
        let cancel = Arc::new(CancelCell::new());
        let completion = Arc::new(CompletionCell::new());
        let cell = Self::from_parts(
            task_id,
            barrier,
            Arc::clone(&cancel),
            Arc::clone(&completion),
            metrics,
            f,
        );
        let handle = TaskHandle::from_parts(task_id, queue_id, cancel, completion);
        (cell, handle)
    }

    /// Builds a task record around pre-created cancel and completion cells.
    ///
    /// Used when the handle must exist before the task can be enqueued, such
    /// as a gated continuation waiting for a permit.
    pub(crate) fn from_parts<R, F>(
        task_id: TaskId,
        barrier: bool,
        cancel: Arc<CancelCell>,
        completion: Arc<CompletionCell<R>>,
        metrics: Arc<RuntimeMetrics>,
        f: F,
    ) -> Self
    where
        F: FnOnce(&TaskContext) -> R + Send + 'static,
        R: Send + 'static,
    {
        let cancel_probe = Arc::clone(&cancel);
        let run = Box::new(move |cx: &TaskContext| {
            if cancel_probe.is_requested() {
                metrics.tasks_cancelled.increment();
                completion.complete(task_id, Outcome::Cancelled(cancel_probe.reason()));
                return;
            }
            if barrier {
                metrics.barriers_executed.increment();
            }
            match catch_unwind(AssertUnwindSafe(|| f(cx))) {
                Ok(value) => {
                    metrics.tasks_completed.increment();
                    completion.complete(task_id, Outcome::Ok(value));
                }
                Err(panic) => {
                    let payload = FailurePayload::from_panic(panic.as_ref());
                    metrics.tasks_failed.increment();
                    tracing::debug!(
                        task = %task_id,
                        failure = %payload.message(),
                        "task body panicked"
                    );
                    completion.complete(task_id, Outcome::Failed(payload));
                }
            }
        });
        Self {
            id: task_id,
            barrier,
            cancel,
            run,
        }
    }

    pub(crate) fn id(&self) -> TaskId {
        self.id
    }

    pub(crate) fn is_barrier(&self) -> bool {
        self.barrier
    }

    /// Requests cancellation of this record before it runs.
    pub(crate) fn cancel(&self, reason: CancelReason) {
        self.cancel.request(reason);
    }

    /// Consumes the record, running the cancel pre-check and then the body.
    ///
    /// Never unwinds: panics from the body are caught and folded into the
    /// recorded outcome.
    pub(crate) fn run(self, queue_id: QueueId) {
        let cx = TaskContext::new(self.id, queue_id, Arc::clone(&self.cancel));
        (self.run)(&cx);
    }
}

impl std::fmt::Debug for TaskCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskCell")
            .field("id", &self.id)
            .field("barrier", &self.barrier)
            .field("cancel_requested", &self.cancel.is_requested())
            .finish()
    }
}

/// Handle for a submitted task.
///
/// Provides cancellation, completion waiting, and outcome retrieval. The
/// handle is the only way to observe a task's outcome; dropping it without
/// looking is allowed ("fire and forget"), but a failure outcome dropped
/// unobserved is logged as a warning.
pub struct TaskHandle<R> {
    task_id: TaskId,
    queue_id: QueueId,
    cancel: Arc<CancelCell>,
    completion: Arc<CompletionCell<R>>,
}

impl<R> TaskHandle<R> {
    pub(crate) fn from_parts(
        task_id: TaskId,
        queue_id: QueueId,
        cancel: Arc<CancelCell>,
        completion: Arc<CompletionCell<R>>,
    ) -> Self {
        Self {
            task_id,
            queue_id,
            cancel,
            completion,
        }
    }

    /// The identifier of this task.
    #[must_use]
    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// The identifier of the queue the task was submitted to.
    #[must_use]
    pub fn queue_id(&self) -> QueueId {
        self.queue_id
    }

    /// Requests cancellation.
    ///
    /// If the task has not started it will complete as `Cancelled` without
    /// running its body. If it is already running, the request only raises
    /// the cooperative flag visible through [`TaskContext`]; the body keeps
    /// running and its outcome stands. Cancelling a finished task has no
    /// effect.
    pub fn cancel(&self) {
        self.cancel.request(CancelReason::default());
    }

    /// Requests cancellation with an explicit reason.
    pub fn cancel_with(&self, reason: CancelReason) {
        self.cancel.request(reason);
    }

    /// Returns true if cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_requested()
    }

    /// Returns true if the task reached a terminal outcome.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.completion.is_done()
    }

    /// Blocks the calling thread until the task completes.
    ///
    /// This holds the thread; it is the blocking half of the API. Do not
    /// call it from a task running on the same serial queue.
    pub fn wait(&self) {
        self.completion.wait();
    }

    /// Blocks until the task completes or the timeout elapses.
    ///
    /// Returns `true` if the task completed, `false` on timeout.
    #[must_use]
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.completion.wait_timeout(timeout)
    }

    /// Blocks until the task completes and returns its outcome.
    pub fn join(self) -> Outcome<R> {
        self.completion.wait();
        self.completion
            .take()
            .expect("task outcome already consumed")
    }

    /// Returns the outcome if the task already completed, or the handle back
    /// if it has not.
    pub fn try_join(self) -> core::result::Result<Outcome<R>, Self> {
        if self.completion.is_done() {
            Ok(self
                .completion
                .take()
                .expect("task outcome already consumed"))
        } else {
            Err(self)
        }
    }
}

impl<R: Send + 'static> TaskHandle<R> {
    /// Consumes the handle and delivers the outcome to `f`, submitted as a
    /// new task on `queue` once this task completes.
    ///
    /// This is the cooperative alternative to [`wait`](Self::wait): no
    /// thread blocks while the task is in flight. If the task already
    /// completed the continuation is submitted immediately.
    pub fn on_complete<F>(self, queue: &Queue, f: F)
    where
        F: FnOnce(Outcome<R>) + Send + 'static,
    {
        self.completion.set_continuation(queue.clone(), Box::new(f));
    }
}

impl<R> Drop for TaskHandle<R> {
    fn drop(&mut self) {
        self.completion.mark_handle_dropped(self.task_id);
    }
}

impl<R> std::fmt::Debug for TaskHandle<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("task_id", &self.task_id)
            .field("queue_id", &self.queue_id)
            .field("cancelled", &self.is_cancelled())
            .field("done", &self.is_done())
            .finish()
    }
}
