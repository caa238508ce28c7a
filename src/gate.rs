//! Bounded concurrency gate.
//!
//! A [`ConcurrencyGate`] caps how many tasks may be inside a section at
//! once. It is a counting semaphore with strict FIFO fairness: permits go
//! to waiters in arrival order, and a released permit is handed directly to
//! the oldest waiter instead of returning to the pool where a newcomer
//! could snatch it.
//!
//! There are two ways to wait:
//!
//! - [`acquire`](ConcurrencyGate::acquire) blocks the calling thread. Fine
//!   from application threads; from a pool worker it holds that worker
//!   hostage for the duration.
//! - [`acquire_then`](ConcurrencyGate::acquire_then) blocks nobody. It
//!   registers a continuation; when a permit frees up, the task body is
//!   submitted to the given queue with the permit passed in. This is the
//!   form to use from inside tasks.
//!
//! Permits are RAII values. Dropping a [`GatePermit`] releases the slot;
//! [`GatePermit::forget`] consumes the slot permanently, shrinking the
//! gate's effective capacity.

use crate::error::{Error, Result};
use crate::observability::RuntimeMetrics;
use crate::runtime::{Queue, TaskContext, TaskHandle};
use crate::runtime::task::{CancelCell, CompletionCell};
use crate::types::{CancelReason, Outcome, TaskId};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// What a released permit was handed to.
enum GateGrant {
    Permit(GatePermit),
    Closed,
}

struct ThreadWaiter {
    granted: AtomicBool,
}

enum WaiterKind {
    /// A thread parked in [`ConcurrencyGate::acquire`].
    Thread(Arc<ThreadWaiter>),
    /// A deferred acquisition from [`ConcurrencyGate::acquire_then`].
    Continuation(Box<dyn FnOnce(GateGrant) + Send>),
}

struct Waiter {
    id: u64,
    kind: WaiterKind,
}

struct GateState {
    available: usize,
    closed: bool,
    waiters: VecDeque<Waiter>,
    next_waiter_id: u64,
}

struct GateInner {
    limit: usize,
    metrics: Arc<RuntimeMetrics>,
    state: Mutex<GateState>,
    condvar: Condvar,
}

impl GateInner {
    fn note_acquired(&self, transferred: bool) {
        self.metrics.gate_acquires.increment();
        if !transferred {
            self.metrics.gate_holders.increment();
            self.metrics
                .gate_holders_peak
                .set_max(self.metrics.gate_holders.get());
        }
    }

    /// Releases one permit: direct handoff to the oldest waiter, or back to
    /// the pool when nobody waits.
    fn release(gate: &Arc<Self>) {
        enum Action {
            WakeThread,
            RunContinuation(Box<dyn FnOnce(GateGrant) + Send>),
            ReturnToPool,
        }
        let action = {
            let mut state = gate.state.lock();
            match state.waiters.pop_front() {
                Some(Waiter {
                    kind: WaiterKind::Thread(waiter),
                    ..
                }) => {
                    waiter.granted.store(true, Ordering::SeqCst);
                    Action::WakeThread
                }
                Some(Waiter {
                    kind: WaiterKind::Continuation(cont),
                    ..
                }) => Action::RunContinuation(cont),
                None => {
                    state.available += 1;
                    Action::ReturnToPool
                }
            }
        };
        match action {
            Action::WakeThread => {
                // The granted flag is per-waiter, so everyone must look.
                gate.condvar.notify_all();
            }
            Action::RunContinuation(cont) => {
                gate.note_acquired(true);
                cont(GateGrant::Permit(GatePermit::new(Arc::clone(gate))));
            }
            Action::ReturnToPool => {
                gate.metrics.gate_holders.decrement();
            }
        }
    }
}

/// A FIFO counting semaphore bounding concurrent entry.
///
/// Created through [`Runtime::gate`](crate::runtime::Runtime::gate).
/// Cloning is cheap and shares the gate.
#[derive(Clone)]
pub struct ConcurrencyGate {
    inner: Arc<GateInner>,
}

impl ConcurrencyGate {
    /// Limits below one are raised to one.
    pub(crate) fn new(limit: usize, metrics: Arc<RuntimeMetrics>) -> Self {
        Self {
            inner: Arc::new(GateInner {
                limit: limit.max(1),
                metrics,
                state: Mutex::new(GateState {
                    available: limit.max(1),
                    closed: false,
                    waiters: VecDeque::new(),
                    next_waiter_id: 0,
                }),
                condvar: Condvar::new(),
            }),
        }
    }

    /// The maximum number of permits.
    #[must_use]
    pub fn limit(&self) -> usize {
        self.inner.limit
    }

    /// Permits currently free. Racy snapshot, for diagnostics only.
    #[must_use]
    pub fn available(&self) -> usize {
        self.inner.state.lock().available
    }

    /// Number of acquisitions currently waiting. Racy snapshot.
    #[must_use]
    pub fn waiting(&self) -> usize {
        self.inner.state.lock().waiters.len()
    }

    /// Returns true once the gate has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Acquires a permit, blocking the calling thread until one is free.
    ///
    /// Waiters are served in arrival order. Do not call this from a task
    /// when the permit may be held up by tasks needing the same worker
    /// pool; use [`acquire_then`](Self::acquire_then) there instead.
    ///
    /// # Errors
    ///
    /// [`Error::GateClosed`] if the gate is closed now or while waiting.
    pub fn acquire(&self) -> Result<GatePermit> {
        let mut state = self.inner.state.lock();
        if state.closed {
            return Err(Error::GateClosed);
        }
        if state.waiters.is_empty() && state.available > 0 {
            state.available -= 1;
            drop(state);
            self.inner.note_acquired(false);
            return Ok(GatePermit::new(Arc::clone(&self.inner)));
        }
        self.inner.metrics.gate_contended.increment();
        let waiter = Arc::new(ThreadWaiter {
            granted: AtomicBool::new(false),
        });
        push_waiter(&mut state, WaiterKind::Thread(Arc::clone(&waiter)));
        loop {
            self.inner.condvar.wait(&mut state);
            if waiter.granted.load(Ordering::SeqCst) {
                drop(state);
                self.inner.note_acquired(true);
                return Ok(GatePermit::new(Arc::clone(&self.inner)));
            }
            if state.closed {
                return Err(Error::GateClosed);
            }
        }
    }

    /// Like [`acquire`](Self::acquire) with a bound on the wait.
    ///
    /// A permit granted in the same instant the timeout fires still wins.
    ///
    /// # Errors
    ///
    /// [`Error::NoPermits`] on timeout; [`Error::GateClosed`] if the gate
    /// is closed now or while waiting.
    pub fn acquire_timeout(&self, timeout: Duration) -> Result<GatePermit> {
        let mut state = self.inner.state.lock();
        if state.closed {
            return Err(Error::GateClosed);
        }
        if state.waiters.is_empty() && state.available > 0 {
            state.available -= 1;
            drop(state);
            self.inner.note_acquired(false);
            return Ok(GatePermit::new(Arc::clone(&self.inner)));
        }
        self.inner.metrics.gate_contended.increment();
        let waiter = Arc::new(ThreadWaiter {
            granted: AtomicBool::new(false),
        });
        let id = push_waiter(&mut state, WaiterKind::Thread(Arc::clone(&waiter)));
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let timed_out = self
                .inner
                .condvar
                .wait_for(&mut state, remaining)
                .timed_out();
            if waiter.granted.load(Ordering::SeqCst) {
                drop(state);
                self.inner.note_acquired(true);
                return Ok(GatePermit::new(Arc::clone(&self.inner)));
            }
            if state.closed {
                return Err(Error::GateClosed);
            }
            if timed_out {
                if let Some(pos) = state.waiters.iter().position(|w| w.id == id) {
                    state.waiters.remove(pos);
                }
                return Err(Error::NoPermits);
            }
        }
    }

    /// Acquires a permit without blocking.
    ///
    /// Never barges: if anyone is waiting, newcomers are refused even in
    /// the instant a permit is free.
    ///
    /// # Errors
    ///
    /// [`Error::NoPermits`] if no permit is free or waiters exist;
    /// [`Error::GateClosed`] if the gate is closed.
    pub fn try_acquire(&self) -> Result<GatePermit> {
        let mut state = self.inner.state.lock();
        if state.closed {
            return Err(Error::GateClosed);
        }
        if !state.waiters.is_empty() || state.available == 0 {
            return Err(Error::NoPermits);
        }
        state.available -= 1;
        drop(state);
        self.inner.note_acquired(false);
        Ok(GatePermit::new(Arc::clone(&self.inner)))
    }

    /// Runs `f` on `queue` once a permit is available, without blocking any
    /// thread while waiting.
    ///
    /// If a permit is free the task is submitted immediately. Otherwise the
    /// acquisition joins the FIFO line; when its turn comes the task is
    /// submitted with the permit passed in. The permit is released when the
    /// task body drops it (at the latest when the body returns).
    ///
    /// Cancelling the returned handle before the task starts skips the body
    /// and releases the permit as soon as it would have been granted. If
    /// the gate closes first, the task completes as cancelled without
    /// running.
    pub fn acquire_then<R, F>(&self, queue: &Queue, f: F) -> TaskHandle<R>
    where
        F: FnOnce(&TaskContext, GatePermit) -> R + Send + 'static,
        R: Send + 'static,
    {
        let task_id = TaskId::next();
        let cancel = Arc::new(CancelCell::new());
        let completion: Arc<CompletionCell<R>> = Arc::new(CompletionCell::new());
        let handle = TaskHandle::from_parts(
            task_id,
            queue.id(),
            Arc::clone(&cancel),
            Arc::clone(&completion),
        );

        enum Admission {
            Rejected,
            Immediate(GatePermit),
            Waiting,
        }
        let mut body = Some(f);
        let admission = {
            let mut state = self.inner.state.lock();
            if state.closed {
                Admission::Rejected
            } else if state.waiters.is_empty() && state.available > 0 {
                state.available -= 1;
                Admission::Immediate(GatePermit::new(Arc::clone(&self.inner)))
            } else {
                self.inner.metrics.gate_contended.increment();
                let f = body.take().expect("task body taken twice");
                let queue = queue.clone();
                let cancel = Arc::clone(&cancel);
                let completion = Arc::clone(&completion);
                push_waiter(
                    &mut state,
                    WaiterKind::Continuation(Box::new(move |grant| match grant {
                        GateGrant::Permit(permit) => {
                            queue.submit_prepared(task_id, cancel, completion, move |cx| {
                                f(cx, permit)
                            });
                        }
                        GateGrant::Closed => {
                            completion.complete(
                                task_id,
                                Outcome::Cancelled(CancelReason::gate_closed()),
                            );
                        }
                    })),
                );
                Admission::Waiting
            }
        };
        match admission {
            Admission::Rejected => {
                completion.complete(task_id, Outcome::Cancelled(CancelReason::gate_closed()));
            }
            Admission::Immediate(permit) => {
                let f = body.take().expect("task body taken twice");
                self.inner.note_acquired(false);
                queue.submit_prepared(task_id, cancel, completion, move |cx| f(cx, permit));
            }
            Admission::Waiting => {}
        }
        handle
    }

    /// Closes the gate.
    ///
    /// Every waiting acquisition fails: blocked threads get
    /// [`Error::GateClosed`], deferred acquisitions complete as cancelled
    /// without running. Holders keep their permits; releasing after close
    /// returns the permit to the pool where it stays. Closing twice is a
    /// no-op.
    pub fn close(&self) {
        let drained = {
            let mut state = self.inner.state.lock();
            if state.closed {
                Vec::new()
            } else {
                state.closed = true;
                state.waiters.drain(..).collect::<Vec<_>>()
            }
        };
        if !drained.is_empty() {
            tracing::debug!(waiters = drained.len(), "gate closed with waiters");
        }
        self.inner.condvar.notify_all();
        for waiter in drained {
            if let WaiterKind::Continuation(cont) = waiter.kind {
                cont(GateGrant::Closed);
            }
        }
    }
}

impl std::fmt::Debug for ConcurrencyGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("ConcurrencyGate")
            .field("limit", &self.inner.limit)
            .field("available", &state.available)
            .field("waiting", &state.waiters.len())
            .field("closed", &state.closed)
            .finish()
    }
}

fn push_waiter(state: &mut GateState, kind: WaiterKind) -> u64 {
    let id = state.next_waiter_id;
    state.next_waiter_id += 1;
    state.waiters.push_back(Waiter { id, kind });
    id
}

/// An acquired slot in a [`ConcurrencyGate`].
///
/// Dropping the permit releases the slot. The release prefers direct
/// handoff: the oldest waiter gets the permit without it ever becoming
/// free for newcomers.
#[must_use = "dropping a permit immediately releases it"]
pub struct GatePermit {
    gate: Arc<GateInner>,
    active: bool,
}

impl GatePermit {
    fn new(gate: Arc<GateInner>) -> Self {
        Self { gate, active: true }
    }

    /// Consumes the permit without releasing it.
    ///
    /// The gate's effective capacity shrinks by one for the rest of its
    /// life. Useful for fencing off capacity after an unrecoverable error
    /// in the guarded section.
    pub fn forget(mut self) {
        self.active = false;
    }
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        if self.active {
            GateInner::release(&self.gate);
        }
    }
}

impl std::fmt::Debug for GatePermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatePermit")
            .field("active", &self.active)
            .finish()
    }
}
