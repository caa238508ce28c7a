//! Isolation domains: state that can only be touched from its own queue.
//!
//! A [`Domain`] pairs a private serial queue with a value it owns. The only
//! way to reach the value is to submit an operation, a closure receiving
//! `&mut S`. Operations run one at a time in submission order, so the state
//! needs no locking discipline from its users and data races on it are
//! impossible by construction.
//!
//! The boundary is enforced at compile time. Operations must be `Send +
//! 'static`: values captured by an operation move into the domain, results
//! move back out, and the `&mut S` borrow ends when the operation returns,
//! so a reference to domain state cannot be smuggled out. Types built on
//! non-sendable shared mutability (`Rc`, `RefCell`) are rejected at the
//! call site.
//!
//! Failures stay inside the domain. A panicking operation is caught and
//! surfaced as a failed outcome on its own handle; the domain, its queue,
//! and its state remain live for later operations. Whatever the operation
//! mutated before panicking stays mutated, so operations that need
//! all-or-nothing behavior must stage their writes.
//!
//! A [`Binding`] wraps one operation together with its domain, letting
//! callbacks invoke the operation without holding the domain itself.

use crate::error::Result;
use crate::runtime::{Queue, TaskContext, TaskHandle};
use crate::types::{DomainId, QueueId};
use parking_lot::Mutex;
use std::sync::Arc;

/// A serial execution domain owning a value of type `S`.
///
/// Created through [`Runtime::domain`](crate::runtime::Runtime::domain).
/// The domain is not cloneable; share access by handing out [`Binding`]s
/// or wrapping the domain in an `Arc`.
///
/// # Examples
///
/// ```
/// let runtime = seriate::Runtime::builder().build().unwrap();
/// let counter = runtime.domain("counter", 0_u64);
///
/// counter.call(|n| *n += 1);
/// let value = counter.call_sync(|n| {
///     *n += 1;
///     *n
/// });
/// assert_eq!(value.unwrap(), 2);
/// # runtime.shutdown(std::time::Duration::from_secs(5));
/// ```
pub struct Domain<S> {
    id: DomainId,
    label: String,
    queue: Queue,
    // Never contended: the serial queue admits one operation at a time. The
    // mutex only carries `S` across worker threads.
    state: Arc<Mutex<S>>,
}

impl<S: Send + 'static> Domain<S> {
    pub(crate) fn new(label: impl Into<String>, initial: S, queue: Queue) -> Self {
        Self {
            id: DomainId::next(),
            label: label.into(),
            queue,
            state: Arc::new(Mutex::new(initial)),
        }
    }

    /// The unique identifier of this domain.
    #[must_use]
    pub fn id(&self) -> DomainId {
        self.id
    }

    /// The label given at creation.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// The identifier of the domain's private queue.
    #[must_use]
    pub fn queue_id(&self) -> QueueId {
        self.queue.id()
    }

    /// Submits an operation against the domain state and returns its handle.
    ///
    /// Operations run in submission order, one at a time. The closure must
    /// be `Send + 'static`; captures that are not sendable fail to compile:
    ///
    /// ```compile_fail
    /// use std::rc::Rc;
    ///
    /// let runtime = seriate::Runtime::builder().build().unwrap();
    /// let domain = runtime.domain("counter", 0_u32);
    /// let local = Rc::new(5_u32);
    /// domain.call(move |n| *n += *local);
    /// ```
    pub fn call<R, F>(&self, op: F) -> TaskHandle<R>
    where
        F: FnOnce(&mut S) -> R + Send + 'static,
        R: Send + 'static,
    {
        let state = Arc::clone(&self.state);
        self.queue.submit(move || op(&mut state.lock()))
    }

    /// Like [`call`](Self::call), passing the operation its [`TaskContext`]
    /// for cooperative cancellation.
    pub fn call_with<R, F>(&self, op: F) -> TaskHandle<R>
    where
        F: FnOnce(&TaskContext, &mut S) -> R + Send + 'static,
        R: Send + 'static,
    {
        let state = Arc::clone(&self.state);
        self.queue.submit_with(move |cx| op(cx, &mut state.lock()))
    }

    /// Submits an operation and blocks until it completes.
    ///
    /// # Errors
    ///
    /// [`Error::ReentrantDeadlock`](crate::error::Error::ReentrantDeadlock)
    /// when called from an operation already running on this domain;
    /// [`Error::TaskFailed`](crate::error::Error::TaskFailed) if the
    /// operation panicked; queue lifecycle errors if the runtime is
    /// shutting down.
    pub fn call_sync<R, F>(&self, op: F) -> Result<R>
    where
        F: FnOnce(&mut S) -> R + Send + 'static,
        R: Send + 'static,
    {
        let state = Arc::clone(&self.state);
        self.queue.run_sync(move || op(&mut state.lock()))
    }

    /// Wraps an operation and this domain into a standalone invocable.
    ///
    /// The binding holds the domain's queue and state alive, so it keeps
    /// working after the `Domain` value itself is gone.
    pub fn bind<A, R, F>(&self, op: F) -> Binding<A, R>
    where
        F: Fn(&mut S, A) -> R + Send + Sync + 'static,
        A: Send + 'static,
        R: Send + 'static,
    {
        let op = Arc::new(op);
        let queue = self.queue.clone();
        let state = Arc::clone(&self.state);

        let submit_op = Arc::clone(&op);
        let submit_state = Arc::clone(&state);
        let submit_queue = queue.clone();
        let invoke = Arc::new(move |arg: A| {
            let op = Arc::clone(&submit_op);
            let state = Arc::clone(&submit_state);
            submit_queue.submit(move || op(&mut state.lock(), arg))
        });

        let invoke_sync = Arc::new(move |arg: A| {
            let op = Arc::clone(&op);
            let state = Arc::clone(&state);
            queue.run_sync(move || op(&mut state.lock(), arg))
        });

        Binding {
            invoke,
            invoke_sync,
        }
    }
}

impl<S> std::fmt::Debug for Domain<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Domain")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("queue", &self.queue.id())
            .finish()
    }
}

/// A domain operation bound to its domain, invocable on its own.
///
/// Obtained from [`Domain::bind`]. Cloning shares the same operation and
/// domain. Useful for handing a narrow capability into callbacks without
/// exposing the domain or its state type.
pub struct Binding<A, R> {
    invoke: Arc<dyn Fn(A) -> TaskHandle<R> + Send + Sync>,
    invoke_sync: Arc<dyn Fn(A) -> Result<R> + Send + Sync>,
}

impl<A, R> Binding<A, R> {
    /// Submits the bound operation with `arg` and returns its handle.
    pub fn call(&self, arg: A) -> TaskHandle<R> {
        (self.invoke)(arg)
    }

    /// Submits the bound operation with `arg` and blocks for the result.
    ///
    /// # Errors
    ///
    /// Same as [`Domain::call_sync`].
    pub fn call_sync(&self, arg: A) -> Result<R> {
        (self.invoke_sync)(arg)
    }
}

impl<A, R> Clone for Binding<A, R> {
    fn clone(&self) -> Self {
        Self {
            invoke: Arc::clone(&self.invoke),
            invoke_sync: Arc::clone(&self.invoke_sync),
        }
    }
}

impl<A, R> std::fmt::Debug for Binding<A, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Binding")
    }
}
