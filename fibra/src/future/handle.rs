use crate::context;
use crate::error::{Error, Result};
use crate::runtime::Remote;
use crate::task::{FutureId, Pending, TaskNode};
use crate::time::{self, TimerId};
use anyhow::anyhow;
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::future::IntoFuture;
use std::marker::PhantomData;
use std::panic::Location;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};
use tracing::debug;

// State shared by a handle and its resolvers.
struct Shared<T> {
    id: FutureId,

    location: &'static Location<'static>,

    created_at: Instant,

    owner: Option<Weak<TaskNode>>,

    // Whether the future shows in `Stats::futures_active`.
    counted: Cell<bool>,

    inner: RefCell<Inner<T>>,
}

struct Inner<T> {
    resolved: bool,

    // `None` until resolved, and again once consumed by `handle.await`.
    outcome: Option<Result<T>>,

    elapsed: Option<Duration>,

    timeout: Option<Duration>,

    timer: Option<TimerId>,

    waiters: Vec<Waker>,
}

impl<T: 'static> Shared<T> {
    fn new(timeout: Option<Duration>, location: &'static Location<'static>) -> Rc<Self> {
        let owner = context::current_task();
        let counted = context::try_with_core(|core| core.stats.future_created()).is_some();

        let shared = Rc::new(Self {
            id: FutureId::next(),
            location,
            created_at: Instant::now(),
            owner: owner.as_ref().map(Rc::downgrade),
            counted: Cell::new(counted),
            inner: RefCell::new(Inner {
                resolved: false,
                outcome: None,
                elapsed: None,
                timeout,
                timer: None,
                waiters: Vec::new(),
            }),
        });

        if let Some(owner) = owner {
            let pending: Weak<Shared<T>> = Rc::downgrade(&shared);
            owner.join.register(shared.id, pending);
        }

        debug!(future.id = %shared.id, %location, "future created");
        shared
    }

    fn settle(&self, outcome: Result<T>) -> bool {
        let (timer, waiters) = {
            let mut inner = self.inner.borrow_mut();
            let timer = inner.timer.take();

            if inner.resolved {
                drop(inner);
                if let Some(timer) = timer {
                    time::clear_timeout(timer);
                }

                debug!(future.id = %self.id, "ignoring resolution of an already resolved future");
                return false;
            }

            inner.resolved = true;
            inner.elapsed = Some(self.created_at.elapsed());
            inner.outcome = Some(outcome);

            (timer, std::mem::take(&mut inner.waiters))
        };

        if let Some(timer) = timer {
            time::clear_timeout(timer);
        }

        self.release();

        for waker in waiters {
            waker.wake();
        }

        true
    }

    // Leaves the owner's join registry and the active count.
    fn release(&self) {
        if let Some(owner) = self.owner.as_ref().and_then(Weak::upgrade) {
            owner.join.deregister(self.id);
        }

        if self.counted.replace(false) {
            context::try_with_core(|core| core.stats.future_settled());
        }
    }

    fn poll_outcome<R>(
        self: &Rc<Self>,
        cx: &mut Context<'_>,
        read: impl FnOnce(&mut Option<Result<T>>) -> R,
    ) -> Poll<R> {
        {
            let mut inner = self.inner.borrow_mut();
            if inner.resolved {
                return Poll::Ready(read(&mut inner.outcome));
            }

            if !inner.waiters.iter().any(|w| w.will_wake(cx.waker())) {
                inner.waiters.push(cx.waker().clone());
            }
        }

        Rc::clone(self).arm_timeout();
        Poll::Pending
    }

    fn set_timeout(self: &Rc<Self>, timeout: Option<Duration>) {
        let (timer, has_waiters) = {
            let mut inner = self.inner.borrow_mut();
            inner.timeout = timeout;
            (inner.timer.take(), !inner.waiters.is_empty())
        };

        if let Some(timer) = timer {
            time::clear_timeout(timer);
        }

        // Somebody already waits, the next poll could be far away.
        if has_waiters {
            Rc::clone(self).arm_timeout();
        }
    }
}

impl<T: 'static> Pending for Shared<T> {
    fn arm_timeout(self: Rc<Self>) {
        let bound = {
            let inner = self.inner.borrow();
            match inner.timeout {
                Some(bound) if !inner.resolved && inner.timer.is_none() => bound,
                _ => return,
            }
        };

        // Only a runtime can fire timers.
        if !context::is_active() {
            return;
        }

        let weak = Rc::downgrade(&self);
        let location = self.location;
        let timer = time::set_timeout(bound, move || {
            if let Some(shared) = weak.upgrade() {
                shared.inner.borrow_mut().timer = None;
                debug!(future.id = %shared.id, ?bound, "future timed out");
                shared.settle(Err(Error::Timeout { bound, location }));
            }
        });

        self.inner.borrow_mut().timer = Some(timer);
    }
}

impl<T> Drop for Shared<T> {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        if let Some(timer) = inner.timer.take() {
            time::clear_timeout(timer);
        }

        if inner.resolved {
            return;
        }

        // Nothing can resolve it anymore.
        if let Some(owner) = self.owner.as_ref().and_then(Weak::upgrade) {
            owner.join.deregister(self.id);
        }

        if self.counted.replace(false) {
            context::try_with_core(|core| core.stats.future_settled());
        }
    }
}

/// A single-resolution result cell, bound to the task that created it.
///
/// The value is produced through a [`Resolver`] handed to a callback-style
/// operation, and read by awaiting the handle. The first resolution wins,
/// later ones are ignored. Until it resolves, the handle keeps the task that
/// created it from completing.
///
/// ```no_run
/// use fibra::FutureHandle;
/// use std::time::Duration;
///
/// # #[fibra::main]
/// # async fn main() -> fibra::Result<()> {
/// let handle = FutureHandle::with_timeout(Duration::from_secs(1));
/// let resolver = handle.resolver();
///
/// fibra::time::set_timeout(Duration::from_millis(10), move || {
///     resolver.ok(42);
/// });
///
/// assert_eq!(handle.result().await?, 42);
/// # Ok(())
/// # }
/// ```
pub struct FutureHandle<T> {
    shared: Rc<Shared<T>>,
}

impl<T: 'static> FutureHandle<T> {
    /// Creates an unresolved future owned by the current task, if any.
    #[track_caller]
    pub fn new() -> Self {
        Self {
            shared: Shared::new(None, Location::caller()),
        }
    }

    /// Creates a future that resolves with [`Error::Timeout`] if it is still
    /// unresolved `timeout` after somebody started waiting on it.
    #[track_caller]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            shared: Shared::new(Some(timeout), Location::caller()),
        }
    }

    pub fn resolver(&self) -> Resolver<T> {
        Resolver {
            shared: Rc::clone(&self.shared),
        }
    }

    /// Waits for resolution and returns a copy of the outcome. Can be called
    /// any number of times.
    pub async fn result(&self) -> Result<T>
    where
        T: Clone,
    {
        futures::future::poll_fn(|cx| {
            self.shared.poll_outcome(cx, |outcome| match outcome {
                Some(outcome) => outcome.clone(),
                None => Err(consumed()),
            })
        })
        .await
    }

    /// Waits for resolution and returns the error, or `None` if the future
    /// resolved with a value.
    pub async fn error(&self) -> Option<Error> {
        futures::future::poll_fn(|cx| {
            self.shared.poll_outcome(cx, |outcome| match outcome {
                Some(Err(err)) => Some(err.clone()),
                _ => None,
            })
        })
        .await
    }

    pub fn is_resolved(&self) -> bool {
        self.shared.inner.borrow().resolved
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.shared.inner.borrow().timeout
    }

    /// Changes the timeout. An armed timer is disarmed, the new bound starts
    /// counting from the next wait.
    pub fn set_timeout(&self, timeout: Option<Duration>) {
        self.shared.set_timeout(timeout);
    }

    /// Time between creation and resolution, `None` while unresolved.
    pub fn elapsed(&self) -> Option<Duration> {
        self.shared.inner.borrow().elapsed
    }

    pub fn id(&self) -> FutureId {
        self.shared.id
    }

    /// Call site that created the future.
    pub fn location(&self) -> &'static Location<'static> {
        self.shared.location
    }
}

impl<T: 'static> Default for FutureHandle<T> {
    #[track_caller]
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for FutureHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.shared.inner.borrow();
        f.debug_struct("FutureHandle")
            .field("id", &self.shared.id)
            .field("location", &self.shared.location)
            .field("resolved", &inner.resolved)
            .field("timeout", &inner.timeout)
            .finish()
    }
}

fn consumed() -> Error {
    Error::other(anyhow!("future outcome was already consumed"))
}

/// Future returned by awaiting a [`FutureHandle`].
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct Wait<T> {
    shared: Rc<Shared<T>>,
}

impl<T: 'static> Future for Wait<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.shared
            .poll_outcome(cx, |outcome| outcome.take().unwrap_or_else(|| Err(consumed())))
    }
}

impl<T: 'static> IntoFuture for FutureHandle<T> {
    type Output = Result<T>;
    type IntoFuture = Wait<T>;

    fn into_future(self) -> Self::IntoFuture {
        Wait {
            shared: self.shared,
        }
    }
}

impl<T> fmt::Debug for Wait<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wait").field("id", &self.shared.id).finish()
    }
}

/// Resolves a [`FutureHandle`]. Cheap to clone, every clone resolves the same
/// future and only the first resolution counts.
pub struct Resolver<T> {
    shared: Rc<Shared<T>>,
}

impl<T: 'static> Resolver<T> {
    /// Resolves the future. Returns false if it was already resolved.
    pub fn resolve<E>(&self, res: std::result::Result<T, E>) -> bool
    where
        E: Into<anyhow::Error>,
    {
        self.settle(res.map_err(|err| Error::from_producer(err.into())))
    }

    pub fn ok(&self, value: T) -> bool {
        self.settle(Ok(value))
    }

    pub fn err<E>(&self, err: E) -> bool
    where
        E: Into<anyhow::Error>,
    {
        self.settle(Err(Error::from_producer(err.into())))
    }

    pub fn is_resolved(&self) -> bool {
        self.shared.inner.borrow().resolved
    }

    pub(crate) fn settle(&self, outcome: Result<T>) -> bool {
        self.shared.settle(outcome)
    }

    /// Turns the resolver into one that can be sent to another thread.
    ///
    /// The resolution is posted back to the loop thread, and the loop stays
    /// alive until the remote resolver resolved or was dropped.
    ///
    /// # Panics
    ///
    /// Panics when called outside a runtime.
    #[track_caller]
    pub fn into_remote(self) -> RemoteResolver<T>
    where
        T: Send,
    {
        let complete = move |payload: Box<dyn Any + Send>| match payload.downcast::<Result<T>>() {
            Ok(outcome) => {
                self.settle(*outcome);
            }
            Err(_) => debug!("remote resolution with an unexpected payload type"),
        };

        let (key, remote) = context::with_core(|core| (core.park(Box::new(complete)), core.remote()));

        RemoteResolver {
            key,
            remote,
            done: false,
            _marker: PhantomData,
        }
    }
}

impl<T> Clone for Resolver<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Rc::clone(&self.shared),
        }
    }
}

impl<T> fmt::Debug for Resolver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver").field("id", &self.shared.id).finish()
    }
}

/// A [`Resolver`] usable from any thread. Consumed by resolving.
pub struct RemoteResolver<T> {
    key: usize,
    remote: Remote,
    done: bool,
    _marker: PhantomData<fn(T)>,
}

impl<T: Send + 'static> RemoteResolver<T> {
    pub fn resolve<E>(self, res: std::result::Result<T, E>) -> bool
    where
        E: Into<anyhow::Error>,
    {
        self.settle(res.map_err(|err| Error::from_producer(err.into())))
    }

    pub fn ok(self, value: T) -> bool {
        self.settle(Ok(value))
    }

    pub fn err<E>(self, err: E) -> bool
    where
        E: Into<anyhow::Error>,
    {
        self.settle(Err(Error::from_producer(err.into())))
    }

    /// Posts the outcome to the loop thread. Always true: whether the future
    /// was still unresolved is only known on the loop thread.
    pub(crate) fn settle(mut self, outcome: Result<T>) -> bool {
        self.done = true;

        let key = self.key;
        self.remote.post(move || {
            if let Some(complete) = context::try_with_core(|core| core.unpark(key)).flatten() {
                complete(Box::new(outcome));
            }
        });

        true
    }
}

impl<T> Drop for RemoteResolver<T> {
    fn drop(&mut self) {
        if self.done {
            return;
        }

        // Unblocks the loop, the future stays unresolved.
        let key = self.key;
        self.remote.post(move || {
            let parked = context::try_with_core(|core| core.unpark(key)).flatten();
            drop(parked);
        });
    }
}

impl<T> fmt::Debug for RemoteResolver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteResolver")
            .field("key", &self.key)
            .field("done", &self.done)
            .finish()
    }
}

/// Starts a callback-style operation and returns a handle to its outcome.
///
/// `op` is invoked immediately with the resolver. Arguments are captured by
/// the closure.
///
/// ```no_run
/// use std::time::Duration;
///
/// fn sum(a: u32, b: u32, done: fibra::Resolver<u32>) {
///     fibra::time::defer(move || {
///         done.ok(a + b);
///     });
/// }
///
/// # #[fibra::main]
/// # async fn main() -> fibra::Result<()> {
/// let handle = fibra::call_async(|resolver| sum(3, 4, resolver));
/// assert_eq!(handle.await?, 7);
/// # Ok(())
/// # }
/// ```
#[track_caller]
pub fn call_async<T, F>(op: F) -> FutureHandle<T>
where
    T: 'static,
    F: FnOnce(Resolver<T>),
{
    let handle = FutureHandle::new();
    op(handle.resolver());
    handle
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate as fibra;
    use crate::test_utils::*;
    use anyhow::Result;
    use static_assertions::{assert_impl_all, assert_not_impl_any};
    use std::thread;

    assert_not_impl_any!(FutureHandle<u32>: Send, Sync, Clone);
    assert_not_impl_any!(Resolver<u32>: Send, Sync);
    assert_impl_all!(RemoteResolver<u32>: Send);

    #[fibra::test]
    async fn test_sum_scenario() -> Result<()> {
        let handle = fibra::call_async(|resolver| mock_sum(3, 4, resolver));
        assert_eq!(handle.result().await?, 7);
        assert!(handle.is_resolved());
        assert!(handle.elapsed().is_some());
        Ok(())
    }

    #[fibra::test]
    async fn test_first_resolution_wins() -> Result<()> {
        let handle = FutureHandle::new();
        let resolver = handle.resolver();

        assert!(resolver.ok(1));
        assert!(!resolver.ok(2));
        assert!(!resolver.err(anyhow::anyhow!("late")));

        assert_eq!(handle.result().await?, 1);
        assert_eq!(handle.error().await, None);
        assert_eq!(handle.await?, 1);
        Ok(())
    }

    #[fibra::test]
    async fn test_first_error_is_kept() -> Result<()> {
        let handle = FutureHandle::<u32>::new();
        let resolver = handle.resolver();

        resolver.resolve(Err::<u32, _>(anyhow::anyhow!("boom")));
        resolver.ok(2);

        let err = handle.error().await.expect("resolved with an error");
        assert_eq!(err.to_string(), "boom");
        assert_eq!(handle.result().await, Err(err));
        Ok(())
    }

    #[fibra::test]
    async fn test_unbounded_timeout_resolves_normally() -> Result<()> {
        let handle = FutureHandle::<u32>::with_timeout(Duration::MAX);
        let resolver = handle.resolver();
        fibra::time::defer(move || {
            resolver.ok(5);
        });

        assert_eq!(handle.await?, 5);
        Ok(())
    }

    #[fibra::test]
    async fn test_timeout_fires_and_late_resolution_is_noop() -> Result<()> {
        let line = line!() + 1;
        let handle = FutureHandle::<u32>::with_timeout(Duration::from_millis(50));
        let resolver = handle.resolver();

        fibra::time::set_timeout(Duration::from_millis(100), move || {
            assert!(!resolver.ok(1), "late resolution must be ignored");
        });

        let start = Instant::now();
        let err = handle.error().await.expect("timed out");
        let elapsed = start.elapsed();

        assert!(err.is_timeout());
        assert!(err.to_string().contains(&format!("{}:{}", file!(), line)));
        assert!(err.to_string().contains("50ms"));
        assert!(elapsed >= Duration::from_millis(50));
        assert!(elapsed < Duration::from_millis(95), "elapsed {elapsed:?}");

        // Wait for the late producer so its assertion runs.
        fibra::sleep(Duration::from_millis(60)).await?;
        assert!(handle.result().await.is_err_and(|e| e.is_timeout()));
        Ok(())
    }

    #[fibra::test]
    async fn test_set_timeout_before_wait() -> Result<()> {
        let handle = FutureHandle::<()>::new();
        let _resolver = handle.resolver();
        assert_eq!(handle.timeout(), None);

        handle.set_timeout(Some(Duration::from_millis(5)));
        assert_eq!(handle.timeout(), Some(Duration::from_millis(5)));

        // Timer only armed by the wait.
        assert!(!handle.is_resolved());
        assert!(handle.await.is_err_and(|e| e.is_timeout()));
        Ok(())
    }

    #[fibra::test]
    async fn test_back_to_back_futures_overlap() -> Result<()> {
        let start = Instant::now();

        let a = fibra::call_async(|resolver| mock_delayed(Duration::from_millis(100), 1, resolver));
        let b = fibra::call_async(|resolver| mock_delayed(Duration::from_millis(100), 2, resolver));

        assert_eq!(a.await? + b.await?, 3);
        assert!(start.elapsed() < Duration::from_millis(150));
        Ok(())
    }

    #[fibra::test]
    async fn test_remote_resolution_lands_on_loop_thread() -> Result<()> {
        let loop_thread = thread::current().id();

        let handle = FutureHandle::new();
        let remote = handle.resolver().into_remote();

        thread::spawn(move || remote.ok(thread::current().id()));

        let resolver_thread = handle.await?;
        assert_ne!(resolver_thread, loop_thread);
        assert!(context::with_core(|core| core.parked.borrow().is_empty()));
        Ok(())
    }

    #[fibra::test]
    async fn test_dropped_remote_resolver_releases_loop() -> Result<()> {
        let handle = FutureHandle::<u32>::new();
        let remote = handle.resolver().into_remote();
        thread::spawn(move || drop(remote)).join().expect("thread panicked");

        drop(handle);
        fibra::time::yield_now().await;
        assert!(context::with_core(|core| core.parked.borrow().is_empty()));
        Ok(())
    }

    #[test]
    fn test_handle_outside_runtime() {
        let handle = FutureHandle::new();
        handle.resolver().ok("value");

        let res = futures::executor::block_on(handle.into_future());
        assert_eq!(res, Ok("value"));
    }

    #[fibra::test]
    async fn test_stats_track_futures() -> Result<()> {
        let before = fibra::stats();

        let handle = FutureHandle::<()>::new();
        assert_eq!(fibra::stats().futures_active, before.futures_active + 1);
        assert_eq!(fibra::stats().futures_total, before.futures_total + 1);

        handle.resolver().ok(());
        assert_eq!(fibra::stats().futures_active, before.futures_active);

        // Dropping an unresolved future also releases it.
        drop(FutureHandle::<()>::new());
        assert_eq!(fibra::stats().futures_active, before.futures_active);
        Ok(())
    }
}
