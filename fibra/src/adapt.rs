//! Adapters between callback-style functions and tasks.
//!
//! [`from_callback`] turns a function that reports through a [`Resolver`] into
//! one returning an awaitable [`FutureHandle`]. [`into_callback`] goes the other
//! way: an async function becomes one that runs as a task and reports through a
//! completion callback.
//!
//! ```no_run
//! use fibra::adapt;
//!
//! fn add(args: (u32, u32), done: fibra::Resolver<u32>) {
//!     fibra::time::defer(move || {
//!         done.ok(args.0 + args.1);
//!     });
//! }
//!
//! # #[fibra::main]
//! # async fn main() -> fibra::Result<()> {
//! let add = adapt::from_callback(add);
//! assert_eq!(add.call((3, 4)).await?, 7);
//!
//! let double = adapt::into_callback(|n: u32| async move { Ok::<_, fibra::Error>(n * 2) });
//! double.call(21, |res| assert_eq!(res.unwrap(), 42));
//! # Ok(())
//! # }
//! ```
use crate::error::Result;
use crate::future::{FutureHandle, Resolver, call_async};
use crate::runtime;
use crate::task::TaskHandle;
use std::fmt;
use std::marker::PhantomData;

/// Callback-style function made awaitable. Created by [`from_callback`].
pub struct SyncFn<A, T, Op> {
    op: Op,
    _marker: PhantomData<fn(A) -> T>,
}

impl<A, T, Op> SyncFn<A, T, Op>
where
    T: 'static,
    Op: Fn(A, Resolver<T>),
{
    /// Starts the operation and returns the handle to await.
    #[track_caller]
    pub fn call(&self, args: A) -> FutureHandle<T> {
        call_async(|resolver| (self.op)(args, resolver))
    }
}

impl<A, T, Op> fmt::Debug for SyncFn<A, T, Op> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncFn").finish_non_exhaustive()
    }
}

/// Wraps `op`, which reports its outcome through a [`Resolver`], so that its
/// callers can await the outcome instead.
pub fn from_callback<A, T, Op>(op: Op) -> SyncFn<A, T, Op>
where
    T: 'static,
    Op: Fn(A, Resolver<T>),
{
    SyncFn {
        op,
        _marker: PhantomData,
    }
}

/// Async function made callback-style. Created by [`into_callback`].
pub struct AsyncFn<A, F> {
    f: F,
    _marker: PhantomData<fn(A)>,
}

impl<A, T, F, Fut> AsyncFn<A, F>
where
    A: 'static,
    T: 'static,
    F: Fn(A) -> Fut + Clone + 'static,
    Fut: Future<Output = Result<T>> + 'static,
{
    /// Runs the function as a new task. `handler` receives the outcome once
    /// the task and every future it created completed.
    #[track_caller]
    pub fn call<H>(&self, args: A, handler: H) -> TaskHandle
    where
        H: FnOnce(Result<T>) + 'static,
    {
        let f = self.f.clone();
        runtime::run_task(move |_task| f(args), handler)
    }
}

impl<A, F> fmt::Debug for AsyncFn<A, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncFn").finish_non_exhaustive()
    }
}

/// Wraps the async function `f` so that callers hand it a completion callback
/// instead of awaiting it.
pub fn into_callback<A, T, F, Fut>(f: F) -> AsyncFn<A, F>
where
    F: Fn(A) -> Fut + Clone + 'static,
    Fut: Future<Output = Result<T>> + 'static,
{
    AsyncFn {
        f,
        _marker: PhantomData,
    }
}
