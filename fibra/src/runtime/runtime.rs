use crate::context;
use crate::error::Result;
use crate::future::FutureHandle;
use crate::runtime::{Remote, Stats, builder, local, spawn};
use crate::task::TaskHandle;
use std::fmt;

/// A single-threaded runtime driving tasks, timers and callbacks on the thread
/// that built it.
///
/// Built with [`Builder`](crate::runtime::Builder). Tasks started before
/// [`Runtime::block_on`] is called are queued and only start running once the
/// loop is driven.
pub struct Runtime {
    scheduler: local::Handle,
}

impl Runtime {
    pub(super) fn new(scheduler: local::Handle) -> Runtime {
        Runtime { scheduler }
    }

    /// Drives the loop until `future` completed, every future it created
    /// resolved, and the loop has nothing left to do: no ready task, no
    /// deferred callback, no armed timer and no pending `spawn_blocking` call.
    ///
    /// A panic inside `future` propagates out of this call.
    #[track_caller]
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.scheduler.block_on(future)
    }

    /// Same as [`fibra::run_task`](crate::run_task).
    #[track_caller]
    pub fn run_task<T, B, Fut, H>(&self, body: B, handler: H) -> TaskHandle
    where
        T: 'static,
        B: FnOnce(TaskHandle) -> Fut + 'static,
        Fut: Future<Output = Result<T>> + 'static,
        H: FnOnce(Result<T>) + 'static,
    {
        spawn::run_task(body, handler)
    }

    /// Same as [`fibra::spawn`](crate::spawn).
    #[track_caller]
    pub fn spawn<F>(&self, future: F) -> FutureHandle<F::Output>
    where
        F: Future + 'static,
        F::Output: 'static,
    {
        spawn::spawn(future)
    }

    pub fn stats(&self) -> Stats {
        context::with_core(|core| core.stats.snapshot())
    }

    /// Zeroes the `*_total` counters. Counters of live tasks and futures are
    /// kept.
    pub fn reset_stats(&self) {
        context::with_core(|core| core.stats.reset());
    }

    pub fn remote(&self) -> Remote {
        context::with_core(|core| core.remote())
    }

    /// Shuts the runtime down. Tasks that did not complete are dropped without
    /// running their completion handler, and the thread can build a new
    /// runtime afterwards.
    pub fn shutdown(self) {
        // Drop impl does the work.
    }

    fn shutdown_inner(&self) {
        let dropped = self.scheduler.shutdown();
        if dropped > 0 {
            tracing::debug!(tasks = dropped, "dropped incomplete tasks on shutdown");
        }

        context::clear_context();
        builder::set_runtime_inactive();
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.shutdown_inner();
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("scheduler", &self.scheduler)
            .finish()
    }
}

// Test-only helpers
#[cfg(test)]
impl Runtime {
    pub(crate) fn expect_local_scheduler(&self) -> local::Handle {
        self.scheduler.clone()
    }
}

/// Runs `future` to completion on the runtime of the current thread.
///
/// # Panics
///
/// Panics when no runtime was built on this thread, or when called from
/// within `block_on`.
#[track_caller]
pub fn block_on<F: Future>(future: F) -> F::Output {
    let scheduler = context::with_scheduler(|s| s.clone());
    scheduler.block_on(future)
}
