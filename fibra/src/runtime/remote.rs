use crate::context;
use crate::task::Id;
use crossbeam_queue::SegQueue;
use std::fmt;
use std::sync::Arc;
use std::thread::Thread;

pub(crate) type Job = Box<dyn FnOnce() + Send + 'static>;

// The only part of the runtime other threads may touch. Wakes and jobs are
// queued lock-free and the loop thread is unparked, the loop drains both
// queues at the top of every iteration.
pub(crate) struct Injector {
    wakes: SegQueue<Id>,
    jobs: SegQueue<Job>,
    thread: Thread,
}

impl Injector {
    pub(crate) fn new(thread: Thread) -> Self {
        Self {
            wakes: SegQueue::new(),
            jobs: SegQueue::new(),
            thread,
        }
    }

    pub(crate) fn push_wake(&self, id: Id) {
        self.wakes.push(id);
        self.thread.unpark();
    }

    pub(crate) fn push_job(&self, job: Job) {
        self.jobs.push(job);
        self.thread.unpark();
    }

    pub(crate) fn pop_wake(&self) -> Option<Id> {
        self.wakes.pop()
    }

    pub(crate) fn pop_job(&self) -> Option<Job> {
        self.jobs.pop()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.wakes.is_empty() && self.jobs.is_empty()
    }
}

impl fmt::Debug for Injector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Injector")
            .field("wakes", &self.wakes.len())
            .field("jobs", &self.jobs.len())
            .field("thread", &self.thread.name())
            .finish()
    }
}

/// A `Send + Clone` handle to a runtime, usable from any thread.
///
/// This is how work done outside the loop thread reports back: the posted
/// closure runs on the loop thread, where it can resolve futures, start tasks
/// or touch scopes.
///
/// ```no_run
/// # #[fibra::main]
/// # async fn main() {
/// let remote = fibra::runtime::remote();
///
/// std::thread::spawn(move || {
///     let sum = (1..=10).sum::<u64>();
///     remote.post(move || println!("computed {sum} off the loop thread"));
/// });
/// # }
/// ```
///
/// Futures are resolved from other threads through
/// [`Resolver::into_remote`](crate::Resolver::into_remote), which is built on
/// top of this.
#[derive(Clone)]
pub struct Remote {
    injector: Arc<Injector>,
}

impl Remote {
    pub(crate) fn new(injector: Arc<Injector>) -> Self {
        Self { injector }
    }

    /// Runs `f` on the loop thread during its next iteration. If the runtime is
    /// gone by then, `f` is dropped without running.
    pub fn post<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.injector.push_job(Box::new(f));
    }
}

impl fmt::Debug for Remote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Remote").finish_non_exhaustive()
    }
}

/// Returns a [`Remote`] for the runtime of the current thread.
///
/// # Panics
///
/// Panics when called outside a runtime.
#[track_caller]
pub fn remote() -> Remote {
    context::with_core(|core| core.remote())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate as fibra;
    use anyhow::Result;
    use static_assertions::assert_impl_all;
    use std::sync::Mutex;
    use std::thread;

    assert_impl_all!(Remote: Send, Sync, Clone);
    assert_impl_all!(Injector: Send, Sync);

    #[fibra::test]
    async fn test_post_runs_on_loop_thread() -> Result<()> {
        let ran_on = Arc::new(Mutex::new(None));

        let remote = remote();
        let ran_on_clone = Arc::clone(&ran_on);
        thread::spawn(move || {
            remote.post(move || {
                *ran_on_clone.lock().unwrap() = Some(thread::current().id());
            });
        });

        while ran_on.lock().unwrap().is_none() {
            fibra::time::yield_now().await;
        }

        assert_eq!(*ran_on.lock().unwrap(), Some(thread::current().id()));
        Ok(())
    }
}
