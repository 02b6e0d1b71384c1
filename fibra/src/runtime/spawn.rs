//! Functions and types for starting new tasks on the runtime.
//!
//! [`run_task`] is the callback-style entry point: a body and a completion
//! handler. [`spawn`] is the future-style one: the outcome comes back as a
//! [`FutureHandle`] that the caller awaits. [`TaskBuilder`] gives access to
//! [`TaskOpts`] for both.
use crate::context;
use crate::error::{Error, Result};
use crate::future::FutureHandle;
use crate::runtime::supervisor::{self, Completion, ErrorSink, Handler};
use crate::task::{TaskHandle, TaskNode};
use bitflags::bitflags;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::rc::Rc;

/// Starts a task running `body` and reports its outcome to `handler`.
///
/// The body receives a [`TaskHandle`] to its own task. It can wait on futures,
/// `parallel` joins and sleeps. The handler fires exactly once, after the body
/// returned *and* every future the task created resolved. A panic in the body
/// is reported as [`Error::Panicked`].
///
/// The task is queued and starts running on the next loop iteration.
///
/// ```no_run
/// # #[fibra::main]
/// # async fn main() {
/// fibra::run_task(
///     |_task| async {
///         fibra::sleep(std::time::Duration::from_millis(10)).await?;
///         Ok::<_, fibra::Error>(42)
///     },
///     |res| assert_eq!(res.unwrap(), 42),
/// );
/// # }
/// ```
///
/// # Panics
///
/// Panics when called outside a runtime.
#[track_caller]
pub fn run_task<T, B, Fut, H>(body: B, handler: H) -> TaskHandle
where
    T: 'static,
    B: FnOnce(TaskHandle) -> Fut + 'static,
    Fut: Future<Output = Result<T>> + 'static,
    H: FnOnce(Result<T>) + 'static,
{
    TaskBuilder::default().run_with(body, handler)
}

/// Runs `future` as a child task and returns a handle to its outcome.
///
/// The handle belongs to the calling task, so the caller does not complete
/// before the child did.
///
/// ```no_run
/// # #[fibra::main]
/// # async fn main() {
/// let a = fibra::spawn(async { 1 });
/// let b = fibra::spawn(async { 2 });
///
/// assert_eq!(a.await.unwrap() + b.await.unwrap(), 3);
/// # }
/// ```
#[track_caller]
pub fn spawn<F>(future: F) -> FutureHandle<F::Output>
where
    F: Future + 'static,
    F::Output: 'static,
{
    TaskBuilder::default().spawn(future)
}

/// Creates a new [`TaskBuilder`] for configuring and starting a task.
pub fn task_builder() -> TaskBuilder {
    TaskBuilder::default()
}

bitflags! {
    /// Configuration options for a new task.
    ///
    /// Passed to the runtime via [`TaskBuilder::with_opts`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
    pub struct TaskOpts: u16 {
        /// The task has no parent: it starts with an empty root scope and its
        /// unhandled errors are never forwarded to the task that started it.
        const DETACHED = 1;
    }
}

impl TaskOpts {
    pub(crate) fn is_detached(&self) -> bool {
        self.contains(TaskOpts::DETACHED)
    }
}

/// A builder for configuring and starting a new task.
///
/// Created by calling [`task_builder()`].
///
/// ```no_run
/// use fibra::runtime::TaskOpts;
///
/// # #[fibra::main]
/// # async fn main() {
/// fibra::task_builder()
///     .with_opts(TaskOpts::DETACHED)
///     .run(|_task| async {
///         // ...
///         Ok(())
///     });
/// # }
/// ```
#[derive(Debug, Default)]
pub struct TaskBuilder {
    opts: TaskOpts,
}

impl TaskBuilder {
    /// Sets the [`TaskOpts`] for the new task.
    pub fn with_opts(mut self, opts: TaskOpts) -> Self {
        self.opts = opts;
        self
    }

    /// Starts a task without a completion handler. A failure is forwarded to
    /// the parent's handler, or treated as unhandled.
    #[track_caller]
    pub fn run<T, B, Fut>(self, body: B) -> TaskHandle
    where
        T: 'static,
        B: FnOnce(TaskHandle) -> Fut + 'static,
        Fut: Future<Output = Result<T>> + 'static,
    {
        start(self.opts, body, None)
    }

    /// Starts a task reporting to `handler`. See [`run_task`].
    #[track_caller]
    pub fn run_with<T, B, Fut, H>(self, body: B, handler: H) -> TaskHandle
    where
        T: 'static,
        B: FnOnce(TaskHandle) -> Fut + 'static,
        Fut: Future<Output = Result<T>> + 'static,
        H: FnOnce(Result<T>) + 'static,
    {
        start(self.opts, body, Some(Box::new(handler)))
    }

    /// Starts `future` as a task and returns a handle to its outcome. See
    /// [`spawn`].
    #[track_caller]
    pub fn spawn<F>(self, future: F) -> FutureHandle<F::Output>
    where
        F: Future + 'static,
        F::Output: 'static,
    {
        let handle = FutureHandle::new();
        let resolver = handle.resolver();

        start(
            self.opts,
            move |_| async move { Ok::<_, Error>(future.await) },
            Some(Box::new(move |res: Result<F::Output>| {
                resolver.settle(res);
            })),
        );

        handle
    }
}

#[track_caller]
fn start<T, B, Fut>(opts: TaskOpts, body: B, handler: Option<Handler<T>>) -> TaskHandle
where
    T: 'static,
    B: FnOnce(TaskHandle) -> Fut + 'static,
    Fut: Future<Output = Result<T>> + 'static,
{
    let completion = handler.map(|handler| Rc::new(Completion::new(handler)));
    let sink = completion.clone().map(|c| c as Rc<dyn ErrorSink>);

    let parent = context::current_task();
    let node = TaskNode::new(opts, parent.as_ref(), sink);
    let handle = TaskHandle::new(Rc::clone(&node));

    let body_handle = handle.clone();
    let task_node = Rc::clone(&node);
    let future = async move {
        let outcome = AssertUnwindSafe(async move { body(body_handle).await })
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| Err(Error::panicked(payload)));

        node.join.drain().await;
        node.state.transition_to_complete();
        context::with_core(|core| core.stats.task_completed());

        supervisor::finish(&node, completion.as_deref(), outcome);
    };

    context::with_scheduler(|s| s.spawn(task_node, Box::pin(future)));

    handle
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate as fibra;
    use crate::runtime::Builder;
    use crate::task::TaskState;
    use crate::test_utils::init_local_runtime;
    use anyhow::Result;
    use std::cell::{Cell, RefCell};
    use std::time::Duration;

    #[test]
    fn test_task_is_created_then_completed() -> Result<()> {
        let (runtime, _scheduler) = init_local_runtime(None)?;
        let seen = Rc::new(Cell::new(None));

        let seen_clone = Rc::clone(&seen);
        let handle = runtime.run_task(|_| async { Ok(21 * 2) }, move |res| {
            seen_clone.set(res.ok());
        });

        assert_eq!(handle.state(), TaskState::Created);
        assert_eq!(seen.get(), None);

        runtime.block_on(async {});

        assert_eq!(handle.state(), TaskState::Completed);
        assert_eq!(seen.get(), Some(42));
        Ok(())
    }

    #[fibra::test]
    async fn test_panic_in_body_becomes_error() -> Result<()> {
        let handle = fibra::spawn(async {
            if fibra::task::try_id().is_some() {
                panic!("kaboom");
            }
        });

        let err = handle.await.expect_err("task panicked");
        assert_eq!(err, Error::Panicked("kaboom".to_owned()));
        Ok(())
    }

    #[fibra::test]
    async fn test_body_receives_own_handle() -> Result<()> {
        let parent = fibra::task::id();

        let child = fibra::spawn(async move {
            let me = fibra::task::current();
            (me.id(), me.parent_id(), me.state())
        });

        let (id, parent_id, state) = child.await?;
        assert!(id > parent);
        assert_eq!(parent_id, Some(parent));
        assert_eq!(state, TaskState::Running);
        Ok(())
    }

    #[fibra::test]
    async fn test_handler_waits_for_pending_futures() -> Result<()> {
        let order = Rc::new(RefCell::new(Vec::new()));

        let order_body = Rc::clone(&order);
        let order_handler = Rc::clone(&order);
        let done = FutureHandle::<()>::new();
        let done_resolver = done.resolver();

        fibra::run_task(
            move |_| async move {
                // Created and never waited on by the body itself.
                for (i, delay) in [30, 10, 20].into_iter().enumerate() {
                    let order = Rc::clone(&order_body);
                    let handle = FutureHandle::<()>::new();
                    let resolver = handle.resolver();
                    fibra::time::set_timeout(Duration::from_millis(delay), move || {
                        order.borrow_mut().push(format!("future {i}"));
                        resolver.ok(());
                    });
                }
                order_body.borrow_mut().push("body returned".to_owned());
                Ok(())
            },
            move |res| {
                assert!(res.is_ok());
                order_handler.borrow_mut().push("handler".to_owned());
                done_resolver.ok(());
            },
        );

        done.await?;
        assert_eq!(
            *order.borrow(),
            vec!["body returned", "future 1", "future 2", "future 0", "handler"]
        );
        Ok(())
    }

    #[fibra::test]
    async fn test_child_error_reaches_parent_handler_once() -> Result<()> {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen_clone = Rc::clone(&seen);

        fibra::run_task(
            |_| async {
                fibra::task_builder().run(|_| async {
                    Err::<(), _>(Error::other(anyhow::anyhow!("child failed")))
                });

                // Give the child time to fail while the parent is suspended.
                fibra::sleep(Duration::from_millis(20)).await?;
                Ok::<_, Error>("parent done")
            },
            move |res| seen_clone.borrow_mut().push(res.map_err(|e| e.to_string())),
        );

        fibra::sleep(Duration::from_millis(40)).await?;
        assert_eq!(
            *seen.borrow(),
            vec![Err("unexpected error: child failed".to_owned())]
        );
        Ok(())
    }

    #[test]
    #[should_panic(expected = "unhandled error in task")]
    fn test_unhandled_error_panics_when_configured() {
        let runtime = Builder::new_local()
            .unhandled_error(crate::runtime::UnhandledErrorPolicy::Panic)
            .try_build()
            .unwrap();

        runtime.block_on(async {
            fibra::task_builder()
                .with_opts(TaskOpts::DETACHED)
                .run(|_| async { Err::<(), _>(Error::ModeMismatch) });
        });
    }

    #[fibra::test(unhandled_error = "panic")]
    #[should_panic(expected = "unhandled error in task")]
    async fn test_unhandled_error_policy_from_attribute() {
        fibra::task_builder()
            .with_opts(TaskOpts::DETACHED)
            .run(|_| async { Err::<(), _>(Error::ModeMismatch) });
    }

    #[test]
    fn test_task_opts_default_is_empty() {
        assert!(TaskOpts::default().is_empty());
        assert!(TaskOpts::DETACHED.is_detached());
    }
}
