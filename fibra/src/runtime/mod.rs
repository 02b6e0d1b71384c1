use crate::task::Id;
use std::rc::Rc;

// Public API
mod builder;
pub use builder::{Builder, UnhandledErrorPolicy};
pub(crate) use builder::RuntimeConfig;

#[allow(clippy::module_inception)]
mod runtime;
pub use runtime::{Runtime, block_on};

mod remote;
pub use remote::{Remote, remote};
pub(crate) use remote::Injector;

mod spawn;
pub use spawn::{TaskBuilder, TaskOpts, run_task, spawn, task_builder};

mod stats;
pub use stats::{Stats, stats};
pub(crate) use stats::StatsCell;

// Exports
pub(crate) mod local;

mod registry;
pub(crate) use registry::{BoxFuture, OwnedTasks, Task};

pub(crate) mod supervisor;
pub(crate) use supervisor::ErrorSink;

/// Scheduler trait
pub(crate) trait Schedule {
    /// Queue a task that was just started. It runs on a later loop iteration,
    /// never inline.
    fn schedule(&self, task: Rc<Task>);

    /// Wake a task from the loop thread. Same semantics as its waker, without
    /// the round trip through the injector.
    fn wake(&self, id: Id);

    /// Put the current task back at the end of the ready queue without
    /// waiting for an external event.
    fn yield_now(&self, id: Id);

    /// The task completed and can be dropped by the runtime. Returns `None`
    /// if it was already released.
    fn release(&self, id: Id) -> Option<Rc<Task>>;
}
