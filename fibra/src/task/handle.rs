use crate::context;
use crate::task::{Id, Scope, TaskNode, TaskState};
use std::fmt;
use std::rc::Rc;

/// A cheap, clonable view of a task.
///
/// Handed to the body of every task started with [`run_task`], returned by
/// [`run_task`] itself, and available from inside any task through
/// [`task::current()`].
///
/// [`run_task`]: crate::run_task
/// [`task::current()`]: crate::task::current
#[derive(Clone)]
pub struct TaskHandle {
    node: Rc<TaskNode>,
}

impl TaskHandle {
    pub(crate) fn new(node: Rc<TaskNode>) -> Self {
        Self { node }
    }

    pub fn id(&self) -> Id {
        self.node.id
    }

    pub fn state(&self) -> TaskState {
        self.node.state.load()
    }

    pub fn is_complete(&self) -> bool {
        self.node.state.is_complete()
    }

    /// Ambient key/value storage of this task, see [`Scope`].
    pub fn scope(&self) -> &Scope {
        &self.node.scope
    }

    /// Id of the task that started this one. `None` for root and detached
    /// tasks.
    pub fn parent_id(&self) -> Option<Id> {
        self.node.parent_id()
    }

    /// Number of futures created by this task that are not resolved yet.
    pub fn pending_futures(&self) -> usize {
        self.node.join.len()
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.node, f)
    }
}

/// Returns a handle to the running task.
///
/// # Panics
///
/// Panics if called from outside a task. See [`try_current`] for a version
/// that doesn't panic.
#[track_caller]
pub fn current() -> TaskHandle {
    try_current().expect("Can't get the current task when not inside a task")
}

/// Returns a handle to the running task, or `None` outside of one.
pub fn try_current() -> Option<TaskHandle> {
    context::current_task().map(TaskHandle::new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate as fibra;
    use anyhow::Result;
    use static_assertions::assert_not_impl_any;

    // Tasks never leave the loop thread.
    assert_not_impl_any!(TaskHandle: Send, Sync);

    #[test]
    fn test_try_current_outside_task() {
        assert!(try_current().is_none());
    }

    #[fibra::test]
    async fn test_current_inside_root() -> Result<()> {
        let handle = current();
        assert_eq!(handle.state(), TaskState::Running);
        assert_eq!(handle.parent_id(), None);
        assert_eq!(Some(handle.id()), fibra::task::try_id());
        Ok(())
    }
}
