use crate::task::{Id, TaskNode};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

pub(crate) type BoxFuture = Pin<Box<dyn Future<Output = ()>>>;

/// A task as owned by the runtime: its node, the erased future driving body,
/// drain and completion, and the waker handed to that future.
pub(crate) struct Task {
    pub(crate) node: Rc<TaskNode>,

    // Taken out while polled, so a poll that re-enters the registry (a task
    // starting a task) never finds it borrowed.
    future: RefCell<Option<BoxFuture>>,

    waker: Waker,
}

impl Task {
    pub(crate) fn new(node: Rc<TaskNode>, future: BoxFuture, waker: Waker) -> Self {
        Self {
            node,
            future: RefCell::new(Some(future)),
            waker,
        }
    }

    pub(crate) fn id(&self) -> Id {
        self.node.id
    }

    pub(crate) fn poll(&self) -> Poll<()> {
        let Some(mut future) = self.future.borrow_mut().take() else {
            return Poll::Ready(());
        };

        let mut cx = Context::from_waker(&self.waker);
        match future.as_mut().poll(&mut cx) {
            Poll::Ready(()) => Poll::Ready(()),
            Poll::Pending => {
                *self.future.borrow_mut() = Some(future);
                Poll::Pending
            }
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task").field("node", &self.node).finish()
    }
}

// Every task started on the runtime and not completed yet. The scheduler only
// queues ids, this is where they turn back into tasks.
#[derive(Debug, Default)]
pub(crate) struct OwnedTasks {
    tasks: RefCell<HashMap<Id, Rc<Task>>>,
}

impl OwnedTasks {
    pub(crate) fn insert(&self, task: Rc<Task>) -> Option<Rc<Task>> {
        self.tasks.borrow_mut().insert(task.id(), task)
    }

    pub(crate) fn get(&self, id: &Id) -> Option<Rc<Task>> {
        self.tasks.borrow().get(id).cloned()
    }

    pub(crate) fn remove(&self, id: &Id) -> Option<Rc<Task>> {
        self.tasks.borrow_mut().remove(id)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.tasks.borrow().len()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.tasks.borrow().is_empty()
    }

    /// Removes every task and returns them, so they can be dropped outside of
    /// the borrow.
    pub(crate) fn drain(&self) -> Vec<Rc<Task>> {
        self.tasks.borrow_mut().drain().map(|(_, task)| task).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::TaskOpts;
    use futures::task::noop_waker;
    use std::cell::Cell;

    #[test]
    fn test_poll_keeps_pending_future() {
        let polls = Rc::new(Cell::new(0));
        let polls_clone = Rc::clone(&polls);

        let future = futures::future::poll_fn(move |_| {
            polls_clone.set(polls_clone.get() + 1);
            match polls_clone.get() {
                3 => Poll::Ready(()),
                _ => Poll::Pending,
            }
        });

        let node = TaskNode::new(TaskOpts::empty(), None, None);
        let task = Task::new(node, Box::pin(future), noop_waker());

        assert!(task.poll().is_pending());
        assert!(task.poll().is_pending());
        assert!(task.poll().is_ready());

        // Future was dropped after completion.
        assert!(task.poll().is_ready());
        assert_eq!(polls.get(), 3);
    }

    #[test]
    fn test_owned_tasks() {
        let owned = OwnedTasks::default();
        let node = TaskNode::new(TaskOpts::empty(), None, None);
        let id = node.id;

        let task = Rc::new(Task::new(node, Box::pin(async {}), noop_waker()));
        assert!(owned.insert(task).is_none());
        assert_eq!(owned.len(), 1);
        assert!(owned.get(&id).is_some());

        assert!(owned.remove(&id).is_some());
        assert!(owned.remove(&id).is_none());
        assert!(owned.drain().is_empty());
    }
}
