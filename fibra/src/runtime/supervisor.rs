//! Routing of task outcomes.
//!
//! A task outcome goes to the task's own completion handler. A failed task
//! without a handler forwards its error one level up, to the handler of the
//! task that started it. When nobody can take the error it is unhandled and
//! the runtime's [`UnhandledErrorPolicy`] decides what happens.
use crate::context;
use crate::error::{Error, Result};
use crate::runtime::UnhandledErrorPolicy;
use crate::task::{Id, TaskNode};
use std::cell::RefCell;
use std::fmt;
use tracing::{debug, error, warn};

pub(crate) type Handler<T> = Box<dyn FnOnce(Result<T>)>;

/// Type-erased view of a completion handler, used by children to forward an
/// error to their parent.
pub(crate) trait ErrorSink {
    /// Fires the handler with `err`. Hands the error back if the handler
    /// already fired.
    fn deliver(&self, err: Error) -> Result<(), Error>;
}

/// The completion handler of a task. Fires at most once, either with the
/// task's own outcome or with an error forwarded by a child.
pub(crate) struct Completion<T> {
    handler: RefCell<Option<Handler<T>>>,
}

impl<T> Completion<T> {
    pub(crate) fn new(handler: Handler<T>) -> Self {
        Self {
            handler: RefCell::new(Some(handler)),
        }
    }

    fn take(&self) -> Option<Handler<T>> {
        self.handler.borrow_mut().take()
    }
}

impl<T> ErrorSink for Completion<T> {
    fn deliver(&self, err: Error) -> Result<(), Error> {
        match self.take() {
            Some(handler) => {
                handler(Err(err));
                Ok(())
            }
            None => Err(err),
        }
    }
}

impl<T> fmt::Debug for Completion<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("fired", &self.handler.borrow().is_none())
            .finish()
    }
}

/// Delivers the outcome of a task whose body returned and whose futures
/// drained.
pub(crate) fn finish<T>(node: &TaskNode, completion: Option<&Completion<T>>, outcome: Result<T>) {
    match completion {
        Some(completion) => match completion.take() {
            Some(handler) => handler(outcome),
            None => discard(node.id, outcome),
        },
        None => {
            if let Err(err) = outcome {
                escalate(node, err);
            }
        }
    }
}

// The handler already fired because a child forwarded its error to it.
fn discard<T>(id: Id, outcome: Result<T>) {
    match outcome {
        Ok(_) => debug!(task.id = %id, "handler already fired, discarding task result"),
        Err(err) => warn!(task.id = %id, error = %err, "handler already fired, discarding task error"),
    }
}

fn escalate(node: &TaskNode, err: Error) {
    let err = match node.parent().and_then(|parent| parent.sink.clone()) {
        Some(sink) => match sink.deliver(err) {
            Ok(()) => {
                debug!(task.id = %node.id, parent.id = ?node.parent_id(), "forwarded task error to parent handler");
                return;
            }
            Err(err) => err,
        },
        None => err,
    };

    unhandled(node.id, err);
}

fn unhandled(id: Id, err: Error) {
    #[cfg(test)]
    context::try_with_scheduler(|s| s.track_unhandled(id, &err));

    let policy = context::try_with_core(|core| core.cfg.unhandled_error).unwrap_or_default();

    match policy {
        UnhandledErrorPolicy::Log => {
            error!(task.id = %id, error = %err, "unhandled task error");
        }
        UnhandledErrorPolicy::Panic => {
            panic!("unhandled error in task {id}: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::TaskOpts;
    use std::cell::Cell;
    use std::rc::Rc;

    fn recording_completion<T: 'static>() -> (Rc<Completion<T>>, Rc<RefCell<Vec<Result<T>>>>) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen_clone = Rc::clone(&seen);
        let completion = Rc::new(Completion::new(Box::new(move |res: Result<T>| {
            seen_clone.borrow_mut().push(res)
        }) as Handler<T>));

        (completion, seen)
    }

    #[test]
    fn test_handler_fires_once() {
        let (completion, seen) = recording_completion::<u32>();
        let node = TaskNode::new(TaskOpts::empty(), None, Some(completion.clone()));

        finish(&node, Some(&completion), Ok(1));
        finish(&node, Some(&completion), Ok(2));

        assert_eq!(*seen.borrow(), vec![Ok(1)]);
    }

    #[test]
    fn test_child_error_forwarded_to_parent_handler() {
        let (parent_completion, seen) = recording_completion::<u32>();
        let parent = TaskNode::new(TaskOpts::empty(), None, Some(parent_completion.clone()));
        let child = TaskNode::new(TaskOpts::empty(), Some(&parent), None);

        finish::<()>(&child, None, Err(Error::ModeMismatch));

        // Parent's own outcome arrives after the forwarded error and is dropped.
        finish(&parent, Some(&parent_completion), Ok(7));

        assert_eq!(*seen.borrow(), vec![Err(Error::ModeMismatch)]);
    }

    #[test]
    fn test_forwarding_is_one_level_only() {
        let (root_completion, seen) = recording_completion::<u32>();
        let grandparent = TaskNode::new(TaskOpts::empty(), None, Some(root_completion));
        let parent = TaskNode::new(TaskOpts::empty(), Some(&grandparent), None);
        let child = TaskNode::new(TaskOpts::empty(), Some(&parent), None);

        finish::<()>(&child, None, Err(Error::ModeMismatch));
        assert!(seen.borrow().is_empty());
    }

    #[test]
    fn test_successful_task_without_handler_is_silent() {
        let fired = Rc::new(Cell::new(false));
        let fired_clone = Rc::clone(&fired);
        let parent_completion = Rc::new(Completion::new(
            Box::new(move |_: Result<()>| fired_clone.set(true)) as Handler<()>,
        ));
        let parent = TaskNode::new(TaskOpts::empty(), None, Some(parent_completion));
        let child = TaskNode::new(TaskOpts::empty(), Some(&parent), None);

        finish(&child, None::<&Completion<u32>>, Ok(3));
        assert!(!fired.get());
    }
}
