use crate::context;
use crate::runtime::local::worker::Worker;
use crate::runtime::{BoxFuture, Injector, OwnedTasks, RuntimeConfig, Schedule, Task};
use crate::task::{Id, TaskNode, TransitionToIdle, TransitionToNotified, TransitionToRunning, task_waker};
#[allow(unused)]
use crate::utils::scheduler::{Call, Method, Tracker};
use crate::utils::ScopeGuard;
use std::cell::{Cell, RefCell};
use std::ops::Deref;
use std::rc::Rc;
use std::sync::Arc;
use std::task::Poll;
use tracing::trace;

#[derive(Debug)]
pub(crate) struct Scheduler {
    pub(crate) cfg: RuntimeConfig,

    pub(crate) worker: Worker,

    pub(crate) tasks: OwnedTasks,

    pub(crate) injector: Arc<Injector>,

    /// Node of the future passed to `block_on`, while it runs.
    root: RefCell<Option<Rc<TaskNode>>>,

    pub(crate) root_woken: Cell<bool>,

    #[cfg(test)]
    pub(crate) tracker: Tracker,
}

impl Scheduler {
    pub(crate) fn new(cfg: &RuntimeConfig, injector: Arc<Injector>) -> Self {
        Self {
            cfg: cfg.clone(),
            worker: Worker::new(),
            tasks: OwnedTasks::default(),
            injector,
            root: RefCell::new(None),
            root_woken: Cell::new(true),

            #[cfg(test)]
            tracker: Tracker::new(),
        }
    }

    pub(crate) fn into_handle(self) -> Handle {
        Handle(Rc::new(self))
    }

    pub(crate) fn set_root_woken(&self) {
        self.root_woken.set(true);
    }

    pub(crate) fn reset_root_woken(&self) -> bool {
        self.root_woken.replace(false)
    }

    fn is_root(&self, id: Id) -> bool {
        self.root.borrow().as_ref().is_some_and(|root| root.id == id)
    }

    // Small price to pay to get introspection on all scheduler calls during
    // testing. No op in release builds.
    #[allow(unused)]
    #[inline(always)]
    fn track(&self, method: Method, call: Call) {
        #[cfg(test)]
        self.tracker.record(method, call);
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Handle(Rc<Scheduler>);

impl Schedule for Handle {
    fn schedule(&self, task: Rc<Task>) {
        let transition = task.node.state.transition_to_notified();
        self.track(
            Method::Schedule,
            Call::Schedule {
                id: task.id(),
                transition,
            },
        );

        if transition == TransitionToNotified::Submit {
            self.worker.push(task.id());
        }
    }

    fn wake(&self, id: Id) {
        if self.is_root(id) {
            self.set_root_woken();
            return;
        }

        let transition = match self.tasks.get(&id) {
            Some(task) => task.node.state.transition_to_notified(),
            None => TransitionToNotified::Ignored,
        };
        self.track(Method::Wake, Call::Wake { id, transition });

        match transition {
            TransitionToNotified::Submit => self.worker.push(id),
            TransitionToNotified::Coalesced => {}
            TransitionToNotified::Ignored => {
                trace!(task.id = %id, "ignoring wake of a completed task");
            }
        }
    }

    fn yield_now(&self, id: Id) {
        self.track(Method::YieldNow, Call::YieldNow { id });
        self.wake(id);
    }

    fn release(&self, id: Id) -> Option<Rc<Task>> {
        self.track(Method::Release, Call::Release { id });
        self.tasks.remove(&id)
    }
}

impl Handle {
    /// Registers a new task and queues it.
    pub(crate) fn spawn(&self, node: Rc<TaskNode>, future: BoxFuture) {
        self.track(
            Method::Spawn,
            Call::Spawn {
                id: node.id,
                opts: node.opts,
            },
        );

        let waker = task_waker(node.id, &self.injector);
        let task = Rc::new(Task::new(node, future, waker));

        let prev = self.tasks.insert(Rc::clone(&task));
        debug_assert!(prev.is_none(), "task ids are unique");

        context::with_core(|core| core.stats.task_started());
        trace!(task.id = %task.id(), parent.id = ?task.node.parent_id(), "task created");

        self.schedule(task);
    }

    #[track_caller]
    pub(crate) fn block_on<F: Future>(&self, future: F) -> F::Output {
        let root = TaskNode::new_root();

        {
            let mut slot = self.root.borrow_mut();
            assert!(
                slot.is_none(),
                "Cannot start a runtime from within a runtime. This happens because a function \
                 attempted to block the current thread while the thread is being used to drive \
                 tasks."
            );
            *slot = Some(Rc::clone(&root));
        }

        let _guard = ScopeGuard::new(|| {
            self.root.borrow_mut().take();
        });

        // The root waits for its own futures like any other task.
        let node = Rc::clone(&root);
        let future = async move {
            let output = future.await;
            node.join.drain().await;
            output
        };

        self.set_root_woken();
        self.worker.event_loop(self, &root, future)
    }

    /// Polls `task` once. Called by the worker for every id it pops.
    pub(crate) fn run(&self, task: Rc<Task>) {
        let id = task.id();

        if task.node.state.transition_to_running() == TransitionToRunning::Failed {
            trace!(task.id = %id, "skipping task that is running or completed");
            return;
        }

        let res = {
            let _guard = context::enter_task(Rc::clone(&task.node));
            task.poll()
        };

        match res {
            Poll::Ready(()) => {
                self.release(id);
                trace!(task.id = %id, "task completed");
            }
            Poll::Pending => {
                if task.node.state.transition_to_idle() == TransitionToIdle::OkNotified {
                    self.worker.push(id);
                }
            }
        }
    }

    /// Drops every task still owned by the scheduler, without running their
    /// completion handlers. Returns how many were dropped.
    pub(crate) fn shutdown(&self) -> usize {
        self.worker.clear();

        // Dropped outside of the registry borrow: task futures own handles
        // whose destructors look at the context.
        let tasks = self.tasks.drain();
        let dropped = tasks.len();
        drop(tasks);

        dropped
    }

    #[cfg(test)]
    pub(crate) fn track_unhandled(&self, id: Id, err: &crate::Error) {
        self.track(
            Method::Unhandled,
            Call::Unhandled {
                id,
                error: err.to_string(),
            },
        );
    }
}

impl Deref for Handle {
    type Target = Rc<Scheduler>;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
