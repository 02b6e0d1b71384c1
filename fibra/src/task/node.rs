use crate::runtime::{ErrorSink, TaskOpts};
use crate::task::{Id, JoinRegistry, Scope, State};
use std::fmt;
use std::rc::{Rc, Weak};

// Everything the engine knows about a task besides its future. The future
// lives in the scheduler registry, the node is shared with the task handles,
// with the futures created by the task and with the task's children.
pub(crate) struct TaskNode {
    pub(crate) id: Id,

    pub(crate) opts: TaskOpts,

    pub(crate) state: State,

    // Weak to avoid a cycle through the children that hold on to us. The id is
    // kept on the side so it can still be reported after the parent is gone.
    parent: Option<(Id, Weak<TaskNode>)>,

    pub(crate) scope: Rc<Scope>,

    pub(crate) join: JoinRegistry,

    // Route to this task's completion handler, for children that fail without
    // a handler of their own. `None` when the task was started without one.
    pub(crate) sink: Option<Rc<dyn ErrorSink>>,
}

impl TaskNode {
    /// Node of the future driven by `block_on`.
    pub(crate) fn new_root() -> Rc<Self> {
        Rc::new(Self {
            id: Id::next(),
            opts: TaskOpts::empty(),
            state: State::new(),
            parent: None,
            scope: Scope::new_root(),
            join: JoinRegistry::default(),
            sink: None,
        })
    }

    pub(crate) fn new(
        opts: TaskOpts,
        parent: Option<&Rc<TaskNode>>,
        sink: Option<Rc<dyn ErrorSink>>,
    ) -> Rc<Self> {
        let parent = parent.filter(|_| !opts.is_detached());

        let scope = match parent {
            Some(parent) => Scope::new_child(&parent.scope),
            None => Scope::new_root(),
        };

        Rc::new(Self {
            id: Id::next(),
            opts,
            state: State::new(),
            parent: parent.map(|parent| (parent.id, Rc::downgrade(parent))),
            scope,
            join: JoinRegistry::default(),
            sink,
        })
    }

    pub(crate) fn parent(&self) -> Option<Rc<TaskNode>> {
        self.parent.as_ref().and_then(|(_, parent)| parent.upgrade())
    }

    pub(crate) fn parent_id(&self) -> Option<Id> {
        self.parent.as_ref().map(|(id, _)| *id)
    }
}

impl fmt::Debug for TaskNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskNode")
            .field("id", &self.id)
            .field("opts", &self.opts)
            .field("state", &self.state.load())
            .field("parent", &self.parent_id())
            .field("pending_futures", &self.join.len())
            .field("has_handler", &self.sink.is_some())
            .finish()
    }
}
