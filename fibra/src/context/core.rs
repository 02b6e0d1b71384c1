use crate::runtime::{Injector, Remote, RuntimeConfig, StatsCell};
use crate::task::TaskNode;
use crate::time::TimerHeap;
use slab::Slab;
use std::any::Any;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::Arc;

pub(crate) type Deferred = Box<dyn FnOnce()>;

/// Completion waiting for a value produced on another thread. The payload is
/// whatever the helper thread posted back through the [`Remote`].
pub(crate) type Parked = Box<dyn FnOnce(Box<dyn Any + Send>)>;

/// Thread-local resources of the runtime. Every field has interior mutability
/// so callers can hold `&Core` while touching several fields at once. Borrows
/// must never be held across a user callback, which may call back into the
/// core.
pub(crate) struct Core {
    pub(crate) cfg: RuntimeConfig,

    /// Timers armed through `set_timeout`, `sleep` and future timeouts.
    pub(crate) timers: RefCell<TimerHeap>,

    /// Callbacks to run on the next loop iteration.
    pub(crate) deferred: RefCell<VecDeque<Deferred>>,

    /// Completions of `spawn_blocking` calls whose helper thread is still
    /// running. The loop stays alive while this is not empty.
    pub(crate) parked: RefCell<Slab<Parked>>,

    /// Cross-thread entry point of the loop: wakes and posted closures.
    pub(crate) injector: Arc<Injector>,

    /// Task being polled right now. Used to attach new tasks and futures to
    /// their parent.
    pub(crate) current_task: RefCell<Option<Rc<TaskNode>>>,

    pub(crate) stats: StatsCell,
}

impl Core {
    pub(crate) fn new(cfg: &RuntimeConfig, injector: Arc<Injector>) -> Self {
        Self {
            cfg: cfg.clone(),
            timers: RefCell::new(TimerHeap::new()),
            deferred: RefCell::new(VecDeque::new()),
            parked: RefCell::new(Slab::new()),
            injector,
            current_task: RefCell::new(None),
            stats: StatsCell::default(),
        }
    }

    pub(crate) fn remote(&self) -> Remote {
        Remote::new(Arc::clone(&self.injector))
    }

    pub(crate) fn defer(&self, f: Deferred) {
        self.deferred.borrow_mut().push_back(f);
    }

    pub(crate) fn park(&self, completion: Parked) -> usize {
        self.parked.borrow_mut().insert(completion)
    }

    pub(crate) fn unpark(&self, key: usize) -> Option<Parked> {
        self.parked.borrow_mut().try_remove(key)
    }

    /// True if something other than the ready queue can still make progress:
    /// a deferred callback, a live timer, a helper thread or a posted job.
    pub(crate) fn has_pending_work(&self) -> bool {
        !self.deferred.borrow().is_empty()
            || !self.timers.borrow().is_empty()
            || !self.parked.borrow().is_empty()
            || !self.injector.is_empty()
    }
}
