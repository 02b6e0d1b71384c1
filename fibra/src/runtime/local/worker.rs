use crate::context;
use crate::runtime::Schedule;
use crate::runtime::local::Handle;
use crate::task::{Id, TaskNode, TransitionToRunning, task_waker};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::pin::{Pin, pin};
use std::rc::Rc;
use std::task::{Context, Poll};
use std::thread;
use std::time::Instant;
use tracing::trace;

#[derive(Debug)]
pub(crate) struct Worker {
    /// Ids of the tasks ready to be polled, in wake order.
    ready: RefCell<VecDeque<Id>>,
}

impl Worker {
    pub(super) fn new() -> Self {
        Self {
            ready: RefCell::new(VecDeque::new()),
        }
    }

    pub(crate) fn push(&self, id: Id) {
        self.ready.borrow_mut().push_back(id);
    }

    fn pop(&self) -> Option<Id> {
        self.ready.borrow_mut().pop_front()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.ready.borrow().len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.ready.borrow().is_empty()
    }

    pub(super) fn clear(&self) {
        self.ready.borrow_mut().clear();
    }

    /// Event loop driving the root future and every task to completion.
    ///
    /// One iteration: remote jobs and wakes, deferred callbacks, expired
    /// timers, up to `event_interval` ready tasks, then the root future if it
    /// was woken. Returns once the root future completed and nothing is left
    /// that could make progress.
    pub(super) fn event_loop<F: Future>(
        &self,
        scheduler: &Handle,
        root: &Rc<TaskNode>,
        root_fut: F,
    ) -> F::Output {
        let mut root_fut = pin!(root_fut);

        let waker = task_waker(root.id, &scheduler.injector);
        let mut cx = Context::from_waker(&waker);

        let mut root_result: Option<F::Output> = None;

        loop {
            self.drain_injector(scheduler);
            self.run_deferred();
            self.fire_timers();

            for _ in 0..scheduler.cfg.event_interval {
                let Some(id) = self.pop() else {
                    break;
                };

                // Released while it sat in the queue.
                if let Some(task) = scheduler.tasks.get(&id) {
                    scheduler.run(task);
                }
            }

            if scheduler.reset_root_woken() && root_result.is_none() {
                root_result = Self::poll_root(root, root_fut.as_mut(), &mut cx);
            }

            let has_pending_work = context::with_core(|core| core.has_pending_work());
            let is_idle = self.is_empty() && !has_pending_work;

            if is_idle && let Some(output) = root_result.take() {
                return output;
            }

            if self.is_empty() && !scheduler.root_woken.get() {
                self.park(scheduler);
            }
        }
    }

    fn poll_root<F: Future>(
        root: &Rc<TaskNode>,
        root_fut: Pin<&mut F>,
        cx: &mut Context<'_>,
    ) -> Option<F::Output> {
        if root.state.transition_to_running() == TransitionToRunning::Failed {
            return None;
        }

        let _guard = context::enter_task(Rc::clone(root));

        // Panics are not caught here, they surface out of `block_on`.
        match root_fut.poll(cx) {
            Poll::Ready(output) => {
                root.state.transition_to_complete();
                Some(output)
            }
            Poll::Pending => {
                root.state.transition_to_idle();
                None
            }
        }
    }

    fn drain_injector(&self, scheduler: &Handle) {
        while let Some(job) = scheduler.injector.pop_job() {
            job();
        }

        while let Some(id) = scheduler.injector.pop_wake() {
            scheduler.wake(id);
        }
    }

    // Callbacks deferred while these run wait for the next iteration.
    fn run_deferred(&self) {
        let deferred = context::with_core(|core| std::mem::take(&mut *core.deferred.borrow_mut()));

        for callback in deferred {
            callback();
        }
    }

    fn fire_timers(&self) {
        let expired = context::with_core(|core| core.timers.borrow_mut().pop_expired(Instant::now()));

        if !expired.is_empty() {
            trace!(timers = expired.len(), "firing expired timers");
        }

        for callback in expired {
            callback();
        }
    }

    // Blocks the thread until the next timer deadline, a remote wake or the
    // configured maximum, whichever comes first.
    fn park(&self, scheduler: &Handle) {
        let (next_deadline, has_immediate_work) = context::with_core(|core| {
            (
                core.timers.borrow_mut().next_deadline(),
                !core.deferred.borrow().is_empty() || !core.injector.is_empty(),
            )
        });

        if has_immediate_work {
            return;
        }

        let max = scheduler.cfg.max_park_duration;
        let timeout = match next_deadline {
            Some(deadline) => deadline.saturating_duration_since(Instant::now()).min(max),
            None => max,
        };

        if !timeout.is_zero() {
            thread::park_timeout(timeout);
        }
    }
}
