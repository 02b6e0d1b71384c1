use crate::runtime::local;
use crate::task::TaskNode;
use crate::utils::ScopeGuard;
use std::cell::RefCell;
use std::rc::Rc;
use std::thread_local;

// Exports
mod core;
pub(crate) use core::{Core, Deferred, Parked};

pub(crate) struct RootContext {
    core: Rc<Core>,
    scheduler: local::Handle,
}

thread_local! {
    static CONTEXT: RefCell<Option<RootContext>> = const { RefCell::new(None) };
}

pub(crate) fn init_local_context(core: Rc<Core>, scheduler: local::Handle) {
    CONTEXT.with(|ctx| {
        ctx.borrow_mut().replace(RootContext { core, scheduler });
    });
}

pub(crate) fn clear_context() {
    // Drop outside of the borrow, the core owns user closures (timers, deferred
    // callbacks) whose destructors may look at the context again.
    let root = CONTEXT.with(|ctx| ctx.borrow_mut().take());
    drop(root);
}

pub(crate) fn is_active() -> bool {
    CONTEXT.with(|ctx| ctx.borrow().is_some())
}

// The `Rc`s are cloned out of the thread-local before running `f`, so `f` is
// free to re-enter the context.
pub(crate) fn try_with_core<F, R>(f: F) -> Option<R>
where
    F: FnOnce(&Core) -> R,
{
    let core = CONTEXT.with(|ctx| ctx.borrow().as_ref().map(|root| Rc::clone(&root.core)))?;
    Some(f(&core))
}

#[track_caller]
pub(crate) fn with_core<F, R>(f: F) -> R
where
    F: FnOnce(&Core) -> R,
{
    match try_with_core(f) {
        Some(res) => res,
        None => not_in_runtime(),
    }
}

pub(crate) fn try_with_scheduler<F, R>(f: F) -> Option<R>
where
    F: FnOnce(&local::Handle) -> R,
{
    let scheduler = CONTEXT.with(|ctx| ctx.borrow().as_ref().map(|root| root.scheduler.clone()))?;
    Some(f(&scheduler))
}

#[track_caller]
pub(crate) fn with_scheduler<F, R>(f: F) -> R
where
    F: FnOnce(&local::Handle) -> R,
{
    match try_with_scheduler(f) {
        Some(res) => res,
        None => not_in_runtime(),
    }
}

/// Node of the task being polled, `None` outside the runtime or between polls.
pub(crate) fn current_task() -> Option<Rc<TaskNode>> {
    try_with_core(|core| core.current_task.borrow().clone()).flatten()
}

/// Marks `node` as the running task until the guard drops, then restores the
/// previous one. Nested because a handler may start a task from within a task.
pub(crate) fn enter_task(node: Rc<TaskNode>) -> ScopeGuard<impl FnOnce()> {
    let prev = with_core(|core| core.current_task.replace(Some(node)));

    ScopeGuard::new(move || {
        try_with_core(|core| core.current_task.replace(prev));
    })
}

#[cold]
#[track_caller]
fn not_in_runtime() -> ! {
    panic!("must be called from within a fibra runtime, build one with `fibra::runtime::Builder`")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::Builder;
    use crate::test_utils::init_local_runtime;
    use anyhow::Result;
    use std::panic::catch_unwind;
    use std::thread;

    #[test]
    fn test_context_is_thread_local() -> Result<()> {
        let (_runtime, _scheduler) = init_local_runtime(Some(Builder::new_local().event_interval(7)))?;
        assert_eq!(with_core(|core| core.cfg.event_interval), 7);

        let handle = thread::spawn(move || -> Result<()> {
            assert!(!is_active());

            let (_runtime, _scheduler) =
                init_local_runtime(Some(Builder::new_local().event_interval(13)))?;
            assert_eq!(with_core(|core| core.cfg.event_interval), 13);
            Ok(())
        });

        assert!(handle.join().is_ok_and(|res| res.is_ok()));
        assert_eq!(with_core(|core| core.cfg.event_interval), 7);

        Ok(())
    }

    #[test]
    fn test_context_is_reentrant() -> Result<()> {
        let (_runtime, _scheduler) = init_local_runtime(None)?;

        assert!(
            catch_unwind(|| with_core(|_outer| with_scheduler(|_s| with_core(|_inner| {})))).is_ok(),
            "Can nest context accessors."
        );

        Ok(())
    }

    #[test]
    fn test_context_cleared_on_runtime_drop() -> Result<()> {
        let (runtime, _scheduler) = init_local_runtime(None)?;
        assert!(is_active());

        drop(runtime);
        assert!(!is_active());
        assert!(try_with_core(|_| ()).is_none());
        assert!(current_task().is_none());

        Ok(())
    }

    #[test]
    #[should_panic(expected = "must be called from within a fibra runtime")]
    fn test_with_core_outside_runtime_panics() {
        with_core(|_| ());
    }
}
