use crate::context;
use crate::error::{Error, Result};
use crate::task::FutureId;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::{Rc, Weak};
use std::task::{Poll, Waker};
use tracing::debug;

/// Implemented by the shared state of every future so the registry can arm
/// pending timeouts while it drains.
pub(crate) trait Pending {
    fn arm_timeout(self: Rc<Self>);
}

/// Futures created by a task and not resolved yet.
///
/// Entries are weak: once every handle and resolver of a future is gone it can
/// never resolve, and the drain forgets about it instead of waiting forever.
#[derive(Default)]
pub(crate) struct JoinRegistry {
    pending: RefCell<BTreeMap<FutureId, Weak<dyn Pending>>>,
    waiter: RefCell<Option<Waker>>,
}

impl JoinRegistry {
    pub(crate) fn register(&self, id: FutureId, future: Weak<dyn Pending>) {
        self.pending.borrow_mut().insert(id, future);
    }

    pub(crate) fn deregister(&self, id: FutureId) {
        let now_empty = {
            let mut pending = self.pending.borrow_mut();
            pending.remove(&id).is_some() && pending.is_empty()
        };

        if now_empty && let Some(waker) = self.waiter.borrow_mut().take() {
            waker.wake();
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.borrow().len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.pending.borrow().is_empty()
    }

    /// Resolves once every registered future resolved. Values are discarded,
    /// each future keeps its own outcome for its readers.
    pub(crate) async fn drain(&self) {
        futures::future::poll_fn(|cx| {
            let live = self.prune();

            if live.is_empty() {
                return Poll::Ready(());
            }

            *self.waiter.borrow_mut() = Some(cx.waker().clone());

            // Timeouts only start counting when somebody waits, and this is a
            // wait. Arming may settle a future synchronously, so it happens
            // after the borrow on `pending` is released.
            for future in live {
                future.arm_timeout();
            }

            match self.is_empty() {
                true => Poll::Ready(()),
                false => Poll::Pending,
            }
        })
        .await
    }

    fn prune(&self) -> Vec<Rc<dyn Pending>> {
        let mut live = Vec::new();

        self.pending.borrow_mut().retain(|id, future| match future.upgrade() {
            Some(future) => {
                live.push(future);
                true
            }
            None => {
                debug!(future.id = %id, "future dropped before resolution, not waiting for it");
                false
            }
        });

        live
    }
}

/// Suspends the current task until every future it created so far resolved.
///
/// This happens implicitly when a task body returns. Calling it mid-body is
/// useful to make sure fire-and-forget work is done before moving on.
pub async fn wait_futures() -> Result<()> {
    let node = context::current_task().ok_or(Error::NotInTask { op: "wait_futures" })?;
    node.join.drain().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate as fibra;
    use crate::FutureHandle;
    use crate::time::defer;
    use anyhow::Result;
    use std::cell::Cell;
    use std::time::Duration;

    struct Dummy;

    impl Pending for Dummy {
        fn arm_timeout(self: Rc<Self>) {}
    }

    #[test]
    fn test_registry_counts_and_prunes_dead_entries() {
        let registry = JoinRegistry::default();
        let alive: Rc<dyn Pending> = Rc::new(Dummy);
        let dead: Rc<dyn Pending> = Rc::new(Dummy);

        registry.register(FutureId::next(), Rc::downgrade(&alive));
        registry.register(FutureId::next(), Rc::downgrade(&dead));
        assert_eq!(registry.len(), 2);

        drop(dead);
        assert_eq!(registry.prune().len(), 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_wait_futures_outside_task() {
        let res = futures::executor::block_on(wait_futures());
        assert_eq!(res, Err(Error::NotInTask { op: "wait_futures" }));
    }

    #[fibra::test]
    async fn test_wait_futures_mid_body() -> Result<()> {
        let done = Rc::new(Cell::new(0));

        for i in 0..3 {
            let handle = FutureHandle::<()>::new();
            let resolver = handle.resolver();
            let done = Rc::clone(&done);

            fibra::time::set_timeout(Duration::from_millis(10 * i), move || {
                done.set(done.get() + 1);
                resolver.ok(());
            });
        }

        fibra::task::wait_futures().await?;
        assert_eq!(done.get(), 3);
        Ok(())
    }

    #[fibra::test]
    async fn test_drain_forgets_unresolvable_future() -> Result<()> {
        // Nothing can ever resolve this one.
        drop(FutureHandle::<u32>::new());

        let handle = FutureHandle::<u32>::new();
        let resolver = handle.resolver();
        defer(move || {
            resolver.ok(1);
        });

        wait_futures().await?;
        assert_eq!(handle.await?, 1);
        Ok(())
    }
}
