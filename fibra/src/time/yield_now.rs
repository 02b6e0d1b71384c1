use crate::context;
use crate::runtime::Schedule;
use crate::task;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Future returned by [`yield_now`].
#[derive(Debug, Clone, Copy)]
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct YieldNow {
    awaiting_first_poll: bool,
}

/// Suspends the current task and puts it back at the end of the ready queue,
/// behind every task that is already ready.
///
/// Outside a task the waker is woken directly, so the caller is polled again
/// by whatever drives it.
pub fn yield_now() -> YieldNow {
    YieldNow {
        awaiting_first_poll: true,
    }
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // Only yield on first poll. Next time task is scheduled we will return.
        if !self.awaiting_first_poll {
            return Poll::Ready(());
        }
        self.awaiting_first_poll = false;

        let yielded = task::try_id()
            .and_then(|id| context::try_with_scheduler(|s| s.yield_now(id)))
            .is_some();

        if !yielded {
            cx.waker().wake_by_ref();
        }

        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate as fibra;
    use crate::utils::scheduler::{Call, Method};
    use anyhow::Result;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[fibra::test]
    async fn test_yield_now_is_tracked() -> Result<()> {
        let id = task::id();
        yield_now().await;

        context::with_scheduler(|s| {
            let yield_calls = s.tracker.get_calls(&Method::YieldNow);
            assert_eq!(yield_calls, vec![Call::YieldNow { id }]);
        });

        Ok(())
    }

    #[fibra::test]
    async fn test_yield_lets_ready_tasks_run_first() -> Result<()> {
        let order = Rc::new(RefCell::new(Vec::new()));

        let mut handles = Vec::new();
        for name in ["a", "b"] {
            let order = Rc::clone(&order);
            handles.push(fibra::spawn(async move {
                order.borrow_mut().push(format!("{name} start"));
                yield_now().await;
                order.borrow_mut().push(format!("{name} end"));
            }));
        }

        for handle in handles {
            handle.await?;
        }

        assert_eq!(
            *order.borrow(),
            vec!["a start", "b start", "a end", "b end"]
        );
        Ok(())
    }

    #[test]
    fn test_yield_outside_runtime_completes() {
        futures::executor::block_on(yield_now());
    }
}
