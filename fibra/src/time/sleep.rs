use crate::error::{Error, Result};
use crate::task;
use crate::time::{TimerId, clear_timeout, set_timeout};
use std::cell::{Cell, RefCell};
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};
use std::time::Duration;

/// Future returned by [`sleep`].
#[derive(Debug)]
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct Sleep {
    duration: Duration,
    state: Result<Option<Armed>>,
}

#[derive(Debug)]
struct Armed {
    timer: TimerId,
    shared: Rc<Shared>,
}

#[derive(Debug, Default)]
struct Shared {
    fired: Cell<bool>,
    waker: RefCell<Option<Waker>>,
}

impl Sleep {
    /// Creates a sleep for the current task.
    ///
    /// Fails with [`Error::NotInTask`] outside a task. A zero duration still
    /// goes through the timer, so the task yields once.
    pub fn try_new(duration: Duration) -> Result<Self> {
        if task::try_id().is_none() {
            return Err(Error::NotInTask { op: "sleep" });
        }

        Ok(Self {
            duration,
            state: Ok(None),
        })
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    fn arm(&self, waker: &Waker) -> Armed {
        let shared = Rc::new(Shared::default());
        shared.waker.replace(Some(waker.clone()));

        let on_fire = Rc::clone(&shared);
        let timer = set_timeout(self.duration, move || {
            on_fire.fired.set(true);
            if let Some(waker) = on_fire.waker.take() {
                waker.wake();
            }
        });

        Armed { timer, shared }
    }
}

/// Suspends the current task for at least `duration`.
///
/// Resolves to [`Error::NotInTask`] when awaited outside a task.
///
/// ```no_run
/// use std::time::Duration;
///
/// # #[fibra::main]
/// # async fn main() -> fibra::Result<()> {
/// fibra::sleep(Duration::from_millis(100)).await?;
/// println!("100 ms have elapsed");
/// # Ok(())
/// # }
/// ```
pub fn sleep(duration: Duration) -> Sleep {
    Sleep::try_new(duration).unwrap_or_else(|err| Sleep {
        duration,
        state: Err(err),
    })
}

impl Future for Sleep {
    type Output = Result<()>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        match &this.state {
            Err(err) => Poll::Ready(Err(err.clone())),
            Ok(Some(armed)) if armed.shared.fired.get() => Poll::Ready(Ok(())),
            Ok(Some(armed)) => {
                armed.shared.waker.replace(Some(cx.waker().clone()));
                Poll::Pending
            }
            Ok(None) => {
                let armed = this.arm(cx.waker());
                this.state = Ok(Some(armed));
                Poll::Pending
            }
        }
    }
}

impl Drop for Sleep {
    fn drop(&mut self) {
        if let Ok(Some(armed)) = &self.state
            && !armed.shared.fired.get()
        {
            clear_timeout(armed.timer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate as fibra;
    use anyhow::{Context, Result};
    use rstest::rstest;
    use std::time::Instant;

    #[rstest]
    #[case::one_ms(Duration::from_millis(1))]
    #[case::ten_ms(Duration::from_millis(10))]
    #[case::fifty_ms(Duration::from_millis(50))]
    #[fibra::test]
    async fn test_sleep_duration_is_accurate(#[case] duration: Duration) -> Result<()> {
        let start = Instant::now();
        let sleep = Sleep::try_new(duration).context("cant create sleep")?;

        sleep.await.context("sleep failed")?;
        let elapsed = start.elapsed();

        // The sleep should last for *at least* the specified duration.
        assert!(
            elapsed >= duration,
            "Sleep was shorter than expected. Elapsed: {:?}, Expected: >= {:?}",
            elapsed,
            duration
        );

        // Generous margin to prevent flaky tests on loaded machines.
        let upper_bound = duration + Duration::from_millis(50);
        assert!(
            elapsed < upper_bound,
            "Sleep was much longer than expected. Elapsed: {:?}, Expected: < {:?}",
            elapsed,
            upper_bound
        );

        Ok(())
    }

    #[fibra::test]
    async fn test_zero_sleep_yields() -> Result<()> {
        sleep(Duration::ZERO).await?;
        Ok(())
    }

    #[test]
    fn test_sleep_outside_task_errors() -> Result<()> {
        let res = Sleep::try_new(Duration::from_millis(1));
        assert_eq!(res.unwrap_err(), Error::NotInTask { op: "sleep" });

        // Awaiting it only requires a poll, no runtime.
        let res = futures::executor::block_on(sleep(Duration::from_millis(1)));
        assert!(res.is_err_and(|e| e.is_protocol()));
        Ok(())
    }

    #[fibra::test]
    async fn test_dropped_sleep_clears_its_timer() -> Result<()> {
        let sleep = sleep(Duration::from_secs(60));
        let mut sleep = Box::pin(sleep);

        // Arms the timer without waiting for it.
        assert!(futures::poll!(sleep.as_mut()).is_pending());
        drop(sleep);

        // The loop would otherwise stay alive for a minute.
        Ok(())
    }
}
