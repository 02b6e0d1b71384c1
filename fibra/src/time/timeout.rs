use crate::error::{Error, Result};
use crate::time::{Sleep, sleep};
use pin_project::pin_project;
use std::panic::Location;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

/// Future returned by [`timeout`].
#[pin_project]
#[derive(Debug)]
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct Timeout<F> {
    #[pin]
    future: F,

    #[pin]
    delay: Sleep,

    bound: Duration,

    location: &'static Location<'static>,
}

/// Requires `future` to complete within `bound`.
///
/// On expiry the future is dropped and [`Error::Timeout`] is returned, naming
/// the bound and the call site of `timeout`. The inner future is always polled
/// first, so a future that is ready at the deadline wins.
#[track_caller]
pub fn timeout<F: Future>(bound: Duration, future: F) -> Timeout<F> {
    Timeout {
        future,
        delay: sleep(bound),
        bound,
        location: Location::caller(),
    }
}

impl<F: Future> Future for Timeout<F> {
    type Output = Result<F::Output>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();

        if let Poll::Ready(output) = this.future.poll(cx) {
            return Poll::Ready(Ok(output));
        }

        match this.delay.poll(cx) {
            Poll::Ready(Ok(())) => Poll::Ready(Err(Error::Timeout {
                bound: *this.bound,
                location: *this.location,
            })),
            Poll::Ready(Err(err)) => Poll::Ready(Err(err)),
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate as fibra;
    use anyhow::Result;

    #[fibra::test]
    async fn test_completes_within_bound() -> Result<()> {
        let res = timeout(Duration::from_millis(50), async {
            fibra::sleep(Duration::from_millis(5)).await?;
            Ok::<_, Error>(7)
        })
        .await?;

        assert_eq!(res?, 7);
        Ok(())
    }

    #[fibra::test]
    async fn test_expired_bound_names_call_site() -> Result<()> {
        let line = line!() + 1;
        let res = timeout(Duration::from_millis(5), fibra::sleep(Duration::from_secs(60))).await;

        let err = res.expect_err("timed out");
        assert!(err.is_timeout());
        assert!(
            err.to_string().contains(&format!("{}:{}", file!(), line)),
            "unexpected message: {err}"
        );
        Ok(())
    }
}
