use crate::context;
use crate::error::Error;
use crate::future::FutureHandle;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::thread;
use tracing::{debug, error};

/// Runs `f` on a helper thread and returns a handle to its outcome.
///
/// The outcome is delivered back on the loop thread. A panic in `f` resolves
/// the handle with [`Error::Panicked`]. The loop stays alive while the helper
/// thread runs.
///
/// ```no_run
/// # #[fibra::main]
/// # async fn main() -> anyhow::Result<()> {
/// let read = fibra::future::spawn_blocking(|| {
///     std::fs::read("Cargo.toml").map(|bytes| bytes.len())
/// });
///
/// let len = read.await??;
/// println!("read {len} bytes");
/// # Ok(())
/// # }
/// ```
///
/// # Panics
///
/// Panics when called outside a runtime.
#[track_caller]
pub fn spawn_blocking<T, F>(f: F) -> FutureHandle<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let handle = FutureHandle::new();
    let resolver = handle.resolver();
    let remote = resolver.clone().into_remote();

    let name = context::with_core(|core| core.cfg.next_thread_name());
    let spawned = thread::Builder::new().name(name).spawn(move || {
        match catch_unwind(AssertUnwindSafe(f)) {
            Ok(value) => remote.ok(value),
            Err(payload) => remote.settle(Err(Error::panicked(payload))),
        };
    });

    match spawned {
        Ok(_) => debug!(future.id = %handle.id(), "spawned blocking helper thread"),
        Err(err) => {
            error!(error = %err, "failed to spawn blocking helper thread");
            resolver.settle(Err(Error::other(err.into())));
        }
    }

    handle
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate as fibra;
    use crate::runtime::Builder;
    use anyhow::Result;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[fibra::test]
    async fn test_result_delivered_on_loop_thread() -> Result<()> {
        let loop_thread = thread::current().id();

        let handle = spawn_blocking(|| {
            thread::sleep(Duration::from_millis(10));
            thread::current().id()
        });
        assert!(!handle.is_resolved());

        let helper_thread = handle.await?;
        assert_ne!(helper_thread, loop_thread);

        // The completion was unparked by the loop.
        assert!(context::with_core(|core| core.parked.borrow().is_empty()));
        Ok(())
    }

    #[fibra::test]
    async fn test_panic_becomes_error() -> Result<()> {
        let handle = spawn_blocking(|| -> u32 { panic!("helper exploded") });

        let err = handle.await.expect_err("helper panicked");
        assert!(err.is_panic());
        assert!(err.to_string().contains("helper exploded"));
        Ok(())
    }

    #[test]
    fn test_helper_threads_use_configured_name() -> Result<()> {
        let names = Arc::new(Mutex::new(Vec::new()));
        let runtime = Builder::new_local().thread_name("digest-worker").try_build()?;

        let recorded = Arc::clone(&names);
        runtime.block_on(async move {
            let handle = spawn_blocking(move || {
                let name = thread::current().name().map(str::to_owned);
                recorded.lock().expect("poisoned").push(name);
            });
            handle.await
        })?;

        assert_eq!(*names.lock().expect("poisoned"), vec![Some("digest-worker".to_owned())]);
        Ok(())
    }
}
