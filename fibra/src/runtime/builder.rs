use crate::context::{self, Core};
use crate::runtime::{Injector, Runtime, local};
use anyhow::{Result, anyhow};
use std::cell::Cell;
use std::convert::TryFrom;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

/// Fairly arbitrary, copied from tokio `event_interval`.
#[cfg(not(test))]
const EVENT_INTERVAL: u32 = 61;

#[cfg(test)]
const EVENT_INTERVAL: u32 = 8; // make tests tick faster

/// Upper bound on how long an idle loop sleeps before checking again.
const MAX_PARK_DURATION: Duration = Duration::from_millis(100);

#[derive(Clone)]
pub(crate) struct ThreadNameFn(pub(crate) Arc<dyn Fn() -> String + Send + Sync + 'static>);

fn default_thread_name_fn() -> ThreadNameFn {
    let counter = Arc::new(AtomicUsize::new(0));

    ThreadNameFn(Arc::new(move || {
        let id = counter.fetch_add(1, Ordering::Relaxed);
        format!("fibra-blocking-{}", id)
    }))
}

impl fmt::Debug for ThreadNameFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ThreadNameFn").field(&"<function>").finish()
    }
}

/// What happens to the error of a task that failed with nobody to report to:
/// no completion handler of its own, and no parent handler left to forward
/// it to.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnhandledErrorPolicy {
    /// Log the error with `tracing::error!` and drop it.
    #[default]
    Log,

    /// Panic on the loop thread. The panic surfaces out of `block_on`, which
    /// is mostly useful in tests.
    Panic,
}

#[derive(Debug)]
pub struct Builder {
    /// Maximum number of tasks polled in one loop iteration before the loop
    /// goes back to timers, deferred callbacks and remote jobs.
    event_interval: u32,

    /// Policy applied to task errors nobody handles.
    unhandled_error: UnhandledErrorPolicy,

    /// Name fn used for the helper threads of `spawn_blocking`.
    thread_name: ThreadNameFn,

    /// Upper bound on a single park of an idle loop thread.
    max_park_duration: Duration,
}

impl Builder {
    /// Returns a new builder for a runtime driven by the current thread.
    ///
    /// Configuration methods can be chained on the return value.
    pub fn new_local() -> Builder {
        Builder {
            event_interval: EVENT_INTERVAL,
            unhandled_error: UnhandledErrorPolicy::default(),
            thread_name: default_thread_name_fn(),
            max_park_duration: MAX_PARK_DURATION,
        }
    }

    /// Sets the number of tasks polled per loop iteration.
    ///
    /// A smaller value gets timers and remote jobs serviced sooner when many
    /// tasks are ready, a larger one favours the ready tasks. Defaults to 61.
    #[track_caller]
    pub fn event_interval(mut self, val: u32) -> Self {
        assert!(val > 0, "event_interval must be greater than 0");
        self.event_interval = val;
        self
    }

    pub fn unhandled_error(mut self, policy: UnhandledErrorPolicy) -> Self {
        self.unhandled_error = policy;
        self
    }

    /// Sets the name of the helper threads spawned by `spawn_blocking`.
    ///
    /// The default name is "fibra-blocking-{id}", where id is monotonically
    /// increasing.
    pub fn thread_name(mut self, val: impl Into<String>) -> Self {
        let val = val.into();
        self.thread_name = ThreadNameFn(Arc::new(move || val.clone()));
        self
    }

    /// Sets a function used to generate the name of the helper threads spawned
    /// by `spawn_blocking`.
    pub fn thread_name_fn<F>(mut self, f: F) -> Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        self.thread_name = ThreadNameFn(Arc::new(f));
        self
    }

    /// Sets how long an idle loop parks at most before looking for work
    /// again. Wakes from other threads and timer deadlines cut the park short
    /// regardless.
    #[track_caller]
    pub fn max_park_duration(mut self, val: Duration) -> Self {
        assert!(!val.is_zero(), "max_park_duration must be greater than 0");
        self.max_park_duration = val;
        self
    }

    /// Creates the configured `Runtime` and installs it on the current thread.
    ///
    /// Only one runtime may be active per thread at a time.
    #[track_caller]
    pub fn try_build(self) -> Result<Runtime> {
        IS_RUNTIME_ACTIVE.with(|is_active| -> Result<()> {
            if is_active.get() {
                Err(anyhow!(
                    "Cannot create a new Runtime: a runtime is already active on this thread."
                ))
            } else {
                is_active.set(true);
                Ok(())
            }
        })?;

        let cfg = match RuntimeConfig::try_from(self) {
            Ok(cfg) => cfg,
            Err(e) => {
                IS_RUNTIME_ACTIVE.with(|is_active| is_active.set(false));
                return Err(e);
            }
        };

        let injector = Arc::new(Injector::new(thread::current()));
        let core = Rc::new(Core::new(&cfg, Arc::clone(&injector)));
        let scheduler = local::Scheduler::new(&cfg, injector).into_handle();

        context::init_local_context(core, scheduler.clone());

        Ok(Runtime::new(scheduler))
    }
}

// Use a thread_local variable to track if a runtime is already active on this thread.
thread_local! {
    static IS_RUNTIME_ACTIVE: Cell<bool> = const { Cell::new(false) };
}

pub(crate) fn set_runtime_inactive() {
    IS_RUNTIME_ACTIVE.with(|is_active| is_active.set(false));
}

// Export runtime builder as a RuntimeConfig object to be consumed by the
// scheduler and the thread-local core.
#[derive(Debug, Clone)]
pub(crate) struct RuntimeConfig {
    pub(crate) event_interval: u32,
    pub(crate) unhandled_error: UnhandledErrorPolicy,
    pub(crate) thread_name: ThreadNameFn,
    pub(crate) max_park_duration: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            event_interval: EVENT_INTERVAL,
            unhandled_error: UnhandledErrorPolicy::default(),
            thread_name: default_thread_name_fn(),
            max_park_duration: MAX_PARK_DURATION,
        }
    }
}

impl RuntimeConfig {
    fn validate(&self) -> Result<()> {
        if self.event_interval == 0 {
            return Err(anyhow!("event_interval must be greater than 0"));
        }

        if self.max_park_duration.is_zero() {
            return Err(anyhow!("max_park_duration must be greater than 0"));
        }

        Ok(())
    }

    pub(crate) fn next_thread_name(&self) -> String {
        (self.thread_name.0)()
    }
}

impl TryFrom<Builder> for RuntimeConfig {
    type Error = anyhow::Error;

    fn try_from(builder: Builder) -> Result<Self, Self::Error> {
        let cfg = RuntimeConfig {
            event_interval: builder.event_interval,
            unhandled_error: builder.unhandled_error,
            thread_name: builder.thread_name,
            max_park_duration: builder.max_park_duration,
        };

        cfg.validate()?;

        Ok(cfg)
    }
}
