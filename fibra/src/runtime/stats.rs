use crate::context;
use std::cell::Cell;

/// Point-in-time counters of a runtime. Observability only, nothing in the
/// engine makes decisions based on them.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    /// Tasks started since the runtime was built or last reset.
    pub tasks_total: u64,

    /// Tasks started and not completed yet.
    pub tasks_active: u64,

    /// Futures created since the runtime was built or last reset.
    pub futures_total: u64,

    /// Futures created and not resolved yet.
    pub futures_active: u64,
}

#[derive(Debug, Default)]
pub(crate) struct StatsCell {
    tasks_total: Cell<u64>,
    tasks_active: Cell<u64>,
    futures_total: Cell<u64>,
    futures_active: Cell<u64>,
}

impl StatsCell {
    pub(crate) fn task_started(&self) {
        incr(&self.tasks_total);
        incr(&self.tasks_active);
    }

    pub(crate) fn task_completed(&self) {
        decr(&self.tasks_active);
    }

    pub(crate) fn future_created(&self) {
        incr(&self.futures_total);
        incr(&self.futures_active);
    }

    pub(crate) fn future_settled(&self) {
        decr(&self.futures_active);
    }

    pub(crate) fn snapshot(&self) -> Stats {
        Stats {
            tasks_total: self.tasks_total.get(),
            tasks_active: self.tasks_active.get(),
            futures_total: self.futures_total.get(),
            futures_active: self.futures_active.get(),
        }
    }

    // Active counters describe live objects and survive a reset.
    pub(crate) fn reset(&self) {
        self.tasks_total.set(0);
        self.futures_total.set(0);
    }
}

fn incr(cell: &Cell<u64>) {
    cell.set(cell.get() + 1);
}

fn decr(cell: &Cell<u64>) {
    cell.set(cell.get().saturating_sub(1));
}

/// Returns the counters of the runtime driving the current thread.
///
/// # Panics
///
/// Panics when called outside a runtime.
#[track_caller]
pub fn stats() -> Stats {
    context::with_core(|core| core.stats.snapshot())
}
