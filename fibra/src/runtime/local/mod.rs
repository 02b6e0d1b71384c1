//! Scheduler that runs every task on the thread that owns the runtime.

pub(crate) mod scheduler;
pub(crate) use scheduler::{Handle, Scheduler};

pub(crate) mod worker;
