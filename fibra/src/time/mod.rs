//! Timers and time-based futures driven by the loop.

pub mod sleep;
pub use sleep::{Sleep, sleep};

pub mod timeout;
pub use timeout::{Timeout, timeout};

mod timer;
pub(crate) use timer::TimerHeap;
pub use timer::{TimerId, clear_timeout, defer, set_timeout};

pub mod yield_now;
pub use yield_now::{YieldNow, yield_now};
