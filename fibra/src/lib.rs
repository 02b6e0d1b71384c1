//! A single-threaded cooperative task engine.
//!
//! Tasks are plain `async` blocks driven by one event loop. Callback-style
//! operations are bridged into awaitable [`FutureHandle`]s, several of them can
//! be awaited at once through [`parallel`], and every task owns a [`Scope`]
//! of values that its children read through.
//!
//! [`Scope`]: task::Scope

#[doc(inline)]
pub use fibra_macros::main;

#[doc(inline)]
pub use fibra_macros::test;

pub mod adapt;

mod context;

mod error;
pub use error::{Error, Result};

pub mod future;
pub use future::{Callback, FutureHandle, Joined, Resolver, call_async, parallel};

pub mod runtime;
pub use runtime::{block_on, run_task, spawn, stats, task_builder};

pub mod task;
pub use task::{TaskHandle, scope};

pub mod time;
pub use time::sleep;

mod utils;

#[cfg(test)]
mod test_utils;
