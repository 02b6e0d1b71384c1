//! Futures bridging callback-style operations into values a task can await.

mod blocking;
pub use blocking::spawn_blocking;

mod handle;
pub use handle::{FutureHandle, RemoteResolver, Resolver, Wait, call_async};

pub mod parallel;
pub use parallel::{Callback, Join, Joined, Parallel, parallel};
