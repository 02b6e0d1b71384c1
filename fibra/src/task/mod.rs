//! Tasks: identity, lifecycle, scope and the futures they wait for.

// Public API
mod handle;
pub use self::handle::{TaskHandle, current, try_current};

pub mod id;
pub use self::id::{FutureId, Id, id, try_id};

mod join;
pub use self::join::wait_futures;
pub(crate) use self::join::{JoinRegistry, Pending};

pub mod scope;
pub use self::scope::Scope;

mod state;
pub use self::state::TaskState;
pub(crate) use self::state::{State, TransitionToIdle, TransitionToNotified, TransitionToRunning};

// Re-exports
mod node;
pub(crate) use self::node::TaskNode;

mod waker;
pub(crate) use self::waker::task_waker;
