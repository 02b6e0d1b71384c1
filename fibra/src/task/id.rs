use crate::context;
use std::fmt;
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};

/// An opaque ID that uniquely identifies a task within the process.
///
/// Ids are handed out in creation order and are never re-used, so a larger id
/// always belongs to a task created later.
///
/// The id of the running task can be obtained from inside the task via
/// [`task::id()`](crate::task::id()) and [`task::try_id()`](crate::task::try_id()),
/// or from outside through [`TaskHandle::id()`](crate::task::TaskHandle::id()).
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub struct Id(pub(crate) NonZeroU64);

/// Returns the [`Id`] of the currently running task.
///
/// # Panics
///
/// This function panics if called from outside a task. For a version of this
/// function that doesn't panic, see [`task::try_id()`](crate::task::try_id()).
#[track_caller]
pub fn id() -> Id {
    try_id().expect("Can't get a task id when not inside a task")
}

/// Returns the [`Id`] of the currently running task, or `None` if called outside
/// of a task.
pub fn try_id() -> Option<Id> {
    context::current_task().map(|node| node.id)
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl Id {
    pub(crate) fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);

        let id = COUNTER.fetch_add(1, Ordering::Relaxed);

        // Even at a billion tasks per second it would take centuries to wrap.
        let Some(id) = NonZeroU64::new(id) else {
            Self::exhausted();
        };

        Self(id)
    }

    #[cold]
    fn exhausted() -> ! {
        panic!("failed to generate unique task ID: bitspace exhausted")
    }

    pub fn as_u64(&self) -> u64 {
        self.0.get()
    }
}

/// An opaque ID that uniquely identifies a [`FutureHandle`] within the process.
///
/// [`FutureHandle`]: crate::FutureHandle
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub struct FutureId(NonZeroU64);

impl FutureId {
    pub(crate) fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);

        let id = COUNTER.fetch_add(1, Ordering::Relaxed);
        let Some(id) = NonZeroU64::new(id) else {
            Self::exhausted();
        };

        Self(id)
    }

    #[cold]
    fn exhausted() -> ! {
        panic!("failed to generate unique future ID: bitspace exhausted")
    }

    pub fn as_u64(&self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for FutureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_new_task_id_unique_and_increasing() {
        let n = 13;
        let ids: Vec<Id> = (0..n).map(|_| Id::next()).collect();

        assert_eq!(ids.iter().collect::<HashSet<_>>().len(), n);
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_try_id_outside_task_is_none() {
        assert!(try_id().is_none());
    }

    #[test]
    fn test_future_ids_are_increasing() {
        let a = FutureId::next();
        let b = FutureId::next();
        assert!(a < b);
        assert_ne!(a.as_u64(), b.as_u64());
    }
}
