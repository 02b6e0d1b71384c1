use crate::context;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::fmt;
use std::time::{Duration, Instant};

pub(crate) type Callback = Box<dyn FnOnce()>;

/// Identifies a timer armed with [`set_timeout`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

/// Timers of the runtime, ordered by deadline.
///
/// Cancelling only removes the callback. The heap entry stays behind and is
/// skipped once it reaches the top.
pub(crate) struct TimerHeap {
    deadlines: BinaryHeap<Reverse<(Instant, TimerId)>>,
    callbacks: HashMap<TimerId, Callback>,
    next_id: u64,
}

impl TimerHeap {
    pub(crate) fn new() -> Self {
        Self {
            deadlines: BinaryHeap::new(),
            callbacks: HashMap::new(),
            next_id: 0,
        }
    }

    pub(crate) fn insert(&mut self, deadline: Instant, callback: Callback) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;

        self.deadlines.push(Reverse((deadline, id)));
        self.callbacks.insert(id, callback);
        id
    }

    /// Returns true if the timer was still armed.
    pub(crate) fn cancel(&mut self, id: TimerId) -> bool {
        self.callbacks.remove(&id).is_some()
    }

    pub(crate) fn next_deadline(&mut self) -> Option<Instant> {
        self.prune();
        self.deadlines.peek().map(|Reverse((deadline, _))| *deadline)
    }

    /// Removes every timer whose deadline is at or before `now` and returns
    /// their callbacks in deadline order. Callbacks are run by the caller,
    /// outside of any borrow of the heap.
    pub(crate) fn pop_expired(&mut self, now: Instant) -> Vec<Callback> {
        let mut expired = Vec::new();

        while let Some(Reverse((deadline, id))) = self.deadlines.peek().copied() {
            if deadline > now {
                break;
            }

            self.deadlines.pop();
            if let Some(callback) = self.callbacks.remove(&id) {
                expired.push(callback);
            }
        }

        expired
    }

    pub(crate) fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    fn prune(&mut self) {
        while let Some(Reverse((_, id))) = self.deadlines.peek() {
            if self.callbacks.contains_key(id) {
                break;
            }
            self.deadlines.pop();
        }
    }
}

impl fmt::Debug for TimerHeap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerHeap")
            .field("armed", &self.len())
            .field("next_id", &self.next_id)
            .finish()
    }
}

/// Runs `f` on the loop thread once `delay` elapsed.
///
/// The callback runs outside of any task. The timer keeps the loop alive until
/// it fired or was cleared with [`clear_timeout`].
///
/// # Panics
///
/// Panics when called outside a runtime.
#[track_caller]
pub fn set_timeout<F>(delay: Duration, f: F) -> TimerId
where
    F: FnOnce() + 'static,
{
    let deadline = deadline_after(Instant::now(), delay);
    context::with_core(|core| core.timers.borrow_mut().insert(deadline, Box::new(f)))
}

// Roughly 30 years, same horizon tokio uses for an unreachable deadline.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

// `Duration::MAX` is a common way to say "no deadline", it must not overflow.
fn deadline_after(now: Instant, delay: Duration) -> Instant {
    now.checked_add(delay)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

/// Disarms a timer. Returns false if it already fired, was already cleared,
/// or the runtime is gone.
pub fn clear_timeout(id: TimerId) -> bool {
    context::try_with_core(|core| core.timers.borrow_mut().cancel(id)).unwrap_or(false)
}

/// Runs `f` on the next loop iteration, before timers and ready tasks.
///
/// # Panics
///
/// Panics when called outside a runtime.
#[track_caller]
pub fn defer<F>(f: F)
where
    F: FnOnce() + 'static,
{
    context::with_core(|core| core.defer(Box::new(f)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate as fibra;
    use anyhow::Result;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn noop() -> Callback {
        Box::new(|| {})
    }

    #[test]
    fn test_heap_pops_in_deadline_order() {
        let mut heap = TimerHeap::new();
        let now = Instant::now();
        let order = Rc::new(RefCell::new(Vec::new()));

        for (name, offset) in [("c", 30), ("a", 10), ("b", 20)] {
            let order = Rc::clone(&order);
            heap.insert(
                now + Duration::from_millis(offset),
                Box::new(move || order.borrow_mut().push(name)),
            );
        }

        assert_eq!(heap.next_deadline(), Some(now + Duration::from_millis(10)));
        assert!(heap.pop_expired(now).is_empty());

        for callback in heap.pop_expired(now + Duration::from_millis(20)) {
            callback();
        }
        assert_eq!(*order.borrow(), vec!["a", "b"]);
        assert_eq!(heap.len(), 1);
    }

    #[test]
    fn test_cancelled_timer_never_fires() {
        let mut heap = TimerHeap::new();
        let now = Instant::now();

        let first = heap.insert(now, noop());
        let second = heap.insert(now + Duration::from_millis(5), noop());

        assert!(heap.cancel(first));
        assert!(!heap.cancel(first));
        assert_eq!(heap.next_deadline(), Some(now + Duration::from_millis(5)));

        assert!(heap.cancel(second));
        assert!(heap.is_empty());
        assert_eq!(heap.next_deadline(), None);
        assert!(heap.pop_expired(now + Duration::from_secs(1)).is_empty());
    }

    #[fibra::test]
    async fn test_defer_runs_before_timers() -> Result<()> {
        let order = Rc::new(RefCell::new(Vec::new()));

        let (a, b, c) = (Rc::clone(&order), Rc::clone(&order), Rc::clone(&order));
        set_timeout(Duration::ZERO, move || a.borrow_mut().push("timer"));
        defer(move || b.borrow_mut().push("deferred"));
        let cleared = set_timeout(Duration::ZERO, move || c.borrow_mut().push("cleared"));
        assert!(clear_timeout(cleared));

        fibra::sleep(Duration::from_millis(5)).await?;
        assert_eq!(*order.borrow(), vec!["deferred", "timer"]);
        Ok(())
    }

    #[test]
    fn test_deadline_saturates_on_overflow() {
        let now = Instant::now();
        assert_eq!(deadline_after(now, Duration::from_millis(5)), now + Duration::from_millis(5));
        assert_eq!(deadline_after(now, Duration::MAX), now + FAR_FUTURE);
    }

    #[fibra::test]
    async fn test_unbounded_timer_can_be_cleared() -> Result<()> {
        let id = set_timeout(Duration::MAX, || panic!("never fires"));
        assert!(clear_timeout(id));
        Ok(())
    }

    #[test]
    fn test_clear_timeout_outside_runtime() {
        assert!(!clear_timeout(TimerId(0)));
    }
}
