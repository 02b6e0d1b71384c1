/// A guard that executes a closure when it goes out of scope, whether by a
/// normal return, an early return or a panic unwinding through the scope.
pub(crate) struct ScopeGuard<F: FnOnce()> {
    // Taken out on drop, so the closure runs at most once.
    closure: Option<F>,
}

impl<F: FnOnce()> ScopeGuard<F> {
    pub(crate) fn new(closure: F) -> Self {
        ScopeGuard {
            closure: Some(closure),
        }
    }
}

impl<F: FnOnce()> Drop for ScopeGuard<F> {
    fn drop(&mut self) {
        if let Some(closure) = self.closure.take() {
            closure();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::panic::{AssertUnwindSafe, catch_unwind};

    #[test]
    fn test_guard_runs_on_drop() {
        let ran = Cell::new(false);
        {
            let _guard = ScopeGuard::new(|| ran.set(true));
            assert!(!ran.get());
        }
        assert!(ran.get());
    }

    #[test]
    fn test_guard_runs_on_unwind() {
        let ran = Cell::new(false);
        let res = catch_unwind(AssertUnwindSafe(|| {
            let _guard = ScopeGuard::new(|| ran.set(true));
            panic!("boom");
        }));

        assert!(res.is_err());
        assert!(ran.get());
    }
}
