//! Fan-out and join of callback-style operations.
//!
//! ```no_run
//! use fibra::{Joined, parallel};
//! use std::time::Duration;
//!
//! fn lookup(name: &'static str, done: fibra::Callback<u32>) {
//!     fibra::time::set_timeout(Duration::from_millis(10), move || {
//!         done.ok(name.len() as u32);
//!     });
//! }
//!
//! # #[fibra::main]
//! # async fn main() -> fibra::Result<()> {
//! let joined = parallel(|mk| {
//!     lookup("foo", mk.keyed("foo")?);
//!     lookup("quux", mk.keyed("quux")?);
//!     Ok(())
//! })
//! .await?;
//!
//! let Joined::Keyed(lens) = joined else { unreachable!() };
//! assert_eq!(lens["quux"], 4);
//! # Ok(())
//! # }
//! ```
use crate::error::{Error, Result};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};
use tracing::debug;

/// Outcome of a successful [`parallel`] join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Joined<T> {
    /// No callback was created, or none of them reported a value.
    Empty,

    /// Values of positional callbacks, in the order the callbacks were
    /// created. Callbacks that reported no value are skipped.
    Positional(Vec<T>),

    /// Values of keyed callbacks. Callbacks that reported no value are
    /// missing from the map.
    Keyed(HashMap<String, T>),
}

impl<T> Joined<T> {
    pub fn is_empty(&self) -> bool {
        match self {
            Joined::Empty => true,
            Joined::Positional(values) => values.is_empty(),
            Joined::Keyed(values) => values.is_empty(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Joined::Empty => 0,
            Joined::Positional(values) => values.len(),
            Joined::Keyed(values) => values.len(),
        }
    }

    /// Positional values. `Empty` gives an empty vector, `Keyed` gives `None`.
    pub fn into_vec(self) -> Option<Vec<T>> {
        match self {
            Joined::Empty => Some(Vec::new()),
            Joined::Positional(values) => Some(values),
            Joined::Keyed(_) => None,
        }
    }

    /// Keyed values. `Empty` gives an empty map, `Positional` gives `None`.
    pub fn into_map(self) -> Option<HashMap<String, T>> {
        match self {
            Joined::Empty => Some(HashMap::new()),
            Joined::Positional(_) => None,
            Joined::Keyed(values) => Some(values),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Positional,
    Keyed,
}

enum Slot {
    Index(usize),
    Key(String),
}

impl fmt::Debug for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Slot::Index(i) => write!(f, "#{i}"),
            Slot::Key(key) => write!(f, "{key:?}"),
        }
    }
}

// Accumulator and bookkeeping shared by the join and its callbacks.
struct JoinState<T> {
    mode: Cell<Option<Mode>>,

    outstanding: Cell<usize>,

    // Set once the body returned. Callbacks firing synchronously inside the
    // body cannot finish the join early.
    sealed: Cell<bool>,

    done: Cell<bool>,

    positional: RefCell<Vec<Option<T>>>,

    keyed: RefCell<HashMap<String, T>>,

    failure: RefCell<Option<Error>>,

    waker: RefCell<Option<Waker>>,
}

impl<T> JoinState<T> {
    fn new() -> Self {
        Self {
            mode: Cell::new(None),
            outstanding: Cell::new(0),
            sealed: Cell::new(false),
            done: Cell::new(false),
            positional: RefCell::new(Vec::new()),
            keyed: RefCell::new(HashMap::new()),
            failure: RefCell::new(None),
            waker: RefCell::new(None),
        }
    }

    fn fix_mode(&self, mode: Mode) -> Result<()> {
        match self.mode.get() {
            Some(fixed) if fixed != mode => {
                self.fail(Error::ModeMismatch);
                Err(Error::ModeMismatch)
            }
            _ => {
                self.mode.set(Some(mode));
                Ok(())
            }
        }
    }

    // First error wins. Outstanding callbacks become no-ops.
    fn fail(&self, err: Error) {
        if self.done.get() {
            debug!(error = %err, "parallel join already finished, dropping error");
            return;
        }

        self.failure.borrow_mut().replace(err);
        self.outstanding.set(0);
        self.finish();
    }

    fn complete(&self, slot: Slot, outcome: Result<Option<T>>) {
        if self.done.get() {
            debug!(?slot, "parallel join already finished, ignoring callback");
            return;
        }

        let value = match outcome {
            Ok(value) => value,
            Err(err) => return self.fail(err),
        };

        if let Some(value) = value {
            match slot {
                Slot::Index(i) => self.positional.borrow_mut()[i] = Some(value),
                Slot::Key(key) => {
                    self.keyed.borrow_mut().insert(key, value);
                }
            }
        }

        self.outstanding.set(self.outstanding.get().saturating_sub(1));
        self.try_finish();
    }

    fn seal(&self) {
        self.sealed.set(true);
        self.try_finish();
    }

    fn try_finish(&self) {
        if self.sealed.get() && self.outstanding.get() == 0 && !self.done.get() {
            self.finish();
        }
    }

    fn finish(&self) {
        self.done.set(true);
        if let Some(waker) = self.waker.borrow_mut().take() {
            waker.wake();
        }
    }

    fn take_result(&self) -> Result<Joined<T>> {
        if let Some(err) = self.failure.borrow_mut().take() {
            return Err(err);
        }

        let joined = match self.mode.get() {
            None => Joined::Empty,
            Some(Mode::Positional) => {
                let values: Vec<T> = self.positional.take().into_iter().flatten().collect();
                match values.is_empty() {
                    true => Joined::Empty,
                    false => Joined::Positional(values),
                }
            }
            Some(Mode::Keyed) => {
                let values = self.keyed.take();
                match values.is_empty() {
                    true => Joined::Empty,
                    false => Joined::Keyed(values),
                }
            }
        };

        Ok(joined)
    }
}

/// Callback factory handed to the body of [`parallel`].
pub struct Join<T> {
    state: Rc<JoinState<T>>,
}

impl<T> Join<T> {
    /// Creates a positional callback. Its value lands at the position of this
    /// call among the other `callback` calls.
    ///
    /// Fails with [`Error::ModeMismatch`] if a keyed callback was created
    /// before, which also fails the whole join.
    pub fn callback(&self) -> Result<Callback<T>> {
        self.state.fix_mode(Mode::Positional)?;

        let index = {
            let mut positional = self.state.positional.borrow_mut();
            positional.push(None);
            positional.len() - 1
        };

        Ok(self.new_callback(Slot::Index(index)))
    }

    /// Creates a callback whose value is stored under `key`.
    ///
    /// Fails with [`Error::ModeMismatch`] if a positional callback was created
    /// before, which also fails the whole join.
    pub fn keyed(&self, key: impl Into<String>) -> Result<Callback<T>> {
        self.state.fix_mode(Mode::Keyed)?;
        Ok(self.new_callback(Slot::Key(key.into())))
    }

    fn new_callback(&self, slot: Slot) -> Callback<T> {
        self.state.outstanding.set(self.state.outstanding.get() + 1);
        Callback {
            state: Some(Rc::clone(&self.state)),
            slot: Some(slot),
        }
    }
}

impl<T> fmt::Debug for Join<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Join")
            .field("mode", &self.state.mode.get())
            .field("outstanding", &self.state.outstanding.get())
            .finish()
    }
}

/// One-shot completion of a [`parallel`] join.
///
/// Dropping a callback without calling it counts as reporting no value.
pub struct Callback<T> {
    state: Option<Rc<JoinState<T>>>,
    slot: Option<Slot>,
}

impl<T> Callback<T> {
    pub fn resolve<E>(self, res: std::result::Result<Option<T>, E>) -> bool
    where
        E: Into<anyhow::Error>,
    {
        self.fire(res.map_err(|err| Error::from_producer(err.into())))
    }

    pub fn ok(self, value: T) -> bool {
        self.fire(Ok(Some(value)))
    }

    /// Reports completion without a value.
    pub fn none(self) -> bool {
        self.fire(Ok(None))
    }

    pub fn err<E>(self, err: E) -> bool
    where
        E: Into<anyhow::Error>,
    {
        self.fire(Err(Error::from_producer(err.into())))
    }

    /// Returns false if the join already finished, in which case the outcome
    /// is dropped.
    fn fire(mut self, outcome: Result<Option<T>>) -> bool {
        match (self.state.take(), self.slot.take()) {
            (Some(state), Some(slot)) => {
                let accepted = !state.done.get();
                state.complete(slot, outcome);
                accepted
            }
            _ => false,
        }
    }
}

impl<T> Drop for Callback<T> {
    fn drop(&mut self) {
        if let (Some(state), Some(slot)) = (self.state.take(), self.slot.take()) {
            debug!(?slot, "parallel callback dropped without being called");
            state.complete(slot, Ok(None));
        }
    }
}

impl<T> fmt::Debug for Callback<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callback").field("slot", &self.slot).finish()
    }
}

/// Future returned by [`parallel`].
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct Parallel<T> {
    state: Rc<JoinState<T>>,
}

impl<T> Future for Parallel<T> {
    type Output = Result<Joined<T>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.state.done.get() {
            return Poll::Ready(self.state.take_result());
        }

        self.state.waker.borrow_mut().replace(cx.waker().clone());
        Poll::Pending
    }
}

impl<T> fmt::Debug for Parallel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Parallel")
            .field("done", &self.state.done.get())
            .field("outstanding", &self.state.outstanding.get())
            .finish()
    }
}

/// Runs `body` right away and waits until every callback it created fired.
///
/// The first callback created fixes the mode for the whole join: positional
/// through [`Join::callback`] or keyed through [`Join::keyed`]. The first error,
/// from a callback or returned by the body, fails the join immediately even if
/// other callbacks are still outstanding.
pub fn parallel<T, F>(body: F) -> Parallel<T>
where
    F: FnOnce(&Join<T>) -> Result<()>,
{
    let state = Rc::new(JoinState::new());
    let join = Join {
        state: Rc::clone(&state),
    };

    match body(&join) {
        Ok(()) => state.seal(),
        Err(err) => state.fail(err),
    }

    Parallel { state }
}
