//! Ambient key/value storage attached to every task.
//!
//! A child task reads through to its parent's scope when a key is missing
//! locally, all the way up to the root. Writes always land in the local map, so
//! a branch of the task tree can override a value without its parent or its
//! siblings ever seeing the change.
//!
//! ```no_run
//! # #[fibra::main]
//! # async fn main() {
//! fibra::scope::set("request-id", 42_u64).unwrap();
//!
//! let child = fibra::spawn(async {
//!     *fibra::scope::get::<u64>("request-id").unwrap()
//! });
//!
//! assert_eq!(child.await.unwrap(), 42);
//! # }
//! ```
use crate::context;
use crate::error::{Error, Result};
use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

/// Per-task scope. Values are type-erased and returned as `Rc<V>`.
pub struct Scope {
    values: RefCell<HashMap<String, Rc<dyn Any>>>,

    // Strong on purpose: a child keeps reading its ancestors' values even after
    // the ancestor task completed and its node was dropped.
    parent: Option<Rc<Scope>>,
}

impl Scope {
    pub(crate) fn new_root() -> Rc<Self> {
        Rc::new(Self {
            values: RefCell::new(HashMap::new()),
            parent: None,
        })
    }

    pub(crate) fn new_child(parent: &Rc<Scope>) -> Rc<Self> {
        Rc::new(Self {
            values: RefCell::new(HashMap::new()),
            parent: Some(Rc::clone(parent)),
        })
    }

    /// Looks the key up locally, then in every ancestor up to the root.
    ///
    /// Returns `None` if the key is missing or if the closest value under that
    /// key is not a `V`.
    pub fn get<V: Any>(&self, key: &str) -> Option<Rc<V>> {
        self.lookup(key).and_then(|value| value.downcast::<V>().ok())
    }

    /// Untyped version of [`Scope::get`].
    pub fn lookup(&self, key: &str) -> Option<Rc<dyn Any>> {
        let mut curr = Some(self);

        while let Some(scope) = curr {
            if let Some(value) = scope.values.borrow().get(key) {
                return Some(Rc::clone(value));
            }
            curr = scope.parent.as_deref();
        }

        None
    }

    /// Returns true if the key is visible from this scope.
    pub fn contains(&self, key: &str) -> bool {
        self.lookup(key).is_some()
    }

    /// Returns true if the key is set on this scope itself, ignoring ancestors.
    pub fn contains_local(&self, key: &str) -> bool {
        self.values.borrow().contains_key(key)
    }

    /// Sets the key on this scope only. Returns the previous local value.
    pub fn set<V: Any>(&self, key: impl Into<String>, value: V) -> Option<Rc<dyn Any>> {
        self.set_rc(key, Rc::new(value))
    }

    /// Same as [`Scope::set`] for values that are already shared.
    pub fn set_rc(&self, key: impl Into<String>, value: Rc<dyn Any>) -> Option<Rc<dyn Any>> {
        self.values.borrow_mut().insert(key.into(), value)
    }

    /// Removes the key from this scope only. An ancestor's value under the same
    /// key becomes visible again.
    pub fn remove(&self, key: &str) -> Option<Rc<dyn Any>> {
        self.values.borrow_mut().remove(key)
    }

    /// Number of keys set locally.
    pub fn len_local(&self) -> usize {
        self.values.borrow().len()
    }

    /// Number of scopes between this one and the root.
    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut curr = self.parent.as_deref();
        while let Some(scope) = curr {
            depth += 1;
            curr = scope.parent.as_deref();
        }
        depth
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<String> = self.values.borrow().keys().cloned().collect();
        keys.sort();

        f.debug_struct("Scope")
            .field("keys", &keys)
            .field("depth", &self.depth())
            .finish()
    }
}

/// Reads a key from the scope of the current task. `None` outside a task.
pub fn get<V: Any>(key: &str) -> Option<Rc<V>> {
    context::current_task().and_then(|node| node.scope.get::<V>(key))
}

/// Writes a key on the scope of the current task.
pub fn set<V: Any>(key: impl Into<String>, value: V) -> Result<()> {
    let node = context::current_task().ok_or(Error::NotInTask { op: "scope::set" })?;
    node.scope.set(key, value);
    Ok(())
}

/// Runs `f` against the scope of the current task.
pub fn with<F, R>(f: F) -> Result<R>
where
    F: FnOnce(&Scope) -> R,
{
    let node = context::current_task().ok_or(Error::NotInTask { op: "scope::with" })?;
    Ok(f(&node.scope))
}
