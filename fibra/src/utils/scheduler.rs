#![allow(unused)]

use crate::runtime::TaskOpts;
use crate::task::{Id, TransitionToNotified};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Method {
    Schedule,
    Wake,
    YieldNow,
    Release,
    Spawn,
    Unhandled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    Schedule {
        id: Id,
        transition: TransitionToNotified,
    },
    Wake {
        id: Id,
        transition: TransitionToNotified,
    },
    YieldNow {
        id: Id,
    },
    Release {
        id: Id,
    },
    Spawn {
        id: Id,
        opts: TaskOpts,
    },
    Unhandled {
        id: Id,
        error: String,
    },
}

/// Records every call made to the scheduler, for tests to assert on.
#[derive(Debug, Clone, Default)]
pub(crate) struct Tracker {
    calls: Rc<RefCell<HashMap<Method, Vec<Call>>>>,
}

impl Tracker {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record(&self, method: Method, call: Call) {
        self.calls.borrow_mut().entry(method).or_default().push(call);
    }

    pub(crate) fn get_calls(&self, method: &Method) -> Vec<Call> {
        self.calls.borrow().get(method).cloned().unwrap_or_default()
    }

    pub(crate) fn num_calls(&self, method: &Method) -> usize {
        self.calls.borrow().get(method).map_or(0, |calls| calls.len())
    }
}
