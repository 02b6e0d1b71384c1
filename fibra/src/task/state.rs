use std::cell::Cell;

/// Lifecycle of a task as observed from the outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    /// The task was handed to the scheduler but never polled.
    Created,

    /// The task body is being polled right now.
    Running,

    /// The task is waiting on a future, a `parallel` join, a sleep or its
    /// pending futures.
    Suspended,

    /// Body finished and all pending futures drained. Terminal.
    Completed,
}

/// Task state plus the `notified` bit. Only ever touched from the loop thread.
///
/// The `notified` bit means the task is sitting in the ready queue, or must be
/// put back into it as soon as the current poll returns. It is what lets us
/// tolerate wakes that race with suspension: a wake is never an error, it is
/// either submitted, coalesced or ignored.
#[derive(Debug)]
pub(crate) struct State {
    lifecycle: Cell<TaskState>,
    notified: Cell<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TransitionToNotified {
    /// Caller must push the task onto the ready queue.
    Submit,

    /// Task is running or already queued, the wake folds into that.
    Coalesced,

    /// Task already completed.
    Ignored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TransitionToRunning {
    Success,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TransitionToIdle {
    Ok,

    /// Task was woken while it was running and must be re-queued.
    OkNotified,
}

impl State {
    pub(crate) fn new() -> Self {
        Self {
            lifecycle: Cell::new(TaskState::Created),
            notified: Cell::new(false),
        }
    }

    pub(crate) fn load(&self) -> TaskState {
        self.lifecycle.get()
    }

    pub(crate) fn is_complete(&self) -> bool {
        self.lifecycle.get() == TaskState::Completed
    }

    pub(crate) fn transition_to_notified(&self) -> TransitionToNotified {
        match self.lifecycle.get() {
            TaskState::Completed => TransitionToNotified::Ignored,
            TaskState::Running => {
                self.notified.set(true);
                TransitionToNotified::Coalesced
            }
            TaskState::Created | TaskState::Suspended => match self.notified.replace(true) {
                true => TransitionToNotified::Coalesced,
                false => TransitionToNotified::Submit,
            },
        }
    }

    pub(crate) fn transition_to_running(&self) -> TransitionToRunning {
        match self.lifecycle.get() {
            TaskState::Running | TaskState::Completed => TransitionToRunning::Failed,
            TaskState::Created | TaskState::Suspended => {
                self.notified.set(false);
                self.lifecycle.set(TaskState::Running);
                TransitionToRunning::Success
            }
        }
    }

    pub(crate) fn transition_to_idle(&self) -> TransitionToIdle {
        debug_assert_eq!(self.lifecycle.get(), TaskState::Running);
        self.lifecycle.set(TaskState::Suspended);

        match self.notified.get() {
            true => TransitionToIdle::OkNotified,
            false => TransitionToIdle::Ok,
        }
    }

    pub(crate) fn transition_to_complete(&self) {
        self.notified.set(false);
        self.lifecycle.set(TaskState::Completed);
    }
}
