use crate::runtime::Injector;
use crate::task::Id;
use std::sync::Arc;
use std::task::{Wake, Waker};

// Wakers only carry the task id. Waking pushes the id onto the injector of the
// runtime that owns the task, the loop thread then looks the task up and
// decides whether to submit, coalesce or ignore the wake. This keeps wakers
// `Send + Sync` while every task stays on the loop thread.
struct TaskWaker {
    id: Id,
    injector: Arc<Injector>,
}

impl Wake for TaskWaker {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.injector.push_wake(self.id);
    }
}

pub(crate) fn task_waker(id: Id, injector: &Arc<Injector>) -> Waker {
    Waker::from(Arc::new(TaskWaker {
        id,
        injector: Arc::clone(injector),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_wake_from_any_thread_lands_on_injector() {
        let injector = Arc::new(Injector::new(thread::current()));
        let id = Id::next();
        let waker = task_waker(id, &injector);

        let remote = waker.clone();
        thread::spawn(move || remote.wake()).join().unwrap();
        waker.wake_by_ref();

        assert_eq!(injector.pop_wake(), Some(id));
        assert_eq!(injector.pop_wake(), Some(id));
        assert_eq!(injector.pop_wake(), None);
    }
}
