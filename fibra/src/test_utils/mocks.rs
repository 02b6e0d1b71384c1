use crate::future::{Callback, Resolver};
use crate::time;
use std::time::Duration;

/// Callback-style producer completing on the next loop iteration.
pub(crate) fn mock_sum(a: u32, b: u32, done: Resolver<u32>) {
    time::defer(move || {
        done.ok(a + b);
    });
}

/// Callback-style producer whose latency is `delay`.
pub(crate) fn mock_delayed<T: 'static>(delay: Duration, value: T, done: Resolver<T>) {
    time::set_timeout(delay, move || {
        done.ok(value);
    });
}

pub(crate) fn mock_delayed_callback<T: 'static>(delay: Duration, value: T, done: Callback<T>) {
    time::set_timeout(delay, move || {
        done.ok(value);
    });
}
