// Exports
mod context;
pub(crate) use context::init_local_runtime;

pub(crate) mod mocks;
pub(crate) use mocks::{mock_delayed, mock_delayed_callback, mock_sum};
