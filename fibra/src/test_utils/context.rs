use crate::runtime::{Builder, Runtime, local};
use anyhow::Result;

pub(crate) fn init_local_runtime(builder: Option<Builder>) -> Result<(Runtime, local::Handle)> {
    let builder = builder.unwrap_or(Builder::new_local());
    let runtime = builder.try_build()?;
    let handle = runtime.expect_local_scheduler();

    Ok((runtime, handle))
}
