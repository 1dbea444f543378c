use std::future::Future;

use futures::future::{BoxFuture, FutureExt};
use tokio::runtime::Handle;

use lf_error::*;

/// The pool of tasks on which a graph runs block computations.
#[derive(Clone)]
pub struct Executor {
    handle: Handle,
}

impl Executor {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// An `Executor` backed by the current tokio runtime.
    pub fn current() -> LFResult<Self> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|cause| bad_request!("no async runtime is running: {cause}"))
    }

    /// Run `task` concurrently, independent of whether the caller polls the result.
    pub fn spawn<F>(&self, task: F) -> BoxFuture<'static, LFResult<F::Output>>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.handle
            .spawn(task)
            .map(|result| result.map_err(|cause| internal!("task failed: {cause}")))
            .boxed()
    }
}
