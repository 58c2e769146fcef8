//! Tokio-based task spawner.
//!
//! Why: isolate runtime concerns. The pool only needs "run this detached";
//! which runtime does it is the caller's choice.
use crate::pool::TaskSpawner;

/// Spawn work onto the Tokio runtime.
///
/// Uses the captured handle if one was given, otherwise the runtime the
/// caller is running on.
#[derive(Debug, Clone, Default)]
pub struct TokioSpawner {
    handle: Option<tokio::runtime::Handle>,
}

impl TokioSpawner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn onto a specific runtime, e.g. when the poller is driven from a
    /// thread that has no runtime context.
    pub fn with_handle(handle: tokio::runtime::Handle) -> Self {
        Self {
            handle: Some(handle),
        }
    }
}

impl TaskSpawner for TokioSpawner {
    fn spawn<Fut>(&self, fut: Fut)
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        // Dropping the JoinHandle detaches the task.
        match &self.handle {
            Some(handle) => drop(handle.spawn(fut)),
            None => drop(tokio::spawn(fut)),
        }
    }
}
