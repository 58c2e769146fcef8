//! Coordination core of an adaptive task poller.
//!
//! Why: keep bulk background work predictable without a queue of our own.
//! - The source says what is available and whether more is waiting.
//! - The poller enforces pacing (period, threshold) and bounds (capacity,
//!   concurrency). It counts tasks; it never judges them.
//! - Tasks own their outcome. Failures, retries and persistence stay behind
//!   the task and source boundaries.
pub mod config;
pub mod ledger;
pub mod poller;
pub mod pool;
pub mod source;
pub mod trigger;
pub mod utils;

#[cfg(feature = "rt-tokio")]
mod tokio_spawner;
#[cfg(feature = "rt-tokio")]
pub use tokio_spawner::TokioSpawner;

pub use config::{ConfigError, PollerConfig, Resolved};
pub use poller::{Poller, PollerBuilder};
pub use pool::{TaskSpawner, WorkerPool};
pub use source::{Batch, TaskSource};
pub use tokio_util::sync::CancellationToken;
pub use trigger::Trigger;
pub use utils::{TickStream, Ticker};

mod tmp {
    /// Unit of work handed out by a [`TaskSource`](crate::TaskSource).
    ///
    /// The token is cancelled when the poller stops, so long-running tasks
    /// can wind down. Whatever the task does with it, the poller only learns
    /// that it finished.
    #[trait_variant::make(Task: Send)]
    pub trait LocalTask: 'static {
        #[allow(unused)]
        async fn run(self, token: tokio_util::sync::CancellationToken);
    }
}

pub use tmp::Task;

impl<F, Fut> Task for F
where
    F: FnOnce(CancellationToken) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    fn run(self, token: CancellationToken) -> impl Future<Output = ()> + Send {
        self(token)
    }
}
