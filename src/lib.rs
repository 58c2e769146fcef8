//! Adaptive task poller.
//!
//! Fetch work in batches, run it with bounded concurrency, and poll again
//! right away while the source keeps reporting more.
pub use nagare_core::{
    Batch, CancellationToken, ConfigError, Poller, PollerBuilder, PollerConfig, Resolved, Task,
    TaskSource, TaskSpawner, TickStream, Ticker, Trigger, WorkerPool,
};
pub use nagare_core::{config, ledger, poller, pool, source, trigger, utils};

#[cfg(feature = "rt-tokio")]
pub use nagare_core::TokioSpawner;
