//! Bounded worker pool.
//!
//! Every submitted item is handed to the spawner at once and parks on a
//! semaphore until one of `width` permits frees up. Waiters are served in
//! submission order, so the semaphore doubles as the queue.
use std::{panic::AssertUnwindSafe, sync::Arc};

use futures::FutureExt as _;
use tokio::sync::Semaphore;

/// How work futures are executed (Tokio, a test executor, ...).
///
/// Spawned futures run detached; the pool never joins them.
pub trait TaskSpawner: Send + Sync + 'static {
    fn spawn<Fut>(&self, fut: Fut)
    where
        Fut: Future<Output = ()> + Send + 'static;
}

/// Runs submitted work with at most `width` items in progress.
#[derive(Debug)]
pub struct WorkerPool<Sp> {
    permits: Arc<Semaphore>,
    width: usize,
    spawner: Sp,
}

impl<Sp> WorkerPool<Sp>
where
    Sp: TaskSpawner,
{
    pub fn new(width: usize, spawner: Sp) -> Self {
        if width == 0 {
            tracing::warn!("worker pool has no slots; submitted work will never run");
        }
        Self {
            permits: Arc::new(Semaphore::new(width)),
            width,
            spawner,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Items currently holding a slot.
    pub fn running(&self) -> usize {
        self.width - self.permits.available_permits()
    }

    /// Queue `work`; it starts once a slot is free.
    ///
    /// A panic inside `work` is logged and swallowed so it does not take the
    /// slot down with it.
    pub fn submit<Fut>(&self, work: Fut)
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        let permits = self.permits.clone();
        self.spawner.spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            if let Err(panic) = AssertUnwindSafe(work).catch_unwind().await {
                let message = panic_message(panic.as_ref());
                tracing::error!(panic = message, "task panic happened");
            }
        });
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "<non-string panic payload>"
    }
}
