//! Source-facing trait: hand out work in bounded batches.
//!
//! Small surface, strong separation: the poller drives; the source decides
//! what is available.
//!
//! Why:
//! - The poller passes a limit so the source never over-delivers.
//! - `has_more` lets the source ask for an immediate refetch instead of
//!   waiting for the next period; backlog drains at the speed of the pool.
//! - Fetch failures belong to the source. Return an empty batch and retry on
//!   a later call, or log, but do not stall the poller.
use crate::Task;
use tokio_util::sync::CancellationToken;

/// Tasks returned by a single fetch.
#[derive(Debug)]
pub struct Batch<T> {
    pub tasks: Vec<T>,
    /// More work is available right now; fetch again without waiting.
    pub has_more: bool,
}

impl<T> Batch<T> {
    /// Build a batch from tasks and the "more available" flag.
    pub fn new(tasks: Vec<T>, has_more: bool) -> Self {
        Self { tasks, has_more }
    }

    /// Nothing available until the next period.
    pub fn empty() -> Self {
        Self {
            tasks: Vec::new(),
            has_more: false,
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

impl<T> Default for Batch<T> {
    fn default() -> Self {
        Self::empty()
    }
}

mod tmp {
    use super::Batch;
    use crate::Task;

    #[trait_variant::make(TaskSource: Send)]
    pub trait LocalTaskSource {
        type Task: Task;

        /// Fetch at most `limit` tasks.
        #[allow(unused)]
        async fn fetch(
            &mut self,
            token: tokio_util::sync::CancellationToken,
            limit: usize,
        ) -> Batch<Self::Task>;
    }
}

pub use tmp::TaskSource;

impl<F, Fut, T> TaskSource for F
where
    F: FnMut(CancellationToken, usize) -> Fut + Send,
    Fut: Future<Output = Batch<T>> + Send,
    T: Task,
{
    type Task = T;

    fn fetch(
        &mut self,
        token: CancellationToken,
        limit: usize,
    ) -> impl Future<Output = Batch<Self::Task>> + Send {
        self(token, limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_batch_has_no_more() {
        let batch = Batch::<()>::empty();
        assert!(batch.is_empty());
        assert!(!batch.has_more);
        assert_eq!(batch.len(), 0);
    }

    #[test]
    fn batch_keeps_flag() {
        let batch = Batch::new(vec![1, 2, 3], true);
        assert_eq!(batch.len(), 3);
        assert!(batch.has_more);
    }
}
