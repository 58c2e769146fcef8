//! Outstanding-task accounting.
//!
//! The count is owned by a single sequential actor (the dispatch cycle, then
//! the shutdown wait). Running tasks never touch it; they only push a unit
//! signal through a bounded channel when they finish, and the actor turns
//! signals back into decrements while it waits.
use futures::{FutureExt as _, StreamExt as _, channel::mpsc};
use tokio_util::sync::CancellationToken;

/// Count of fetched-but-unfinished tasks plus the completion channel.
#[derive(Debug)]
pub struct Ledger {
    outstanding: usize,
    capacity: usize,
    sender: mpsc::Sender<()>,
    receiver: mpsc::Receiver<()>,
}

impl Ledger {
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity);
        Self {
            outstanding: 0,
            capacity,
            sender,
            receiver,
        }
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Free slots, i.e. the fetch limit.
    pub fn available(&self) -> usize {
        self.capacity.saturating_sub(self.outstanding)
    }

    /// Count one more task in flight. The returned handle signals completion
    /// when dropped.
    pub fn track(&mut self) -> Completion {
        debug_assert!(self.outstanding < self.capacity, "ledger over capacity");
        self.outstanding += 1;
        Completion {
            sender: self.sender.clone(),
        }
    }

    /// Wait until `outstanding` drops below `threshold`.
    ///
    /// Consumes `outstanding - (threshold - 1)` signals, clamped to
    /// `[0, outstanding]`. Returns `false` if `token` fires first.
    pub async fn wait_below(&mut self, token: &CancellationToken, threshold: usize) -> bool {
        let needed = (self.outstanding + 1).saturating_sub(threshold);
        self.wait_n(token, needed).await
    }

    /// Wait until every tracked task has finished.
    pub async fn drain(&mut self, token: &CancellationToken) -> bool {
        let needed = self.outstanding;
        self.wait_n(token, needed).await
    }

    /// Consume up to `n` completion signals (never more than `outstanding`).
    ///
    /// On cancellation the signals consumed so far stay accounted for and the
    /// rest remain buffered for a later wait.
    pub async fn wait_n(&mut self, token: &CancellationToken, n: usize) -> bool {
        let n = n.min(self.outstanding);
        let cancelled = token.cancelled().fuse();
        futures::pin_mut!(cancelled);
        for _ in 0..n {
            futures::select_biased! {
                _ = cancelled => return false,
                signal = self.receiver.next() => match signal {
                    Some(()) => self.outstanding -= 1,
                    // The ledger keeps a sender alive, so the channel cannot close.
                    None => return false,
                },
            }
        }
        true
    }
}

/// Completion handle for one tracked task.
///
/// Signals on drop, so a task that panics or is dropped by its executor is
/// still counted as finished.
#[derive(Debug)]
#[must_use = "dropping a completion marks the task as finished"]
pub struct Completion {
    sender: mpsc::Sender<()>,
}

impl Drop for Completion {
    fn drop(&mut self) {
        if let Err(error) = self.sender.try_send(()) {
            if error.is_disconnected() {
                // Poller is gone; nobody is counting anymore.
                return;
            }
            tracing::error!(error = %error, "Failed to signal task completion");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn wait_n_consumes_signals() {
        let mut ledger = Ledger::new(3);
        let a = ledger.track();
        let b = ledger.track();
        let _c = ledger.track();
        assert_eq!(ledger.outstanding(), 3);
        assert_eq!(ledger.available(), 0);

        drop(a);
        drop(b);
        let token = CancellationToken::new();
        assert!(ledger.wait_n(&token, 2).await);
        assert_eq!(ledger.outstanding(), 1);
        assert_eq!(ledger.available(), 2);
    }

    #[tokio::test]
    async fn wait_n_is_clamped_to_outstanding() {
        let mut ledger = Ledger::new(4);
        drop(ledger.track());
        let token = CancellationToken::new();
        assert!(ledger.wait_n(&token, 10).await);
        assert_eq!(ledger.outstanding(), 0);
    }

    #[tokio::test]
    async fn wait_below_leaves_threshold_minus_one() {
        let mut ledger = Ledger::new(2);
        let a = ledger.track();
        let _b = ledger.track();
        drop(a);
        let token = CancellationToken::new();
        assert!(ledger.wait_below(&token, 2).await);
        assert_eq!(ledger.outstanding(), 1);

        // Already below threshold: nothing to wait for.
        assert!(ledger.wait_below(&token, 2).await);
        assert_eq!(ledger.outstanding(), 1);
    }

    #[tokio::test]
    async fn wait_below_zero_threshold_drains() {
        let mut ledger = Ledger::new(2);
        drop(ledger.track());
        drop(ledger.track());
        let token = CancellationToken::new();
        assert!(ledger.wait_below(&token, 0).await);
        assert_eq!(ledger.outstanding(), 0);
    }

    #[tokio::test]
    async fn cancelled_wait_keeps_accounting() {
        let mut ledger = Ledger::new(3);
        let a = ledger.track();
        let b = ledger.track();
        let c = ledger.track();
        drop(a);

        let token = CancellationToken::new();
        let waiter = async {
            let done = ledger.wait_n(&token, 3).await;
            (done, ledger.outstanding())
        };
        let canceller = async {
            tokio::task::yield_now().await;
            token.cancel();
        };
        let ((done, outstanding), ()) = futures::join!(waiter, canceller);
        assert!(!done);
        assert_eq!(outstanding, 2);

        drop(b);
        drop(c);
        let token = CancellationToken::new();
        assert!(ledger.drain(&token).await);
        assert_eq!(ledger.outstanding(), 0);
    }

    #[tokio::test]
    async fn cancelled_token_with_nothing_to_wait_succeeds() {
        let mut ledger = Ledger::new(1);
        let token = CancellationToken::new();
        token.cancel();
        assert!(ledger.drain(&token).await);
    }

    #[tokio::test]
    async fn signals_buffer_until_consumed() {
        let mut ledger = Ledger::new(4);
        let completions: Vec<_> = (0..4).map(|_| ledger.track()).collect();
        drop(completions);
        let token = CancellationToken::new();
        token.cancel();
        // Cancellation wins over ready signals.
        assert!(!ledger.drain(&token).await);
        assert_eq!(ledger.outstanding(), 4);

        let token = CancellationToken::new();
        assert!(ledger.drain(&token).await);
        assert_eq!(ledger.outstanding(), 0);
    }
}
