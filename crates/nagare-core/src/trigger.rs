//! Periodic trigger: run a callback on every tick, one invocation at a time.
//!
//! Each invocation is awaited before the next tick is read. Stopping waits
//! for the invocation in progress.
use std::sync::{Mutex, PoisonError};

use futures::{FutureExt as _, StreamExt as _};
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};

use crate::utils::TickStream;

/// Drives a callback from a tick stream until stopped.
///
/// Single use: once started and stopped (or stopped before it ever ran) it
/// stays stopped.
#[derive(Debug)]
pub struct Trigger<Tick> {
    tick: Mutex<Option<Tick>>,
    stop: CancellationToken,
    done: CancellationToken,
}

impl<Tick> Trigger<Tick>
where
    Tick: TickStream,
{
    pub fn new(tick: Tick) -> Self {
        Self {
            tick: Mutex::new(Some(tick)),
            stop: CancellationToken::new(),
            done: CancellationToken::new(),
        }
    }

    /// Run `callback` on every tick until [`stop`](Self::stop) is called,
    /// `token` is cancelled, or the tick stream ends.
    ///
    /// Each invocation receives a token that is cancelled when the trigger is
    /// told to stop. The next tick is not awaited until the invocation
    /// returns.
    pub async fn run<F, Fut>(&self, token: CancellationToken, mut callback: F)
    where
        F: FnMut(CancellationToken) -> Fut,
        Fut: Future<Output = ()>,
    {
        let Some(tick) = self.take_tick() else {
            tracing::warn!("trigger was already started or stopped");
            return;
        };
        // Also fires if this future is dropped mid-run, so stop() never hangs.
        let _finish = Finish {
            stop: &self.stop,
            done: &self.done,
        };
        tracing::debug!("trigger started");

        let scope = self.stop.clone();
        let link = async {
            token.cancelled().await;
            scope.cancel();
            std::future::pending::<()>().await
        };
        let body = async {
            let tick = tick.fuse();
            let stopped = scope.cancelled().fuse();
            futures::pin_mut!(tick, stopped);
            loop {
                futures::select_biased! {
                    _ = stopped => break,
                    tick_val = tick.next() => {
                        // Tick stream ended; nothing will wake us again.
                        if tick_val.is_none() { break; }
                    },
                }
                callback(scope.clone()).await;
            }
        };
        futures::pin_mut!(link, body);
        // `link` never resolves, so this waits for `body`.
        futures::future::select(body, link).await;
    }

    /// Ask the trigger to stop and wait for the invocation in progress.
    ///
    /// Returns `false` if `token` fired before the trigger finished.
    pub async fn stop(&self, token: &CancellationToken) -> bool {
        self.stop.cancel();
        if self.take_tick().is_some() {
            // Never started: nothing to wait for.
            self.done.cancel();
        }
        let done = self.done.cancelled().fuse();
        let cancelled = token.cancelled().fuse();
        futures::pin_mut!(done, cancelled);
        futures::select_biased! {
            _ = done => true,
            _ = cancelled => false,
        }
    }

    /// Resolves once the trigger has finished for good.
    pub fn done(&self) -> WaitForCancellationFutureOwned {
        self.done.clone().cancelled_owned()
    }

    pub fn is_done(&self) -> bool {
        self.done.is_cancelled()
    }

    fn take_tick(&self) -> Option<Tick> {
        self.tick
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

/// Marks a running trigger finished when dropped.
struct Finish<'a> {
    stop: &'a CancellationToken,
    done: &'a CancellationToken,
}

impl Drop for Finish<'_> {
    fn drop(&mut self) {
        self.stop.cancel();
        self.done.cancel();
        tracing::debug!("trigger finished");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use futures::channel::mpsc;

    use super::*;

    fn manual_ticks() -> (mpsc::UnboundedSender<()>, Trigger<mpsc::UnboundedReceiver<()>>) {
        let (sender, receiver) = mpsc::unbounded();
        (sender, Trigger::new(receiver))
    }

    #[tokio::test(start_paused = true)]
    async fn invocations_never_overlap() {
        let (ticks, trigger) = manual_ticks();
        let trigger = Arc::new(trigger);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            ticks.unbounded_send(()).unwrap();
        }

        let handle = tokio::spawn({
            let trigger = trigger.clone();
            let active = active.clone();
            let peak = peak.clone();
            let calls = calls.clone();
            async move {
                trigger
                    .run(CancellationToken::new(), move |_| {
                        let active = active.clone();
                        let peak = peak.clone();
                        let calls = calls.clone();
                        async move {
                            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                            peak.fetch_max(now, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_secs(1)).await;
                            active.fetch_sub(1, Ordering::SeqCst);
                            calls.fetch_add(1, Ordering::SeqCst);
                        }
                    })
                    .await
            }
        });

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(peak.load(Ordering::SeqCst), 1);

        assert!(trigger.stop(&CancellationToken::new()).await);
        assert!(trigger.is_done());
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn stop_waits_for_invocation_in_progress() {
        let (ticks, trigger) = manual_ticks();
        let trigger = Arc::new(trigger);
        let finished = Arc::new(AtomicUsize::new(0));
        ticks.unbounded_send(()).unwrap();

        tokio::spawn({
            let trigger = trigger.clone();
            let finished = finished.clone();
            async move {
                trigger
                    .run(CancellationToken::new(), move |token| {
                        let finished = finished.clone();
                        async move {
                            token.cancelled().await;
                            tokio::time::sleep(Duration::from_secs(2)).await;
                            finished.fetch_add(1, Ordering::SeqCst);
                        }
                    })
                    .await
            }
        });

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(trigger.stop(&CancellationToken::new()).await);
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_stop_returns_early() {
        let (ticks, trigger) = manual_ticks();
        let trigger = Arc::new(trigger);
        ticks.unbounded_send(()).unwrap();

        tokio::spawn({
            let trigger = trigger.clone();
            async move {
                trigger
                    .run(CancellationToken::new(), |_| {
                        tokio::time::sleep(Duration::from_secs(60))
                    })
                    .await
            }
        });

        tokio::time::sleep(Duration::from_secs(1)).await;
        let token = CancellationToken::new();
        token.cancel();
        assert!(!trigger.stop(&token).await);
        assert!(!trigger.is_done());

        trigger.done().await;
        assert!(trigger.is_done());
    }

    #[tokio::test]
    async fn stop_before_start_is_terminal() {
        let (ticks, trigger) = manual_ticks();
        ticks.unbounded_send(()).unwrap();
        assert!(trigger.stop(&CancellationToken::new()).await);
        assert!(trigger.is_done());

        let calls = AtomicUsize::new(0);
        trigger
            .run(CancellationToken::new(), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async {}
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn start_token_stops_the_trigger() {
        let (ticks, trigger) = manual_ticks();
        let token = CancellationToken::new();
        ticks.unbounded_send(()).unwrap();

        let seen = Mutex::new(None);
        trigger
            .run(token.clone(), |scope| {
                let token = token.clone();
                *seen.lock().unwrap() = Some(scope.clone());
                async move {
                    token.cancel();
                    scope.cancelled().await;
                }
            })
            .await;

        assert!(trigger.is_done());
        assert!(seen.lock().unwrap().as_ref().unwrap().is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_a_running_trigger_finishes_it() {
        let (ticks, trigger) = manual_ticks();
        ticks.unbounded_send(()).unwrap();

        let run = trigger.run(CancellationToken::new(), |_| {
            tokio::time::sleep(Duration::from_secs(10))
        });
        let outcome = tokio::time::timeout(Duration::from_secs(1), run).await;
        assert!(outcome.is_err());

        assert!(trigger.is_done());
        assert!(trigger.stop(&CancellationToken::new()).await);
    }

    #[tokio::test]
    async fn ended_tick_stream_finishes() {
        let (ticks, trigger) = manual_ticks();
        drop(ticks);
        trigger.run(CancellationToken::new(), |_| async {}).await;
        assert!(trigger.is_done());
        assert!(trigger.stop(&CancellationToken::new()).await);
    }
}
