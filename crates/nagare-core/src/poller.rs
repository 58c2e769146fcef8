//! Poller engine and builder.
//!
//! Adaptive polling: fetch as long as the source says more is waiting, pause
//! for the period once it is drained. Capacity bounds what is in flight,
//! the threshold decides when to wait for room, the pool bounds what runs.
use std::{sync::Arc, time::Duration};

use futures::FutureExt as _;
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};
use tracing::Instrument as _;

use crate::{
    Task,
    config::{ConfigError, PollerConfig, Resolved},
    ledger::Ledger,
    pool::{TaskSpawner, WorkerPool},
    source::{Batch, TaskSource},
    trigger::Trigger,
    utils::{TickStream, Ticker},
};

#[cfg(feature = "rt-tokio")]
use crate::TokioSpawner;

/// Handle to a poller. Clones share the same instance.
///
/// Start it on a task of its own and stop it from anywhere:
///
/// ```no_run
/// # async fn demo() -> Result<(), nagare_core::ConfigError> {
/// use nagare_core::{Batch, CancellationToken, Poller};
///
/// let poller = Poller::new(
///     std::time::Duration::from_secs(1),
///     16,
///     -4,
///     4,
///     |_token: CancellationToken, limit: usize| async move {
///         let tasks = (0..limit.min(3))
///             .map(|n| move |_token: CancellationToken| async move { println!("task {n}") })
///             .collect();
///         Batch::new(tasks, false)
///     },
/// )?;
///
/// let running = poller.clone();
/// tokio::spawn(async move { running.start().await });
/// // ...
/// poller.stop().await;
/// # Ok(())
/// # }
/// ```
pub struct Poller<S, Tick, Sp> {
    inner: Arc<Inner<S, Tick, Sp>>,
}

impl<S, Tick, Sp> Clone for Poller<S, Tick, Sp> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S, Tick, Sp> std::fmt::Debug for Poller<S, Tick, Sp> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Poller")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

struct Inner<S, Tick, Sp> {
    config: Resolved,
    trigger: Trigger<Tick>,
    pool: WorkerPool<Sp>,
    // Owned by whoever runs sequentially: the dispatch cycle while the
    // trigger is live, the shutdown wait after it finished.
    state: tokio::sync::Mutex<Cycle<S>>,
}

struct Cycle<S> {
    ledger: Ledger,
    source: S,
}

#[cfg(feature = "rt-tokio")]
impl<S> Poller<S, Ticker, TokioSpawner>
where
    S: TaskSource,
{
    /// Poller with the default ticker and Tokio spawner.
    ///
    /// Fails if `capacity < 1`. See [`PollerConfig`] for how `threshold` and
    /// `concurrency` are resolved.
    pub fn new(
        period: Duration,
        capacity: usize,
        threshold: isize,
        concurrency: isize,
        source: S,
    ) -> Result<Self, ConfigError> {
        PollerBuilder::new(period)
            .capacity(capacity)
            .threshold(threshold)
            .concurrency(concurrency)
            .build(source)
    }
}

impl<S, Tick, Sp> Poller<S, Tick, Sp> {
    pub fn capacity(&self) -> usize {
        self.inner.config.capacity
    }

    pub fn threshold(&self) -> usize {
        self.inner.config.threshold
    }

    pub fn concurrency(&self) -> usize {
        self.inner.config.concurrency
    }

    pub fn period(&self) -> Duration {
        self.inner.config.period
    }

    pub fn config(&self) -> Resolved {
        self.inner.config
    }

    /// Tasks fetched but not yet accounted as finished.
    ///
    /// `None` while a fetch cycle or shutdown wait owns the ledger.
    pub fn outstanding(&self) -> Option<usize> {
        self.inner
            .state
            .try_lock()
            .ok()
            .map(|cycle| cycle.ledger.outstanding())
    }
}

impl<S, Tick, Sp> Poller<S, Tick, Sp>
where
    S: TaskSource,
    Tick: TickStream,
    Sp: TaskSpawner,
{
    /// Run until stopped. The first fetch happens right away.
    pub async fn start(&self) {
        self.start_with_token(CancellationToken::new()).await
    }

    /// Run until stopped or `token` is cancelled.
    ///
    /// Cancelling `token` stops the poller for good, the same as
    /// [`stop`](Self::stop) minus the wait for running tasks.
    pub async fn start_with_token(&self, token: CancellationToken) {
        let Resolved {
            period,
            capacity,
            threshold,
            concurrency,
        } = self.inner.config;
        tracing::info!(?period, capacity, threshold, concurrency, "Poller started");
        let inner = &*self.inner;
        inner
            .trigger
            .run(token, move |scope| {
                inner
                    .dispatch_cycle(scope)
                    .instrument(tracing::debug_span!("dispatch_cycle"))
            })
            .await;
        tracing::debug!("Poller trigger finished");
    }

    /// Stop fetching and wait for every dispatched task to finish.
    pub async fn stop(&self) {
        self.stop_with_token(&CancellationToken::new()).await;
    }

    /// Stop fetching, then wait for dispatched tasks unless `token` fires.
    ///
    /// Returns `true` once the poller is quiescent: no fetch cycle running,
    /// no task outstanding. Returns `false` if `token` cut the wait short;
    /// the accounting stays intact and a later stop picks it up.
    pub async fn stop_with_token(&self, token: &CancellationToken) -> bool {
        if !self.inner.trigger.stop(token).await || token.is_cancelled() {
            tracing::debug!("Poller stop cancelled before shutdown wait");
            return false;
        }

        let mut cycle = {
            let lock = self.inner.state.lock().fuse();
            let cancelled = token.cancelled().fuse();
            futures::pin_mut!(lock, cancelled);
            futures::select_biased! {
                cycle = lock => cycle,
                _ = cancelled => return false,
            }
        };
        tracing::trace!(
            outstanding = cycle.ledger.outstanding(),
            "waiting for outstanding task(s) to finish"
        );
        let drained = cycle.ledger.drain(token).await;
        tracing::info!(
            outstanding = cycle.ledger.outstanding(),
            drained,
            "Poller stopped"
        );
        drained
    }

    /// Resolves once the poller's trigger has finished for good.
    pub fn done(&self) -> WaitForCancellationFutureOwned {
        self.inner.trigger.done()
    }

    pub fn is_done(&self) -> bool {
        self.inner.trigger.is_done()
    }
}

impl<S, Tick, Sp> Inner<S, Tick, Sp>
where
    S: TaskSource,
    Sp: TaskSpawner,
{
    /// One trigger invocation: wait for room, fetch, dispatch, repeat while
    /// the source has more.
    async fn dispatch_cycle(&self, token: CancellationToken) {
        let mut cycle = self.state.lock().await;
        let Cycle { ledger, source } = &mut *cycle;
        loop {
            if token.is_cancelled() {
                return;
            }
            if !ledger.wait_below(&token, self.config.threshold).await {
                tracing::debug!(
                    outstanding = ledger.outstanding(),
                    "threshold wait interrupted"
                );
                return;
            }

            let limit = ledger.available();
            let Batch {
                mut tasks,
                has_more,
            } = source.fetch(token.clone(), limit).await;
            tracing::debug!(
                limit,
                capacity = ledger.capacity(),
                fetched = tasks.len(),
                has_more,
                outstanding = ledger.outstanding(),
                "fetched tasks"
            );
            if tasks.len() > limit {
                tracing::warn!(
                    limit,
                    fetched = tasks.len(),
                    "source returned more tasks than requested; dropping the excess"
                );
                tasks.truncate(limit);
            }

            for task in tasks {
                let completion = ledger.track();
                let token = token.clone();
                self.pool.submit(async move {
                    // Signals on drop, even if the task panics.
                    let _completion = completion;
                    tracing::trace!("Start task");
                    task.run(token).await;
                    tracing::trace!("Finish task");
                });
            }
            tracing::trace!(
                running = self.pool.running(),
                width = self.pool.width(),
                "dispatched tasks"
            );

            if !has_more {
                return;
            }
        }
    }
}

/// Builder for [`Poller`].
///
/// Defaults: eight slots, refill only when full, every slot may run.
pub struct PollerBuilder<Tick, Sp> {
    tick: Tick,
    config: PollerConfig,
    spawner: Sp,
}

#[cfg(feature = "rt-tokio")]
impl PollerBuilder<Ticker, TokioSpawner> {
    /// Poll every `period`, first fetch right away.
    pub fn new(period: Duration) -> Self {
        Self::from_config(PollerConfig {
            period,
            ..PollerConfig::default()
        })
    }

    /// Start from a full set of parameters, e.g. read from a config file.
    pub fn from_config(config: PollerConfig) -> Self {
        PollerBuilder {
            tick: Ticker::immediate(config.period),
            config,
            spawner: TokioSpawner::new(),
        }
    }
}

#[cfg(feature = "rt-tokio")]
impl<Tick> PollerBuilder<Tick, TokioSpawner> {
    /// Use a custom tick stream (compose with notifications, tests, ...).
    pub fn new_with_tick(tick: Tick) -> Self {
        PollerBuilder {
            tick,
            config: PollerConfig::default(),
            spawner: TokioSpawner::new(),
        }
    }
}

impl<Tick, Sp> PollerBuilder<Tick, Sp> {
    /// Builder without any runtime defaults.
    pub fn with_parts(tick: Tick, spawner: Sp, config: PollerConfig) -> Self {
        Self {
            tick,
            config,
            spawner,
        }
    }

    /// Maximum tasks fetched but not yet finished. Must be at least one.
    pub fn capacity(self, capacity: usize) -> Self {
        let config = PollerConfig {
            capacity,
            ..self.config
        };
        Self { config, ..self }
    }

    /// Outstanding level that pauses fetching; `<= 0` counts back from
    /// capacity.
    pub fn threshold(self, threshold: isize) -> Self {
        let config = PollerConfig {
            threshold,
            ..self.config
        };
        Self { config, ..self }
    }

    /// Tasks running at once; `<= 0` counts back from capacity.
    pub fn concurrency(self, concurrency: isize) -> Self {
        let config = PollerConfig {
            concurrency,
            ..self.config
        };
        Self { config, ..self }
    }

    /// Replace the tick stream driving fetch cycles.
    pub fn tick<Tick2>(self, tick: Tick2) -> PollerBuilder<Tick2, Sp>
    where
        Tick2: TickStream,
    {
        let Self {
            tick: _,
            config,
            spawner,
        } = self;
        PollerBuilder {
            tick,
            config,
            spawner,
        }
    }

    /// Choose how tasks are spawned.
    pub fn spawner<Sp2>(self, spawner: Sp2) -> PollerBuilder<Tick, Sp2>
    where
        Sp2: TaskSpawner,
    {
        let Self {
            tick,
            config,
            spawner: _,
        } = self;
        PollerBuilder {
            tick,
            config,
            spawner,
        }
    }
}

impl<Sp> PollerBuilder<Ticker, Sp> {
    /// Change the pause between cycles once the source is drained.
    pub fn period(self, period: Duration) -> Self {
        let config = PollerConfig {
            period,
            ..self.config
        };
        Self {
            tick: Ticker::immediate(period),
            config,
            ..self
        }
    }
}

impl<Tick, Sp> PollerBuilder<Tick, Sp>
where
    Tick: TickStream,
    Sp: TaskSpawner,
{
    /// Validate the parameters and assemble the poller around `source`.
    pub fn build<S>(self, source: S) -> Result<Poller<S, Tick, Sp>, ConfigError>
    where
        S: TaskSource,
    {
        let Self {
            tick,
            config,
            spawner,
        } = self;
        let config = config.resolve()?;

        let inner = Inner {
            config,
            trigger: Trigger::new(tick),
            pool: WorkerPool::new(config.concurrency, spawner),
            state: tokio::sync::Mutex::new(Cycle {
                ledger: Ledger::new(config.capacity),
                source,
            }),
        };
        Ok(Poller {
            inner: Arc::new(inner),
        })
    }
}
