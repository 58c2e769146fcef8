//! Utility streams for timing.
//!
//! `Ticker`: periodic wake-ups, measured from when the consumer asks again.
//!
//! Why: keep time-based behavior explicit and bounded. A slow consumer gets
//! its full pause after finishing instead of a burst of stale ticks.
use futures::Stream;
use pin_project_lite::pin_project;

/// Stream that wakes the trigger to run a fetch cycle.
pub trait TickStream: Stream<Item = ()> + Send {}

impl<St> TickStream for St where St: Stream<Item = ()> + Send {}

pin_project! {
    /// Fixed-delay stream to drive polling.
    ///
    /// The first tick arrives after `delay`, every later one `period` after
    /// the previous tick was consumed and the stream polled again. The timer
    /// is only created on that next poll, so time spent handling a tick is
    /// not counted against the pause.
    pub struct Ticker {
        #[pin]
        inner: Option<futures_timer::Delay>,
        period: std::time::Duration,
        immediate: bool,
    }
}

impl Ticker {
    /// First tick after one `period`.
    pub fn new(period: std::time::Duration) -> Self {
        Self::with_delay(period, period)
    }

    /// First tick right away, then every `period`.
    pub fn immediate(period: std::time::Duration) -> Self {
        Self::with_delay(std::time::Duration::ZERO, period)
    }

    /// First tick after `delay`, then every `period`.
    pub fn with_delay(delay: std::time::Duration, period: std::time::Duration) -> Self {
        let immediate = delay.is_zero();
        Self {
            inner: (!immediate).then(|| futures_timer::Delay::new(delay)),
            period,
            immediate,
        }
    }

    pub fn period(&self) -> std::time::Duration {
        self.period
    }
}

impl Stream for Ticker {
    type Item = ();

    fn poll_next(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        let mut this = self.project();
        if *this.immediate {
            *this.immediate = false;
            return std::task::Poll::Ready(Some(()));
        }
        if this.inner.is_none() {
            this.inner.set(Some(futures_timer::Delay::new(*this.period)));
        }
        if let Some(delay) = this.inner.as_mut().as_pin_mut() {
            std::task::ready!(delay.poll(cx));
        }
        this.inner.set(None);
        std::task::Poll::Ready(Some(()))
    }
}
