//! Poller parameters and their normalization.
//!
//! `threshold` and `concurrency` are signed. A positive value is an absolute
//! count capped at `capacity`; zero or a negative value is an offset from
//! `capacity` ("leave N slots free"), floored at zero.
use std::time::Duration;

/// Invalid poller configuration. Fatal at construction time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("capacity should be >= 1, got {capacity}")]
    InvalidCapacity { capacity: usize },
    #[error("capacity should be <= {max}, got {capacity}", max = MAX_CAPACITY)]
    CapacityTooLarge { capacity: usize },
}

/// Largest capacity the worker pool's semaphore can hold.
pub const MAX_CAPACITY: usize = tokio::sync::Semaphore::MAX_PERMITS;

/// Raw poller parameters as a caller writes them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PollerConfig {
    /// Pause between fetch cycles once the source reports it is drained.
    pub period: Duration,
    /// Maximum tasks fetched but not yet finished.
    pub capacity: usize,
    /// Outstanding level at which fetching pauses for completions.
    pub threshold: isize,
    /// Maximum tasks running at once.
    pub concurrency: isize,
}

impl Default for PollerConfig {
    /// One second period, eight slots, refill when full, all slots running.
    fn default() -> Self {
        Self {
            period: Duration::from_secs(1),
            capacity: 8,
            threshold: 0,
            concurrency: 0,
        }
    }
}

/// Validated parameters with `threshold` and `concurrency` resolved against
/// `capacity`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolved {
    pub period: Duration,
    pub capacity: usize,
    pub threshold: usize,
    pub concurrency: usize,
}

impl PollerConfig {
    pub fn new(period: Duration, capacity: usize, threshold: isize, concurrency: isize) -> Self {
        Self {
            period,
            capacity,
            threshold,
            concurrency,
        }
    }

    /// Validate `capacity` and resolve the signed parameters.
    pub fn resolve(&self) -> Result<Resolved, ConfigError> {
        if self.capacity < 1 {
            return Err(ConfigError::InvalidCapacity {
                capacity: self.capacity,
            });
        }
        if self.capacity > MAX_CAPACITY {
            return Err(ConfigError::CapacityTooLarge {
                capacity: self.capacity,
            });
        }
        Ok(Resolved {
            period: self.period,
            capacity: self.capacity,
            threshold: normalize(self.threshold, self.capacity),
            concurrency: normalize(self.concurrency, self.capacity),
        })
    }
}

/// `v <= 0` resolves to `max(0, capacity + v)`, `v > 0` to `min(v, capacity)`.
pub fn normalize(value: isize, capacity: usize) -> usize {
    if value <= 0 {
        capacity.saturating_sub(value.unsigned_abs())
    } else {
        value.unsigned_abs().min(capacity)
    }
}
