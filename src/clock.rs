use std::sync::Arc;
use std::time::Instant;

/// Monotonic time source shared by the drain loop, producers, and stats.
pub trait MonotonicClock: Send + Sync {
    /// Returns the current monotonic timestamp in nanoseconds.
    fn now_ns(&self) -> u128;
}

/// System clock implementation backed by `Instant`.
#[derive(Debug, Clone)]
pub struct SystemMonotonicClock {
    start: Instant,
}

impl Default for SystemMonotonicClock {
    fn default() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl SystemMonotonicClock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MonotonicClock for SystemMonotonicClock {
    fn now_ns(&self) -> u128 {
        self.start.elapsed().as_nanos()
    }
}

/// Clock handle passed between session components.
pub type SharedClock = Arc<dyn MonotonicClock>;

pub(crate) fn system_clock() -> SharedClock {
    Arc::new(SystemMonotonicClock::new())
}

pub(crate) fn saturating_u64(value: u128) -> u64 {
    value.min(u128::from(u64::MAX)) as u64
}
