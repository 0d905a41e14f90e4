//! Timer clock.
use std::time::Duration;

use crate::constants::*;

/// Accumulates elapsed host time against a fixed period.
///
/// It is designed to work with the yielding pattern of the
/// interpreter loop. The host reports how much time passed since
/// the previous frame, and the clock answers how many whole
/// cycles fit into it. The remainder is carried over to the next
/// frame, so the cycle rate stays locked regardless of frame rate.
#[derive(Debug, Clone)]
pub struct Clock {
    period: Duration,
    elapsed: Duration,
}

impl Clock {
    /// Creates a clock that completes a cycle every `period`.
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            elapsed: Duration::ZERO,
        }
    }

    /// Clock for the 60 Hz delay and sound timers.
    pub fn timers() -> Self {
        Self::new(Duration::from_nanos(CLOCK_CYCLE_TIME))
    }

    /// Set the clock state back to zero.
    pub fn reset(&mut self) {
        self.elapsed = Duration::ZERO;
    }

    /// Add elapsed time and return the number of cycles that are due.
    pub fn advance(&mut self, dt: Duration) -> u32 {
        if self.period.is_zero() {
            // Unthrottled clock.
            return 1;
        }

        self.elapsed += dt;

        let mut cycles = 0;
        while self.elapsed >= self.period {
            self.elapsed -= self.period;
            cycles += 1;
        }
        cycles
    }
}
