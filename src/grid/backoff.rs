//! Bounded backoff over consecutive failed ticks

use std::time::Duration;

use log::{error, info};

/// Counts consecutive failed ticks and stretches the poll cadence once a
/// threshold is crossed. A failure is never fatal; the loop only slows down.
#[derive(Debug, Clone)]
pub struct Backoff {
    interval: Duration,
    failure_threshold: u32,
    max_delay: Duration,
    consecutive_failures: u32,
}

impl Backoff {
    pub fn new(interval: Duration, failure_threshold: u32, max_delay: Duration) -> Self {
        Self {
            interval,
            failure_threshold: failure_threshold.max(1),
            max_delay,
            consecutive_failures: 0,
        }
    }

    /// Record a tick outcome; returns the extra delay to wait before the next tick
    pub fn record(&mut self, success: bool) -> Option<Duration> {
        if success {
            if self.consecutive_failures >= self.failure_threshold {
                info!(
                    "Recovered after {} consecutive failed ticks",
                    self.consecutive_failures
                );
            }
            self.consecutive_failures = 0;
            return None;
        }

        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        let delay = self.delay()?;
        error!(
            "{} consecutive failed ticks, backing off for {:?}",
            self.consecutive_failures, delay
        );
        Some(delay)
    }

    /// Extra delay for the current failure streak, if past the threshold
    pub fn delay(&self) -> Option<Duration> {
        if self.consecutive_failures < self.failure_threshold {
            return None;
        }

        let exponent = (self.consecutive_failures - self.failure_threshold).min(31);
        let delay = self
            .interval
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_delay);
        Some(delay.min(self.max_delay))
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }
}
