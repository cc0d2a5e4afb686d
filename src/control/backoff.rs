use std::time::Duration;

// --------------------------------------------------------------------------------------------------------------

/// Consecutive login failure counter and the delay it maps to.
/// The first `escalate_after` failures wait `short`, every further one waits `long`.
#[derive(Debug, Clone)]
pub struct LoginBackoff {
    short:          Duration,
    long:           Duration,
    escalate_after: u32,
    failures:       u32,
}

impl LoginBackoff {
    pub fn new(short: Duration, long: Duration, escalate_after: u32) -> Self {
        Self { short, long, escalate_after, failures: 0 }
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Count one more failure and return how long to wait before the next attempt.
    pub fn record_failure(&mut self) -> Duration {
        self.failures = self.failures.saturating_add(1);
        self.delay_for(self.failures)
    }

    /// Returns the number of failures that preceded the success.
    pub fn reset(&mut self) -> u32 {
        std::mem::take(&mut self.failures)
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        if attempt <= self.escalate_after {
            self.short
        } else {
            self.long
        }
    }
}

// --------------------------------------------------------------------------------------------------------------
