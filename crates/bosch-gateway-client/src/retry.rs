use std::time::Duration;

// Default number of attempts.
const DEFAULT_ATTEMPTS: u32 = 3;

// Default delay before the second attempt.
const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(250);

// Default upper bound of a single delay.
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(5);

/// A bounded exponential backoff policy.
///
/// The policy is used both to retry transient request failures and to
/// reopen a dropped connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_ATTEMPTS)
    }
}

impl RetryPolicy {
    /// Creates a [`RetryPolicy`] with the given attempt budget.
    ///
    /// The budget counts every attempt, the first one included, and is never
    /// lower than one.
    #[must_use]
    pub const fn new(attempts: u32) -> Self {
        Self {
            attempts: if attempts == 0 { 1 } else { attempts },
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }

    /// Sets the delay before the second attempt.
    #[must_use]
    pub const fn base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Sets the upper bound of a single delay.
    #[must_use]
    pub const fn max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Returns the attempt budget.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Returns the delay to wait after the given failed attempt, counting
    /// from one.
    ///
    /// The delay doubles after each attempt and never exceeds the maximum.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .saturating_mul(1 << exponent)
            .min(self.max_delay)
    }
}
