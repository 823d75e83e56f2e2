use std::time::Duration;

/// Exponential backoff with a cap: `base * 2^(attempt - 1)`, never above `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn exponential(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
        }
    }

    /// No waiting at all. Handy in tests.
    pub fn immediate() -> Self {
        Self::exponential(Duration::ZERO, Duration::ZERO)
    }

    /// Delay to wait after failure number `attempt` (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        // 2^31 already overflows any sane base; clamp the shift.
        let factor = 1u32 << (attempt - 1).min(31);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_until_capped() {
        let p = RetryPolicy::exponential(Duration::from_secs(60), Duration::from_secs(600));
        assert_eq!(p.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(p.delay_for_attempt(1), Duration::from_secs(60));
        assert_eq!(p.delay_for_attempt(2), Duration::from_secs(120));
        assert_eq!(p.delay_for_attempt(3), Duration::from_secs(240));
        assert_eq!(p.delay_for_attempt(4), Duration::from_secs(480));
        assert_eq!(p.delay_for_attempt(5), Duration::from_secs(600));
    }

    #[test]
    fn huge_attempt_counts_do_not_overflow() {
        let p = RetryPolicy::exponential(Duration::from_secs(60), Duration::from_secs(3600));
        assert_eq!(p.delay_for_attempt(u32::MAX), Duration::from_secs(3600));
    }

    #[test]
    fn immediate_never_waits() {
        assert_eq!(RetryPolicy::immediate().delay_for_attempt(7), Duration::ZERO);
    }
}
