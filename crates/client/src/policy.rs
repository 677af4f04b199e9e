//! Retry policies.

use std::time::Duration;

/// How hard to try when opening a connection.
#[derive(Debug, Clone)]
pub struct ConnectPolicy {
    /// Total dial attempts before giving up.
    pub attempts: u32,
    /// Pause between failed attempts.
    pub retry_delay: Duration,
    /// Deadline for a single dial.
    pub connect_timeout: Duration,
}

impl Default for ConnectPolicy {
    fn default() -> Self {
        Self {
            attempts: 10,
            retry_delay: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(3),
        }
    }
}

/// How many upload rounds to run, and how long to wait between them.
#[derive(Debug, Clone)]
pub struct RoundPolicy {
    pub max_rounds: u32,
    /// Delay after the first failed round.
    pub initial_delay: Duration,
    /// Backoff cap.
    pub max_delay: Duration,
    /// Multiplier for each subsequent round.
    pub backoff_factor: f64,
}

impl Default for RoundPolicy {
    fn default() -> Self {
        Self {
            max_rounds: 10,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(15),
            backoff_factor: 2.0,
        }
    }
}

impl RoundPolicy {
    /// Delay after failed round `round` (1-based).
    pub fn delay_after_round(&self, round: u32) -> Duration {
        let exp = round.saturating_sub(1).min(63) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(exp);
        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_defaults() {
        let policy = ConnectPolicy::default();
        assert_eq!(policy.attempts, 10);
        assert_eq!(policy.retry_delay, Duration::from_secs(1));
        assert_eq!(policy.connect_timeout, Duration::from_secs(3));
    }

    #[test]
    fn round_delay_backs_off_and_caps() {
        let policy = RoundPolicy::default();
        let expected = [0.5, 1.0, 2.0, 4.0, 8.0, 15.0, 15.0];
        for (i, &secs) in expected.iter().enumerate() {
            let delay = policy.delay_after_round((i + 1) as u32);
            assert!(
                (delay.as_secs_f64() - secs).abs() < 1e-9,
                "round {}: {delay:?}",
                i + 1
            );
        }
        assert_eq!(policy.delay_after_round(u32::MAX), policy.max_delay);
    }

    #[test]
    fn zero_delay_policy() {
        let policy = RoundPolicy {
            initial_delay: Duration::ZERO,
            ..RoundPolicy::default()
        };
        assert_eq!(policy.delay_after_round(5), Duration::ZERO);
    }
}
