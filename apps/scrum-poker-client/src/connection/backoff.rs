use std::time::Duration;

use rand::Rng;

/// Reconnect pacing: capped exponential delays with jitter and a budget of
/// consecutive failures after which the connection is declared fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub max_consecutive_failures: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(10),
            max_consecutive_failures: 8,
        }
    }
}

#[derive(Debug)]
pub struct Backoff {
    policy: BackoffPolicy,
    failures: u32,
}

impl Backoff {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            failures: 0,
        }
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }

    /// Records one failed attempt and returns how long to wait before the
    /// next one, or `None` once the failure budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        self.failures = self.failures.saturating_add(1);
        if self.failures > self.policy.max_consecutive_failures {
            return None;
        }
        let ceiling = self.ceiling(self.failures);
        // equal jitter: never below half the ceiling
        let half = ceiling / 2;
        let spread = ceiling.saturating_sub(half).as_millis() as u64;
        let jitter = if spread == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=spread)
        };
        Some(half + Duration::from_millis(jitter))
    }

    fn ceiling(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.policy
            .initial_delay
            .saturating_mul(1u32 << shift)
            .min(self.policy.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_failures: u32) -> BackoffPolicy {
        BackoffPolicy {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1_000),
            max_consecutive_failures: max_failures,
        }
    }

    #[test_timeout::timeout]
    fn delays_grow_within_jitter_bounds_and_cap() {
        let mut backoff = Backoff::new(policy(10));
        let ceilings = [100, 200, 400, 800, 1_000, 1_000];
        for ceiling in ceilings {
            let delay = backoff.next_delay().expect("within budget");
            let ceiling = Duration::from_millis(ceiling);
            assert!(delay >= ceiling / 2, "{delay:?} below half of {ceiling:?}");
            assert!(delay <= ceiling, "{delay:?} above {ceiling:?}");
        }
    }

    #[test_timeout::timeout]
    fn budget_exhaustion_stops_retrying() {
        let mut backoff = Backoff::new(policy(2));
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_none());
        assert_eq!(backoff.failures(), 3);
    }

    #[test_timeout::timeout]
    fn reset_restarts_from_the_initial_delay() {
        let mut backoff = Backoff::new(policy(5));
        for _ in 0..4 {
            backoff.next_delay();
        }
        backoff.reset();
        let delay = backoff.next_delay().expect("budget restored");
        assert!(delay <= Duration::from_millis(100));
    }
}
