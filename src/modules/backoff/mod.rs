//! Retry backoff and consecutive-failure escalation.
//!
//! A [`Backoff`] counts consecutive failures and turns the count into the next
//! retry delay, or into a give-up decision once the configured threshold is
//! reached.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How the delay grows with each consecutive failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BackoffStrategy {
    Fixed,
    Linear,
    #[default]
    Exponential,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub strategy: BackoffStrategy,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Fraction of the delay used as a symmetric random spread (0.0 disables jitter).
    pub jitter: f64,
    pub max_consecutive_failures: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            strategy: BackoffStrategy::Exponential,
            base_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(300),
            jitter: 0.0,
            max_consecutive_failures: 5,
        }
    }
}

impl RetryPolicy {
    /// Delay applied after the `failures`-th consecutive failure (1-based).
    pub fn delay_for(&self, failures: u32) -> Duration {
        let step = failures.max(1);
        let base = self.base_delay.as_secs_f64();
        let mut delay = match self.strategy {
            BackoffStrategy::Fixed => base,
            BackoffStrategy::Linear => base * step as f64,
            BackoffStrategy::Exponential => base * 2f64.powi((step - 1).min(30) as i32),
        };

        let ceiling = self.max_delay.as_secs_f64().max(base);
        delay = delay.min(ceiling);

        if self.jitter > 0.0 {
            let variance = delay * self.jitter.min(1.0);
            let jitter = rand::random::<f64>() * variance - (variance / 2.0);
            delay = (delay + jitter).clamp(0.0, ceiling);
        }

        Duration::from_secs_f64(delay.max(0.0))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    GiveUp { failures: u32 },
}

#[derive(Debug, Clone)]
pub struct Backoff {
    policy: RetryPolicy,
    consecutive_failures: u32,
}

impl Backoff {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            consecutive_failures: 0,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn record_failure(&mut self) -> u32 {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.consecutive_failures
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }

    pub fn reset(&mut self) {
        self.consecutive_failures = 0;
    }

    pub fn decision(&self) -> RetryDecision {
        if self.consecutive_failures >= self.policy.max_consecutive_failures {
            RetryDecision::GiveUp {
                failures: self.consecutive_failures,
            }
        } else {
            RetryDecision::RetryAfter(self.policy.delay_for(self.consecutive_failures))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(strategy: BackoffStrategy) -> RetryPolicy {
        RetryPolicy {
            strategy,
            base_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(60),
            jitter: 0.0,
            max_consecutive_failures: 3,
        }
    }

    #[test]
    fn strategies_escalate_and_cap() {
        let fixed = policy(BackoffStrategy::Fixed);
        assert_eq!(fixed.delay_for(4), Duration::from_secs(10));

        let linear = policy(BackoffStrategy::Linear);
        assert_eq!(linear.delay_for(3), Duration::from_secs(30));
        assert_eq!(linear.delay_for(9), Duration::from_secs(60));

        let exponential = policy(BackoffStrategy::Exponential);
        assert_eq!(exponential.delay_for(1), Duration::from_secs(10));
        assert_eq!(exponential.delay_for(3), Duration::from_secs(40));
        assert_eq!(exponential.delay_for(10), Duration::from_secs(60));
    }

    #[test]
    fn jitter_stays_within_ceiling() {
        let mut jittery = policy(BackoffStrategy::Exponential);
        jittery.jitter = 0.5;
        for failures in 1..8 {
            assert!(jittery.delay_for(failures) <= Duration::from_secs(60));
        }
    }

    #[test]
    fn gives_up_at_threshold() {
        let mut backoff = Backoff::new(policy(BackoffStrategy::Fixed));
        backoff.record_failure();
        backoff.record_failure();
        assert_eq!(backoff.decision(), RetryDecision::RetryAfter(Duration::from_secs(10)));
        backoff.record_failure();
        assert_eq!(backoff.decision(), RetryDecision::GiveUp { failures: 3 });

        backoff.record_success();
        assert_eq!(backoff.consecutive_failures(), 0);
    }
}
