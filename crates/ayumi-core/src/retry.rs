//! Retry policies and backoff arithmetic.

use crate::duration::StepDuration;
use crate::error::WorkflowError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How the wait between attempts grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    /// `base_delay * attempt`.
    Linear,
    /// `base_delay * 2^(attempt - 1)`.
    Exponential,
    /// Always `base_delay`.
    #[default]
    None,
}

/// Wait before the attempt that follows `attempt` (1-based).
///
/// Saturates instead of overflowing, so the result stays non-decreasing in
/// `attempt` for both growing strategies. An `attempt` of 0 is treated as 1.
///
/// # Examples
///
/// ```
/// use ayumi_core::{delay_for, BackoffStrategy};
/// use std::time::Duration;
///
/// let base = Duration::from_secs(1);
/// assert_eq!(delay_for(3, base, BackoffStrategy::Linear), Duration::from_secs(3));
/// assert_eq!(delay_for(3, base, BackoffStrategy::Exponential), Duration::from_secs(4));
/// assert_eq!(delay_for(3, base, BackoffStrategy::None), base);
/// ```
pub fn delay_for(attempt: u32, base_delay: Duration, strategy: BackoffStrategy) -> Duration {
    let attempt = attempt.max(1);
    match strategy {
        BackoffStrategy::Linear => base_delay.saturating_mul(attempt),
        BackoffStrategy::Exponential => {
            let factor = 2u32.checked_pow(attempt - 1).unwrap_or(u32::MAX);
            base_delay.saturating_mul(factor)
        }
        BackoffStrategy::None => base_delay,
    }
}

/// Retry policy attached to a step.
///
/// `limit` counts attempts, not retries: a limit of 3 means at most three
/// tries in total. The policy is validated when it is built, so a typo in a
/// delay expression fails before the workflow ever runs.
///
/// # Examples
///
/// ```
/// use ayumi_core::{BackoffStrategy, RetryPolicy};
/// use std::time::Duration;
///
/// let policy = RetryPolicy::exponential(3, "10 second")?;
/// assert_eq!(policy.limit(), 3);
/// assert_eq!(policy.delay_for(1), Duration::from_secs(10));
/// assert_eq!(policy.delay_for(2), Duration::from_secs(20));
///
/// assert!(RetryPolicy::new(0, Duration::from_secs(1), BackoffStrategy::Linear).is_err());
/// assert!(RetryPolicy::linear(3, "10 secs").is_err());
/// # Ok::<(), ayumi_core::WorkflowError>(())
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawRetryPolicy")]
pub struct RetryPolicy {
    limit: u32,
    #[serde(rename = "delay")]
    base_delay: StepDuration,
    #[serde(rename = "backoff")]
    strategy: BackoffStrategy,
}

#[derive(Deserialize)]
struct RawRetryPolicy {
    limit: u32,
    #[serde(default, alias = "base_delay")]
    delay: Option<StepDuration>,
    #[serde(default, alias = "strategy")]
    backoff: BackoffStrategy,
}

impl TryFrom<RawRetryPolicy> for RetryPolicy {
    type Error = WorkflowError;

    fn try_from(raw: RawRetryPolicy) -> Result<Self, Self::Error> {
        RetryPolicy::new(raw.limit, raw.delay.unwrap_or_default(), raw.backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::once()
    }
}

impl RetryPolicy {
    /// Creates a validated policy.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::Configuration`] if `limit` is 0.
    pub fn new(
        limit: u32,
        base_delay: impl Into<StepDuration>,
        strategy: BackoffStrategy,
    ) -> Result<Self, WorkflowError> {
        if limit == 0 {
            return Err(WorkflowError::Configuration(
                "retry limit must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            limit,
            base_delay: base_delay.into(),
            strategy,
        })
    }

    /// Single attempt, no waiting. What a step gets without a policy.
    pub fn once() -> Self {
        Self {
            limit: 1,
            base_delay: StepDuration::ZERO,
            strategy: BackoffStrategy::None,
        }
    }

    /// Linear backoff with a delay expression such as `"1 second"`.
    pub fn linear(limit: u32, base_delay: &str) -> Result<Self, WorkflowError> {
        Self::new(limit, base_delay.parse::<StepDuration>()?, BackoffStrategy::Linear)
    }

    /// Exponential backoff with a delay expression such as `"10 second"`.
    pub fn exponential(limit: u32, base_delay: &str) -> Result<Self, WorkflowError> {
        Self::new(
            limit,
            base_delay.parse::<StepDuration>()?,
            BackoffStrategy::Exponential,
        )
    }

    /// Constant wait between attempts.
    pub fn fixed(limit: u32, delay: &str) -> Result<Self, WorkflowError> {
        Self::new(limit, delay.parse::<StepDuration>()?, BackoffStrategy::None)
    }

    /// Maximum number of attempts.
    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Delay the strategy scales from.
    pub fn base_delay(&self) -> Duration {
        self.base_delay.as_duration()
    }

    /// Growth strategy.
    pub fn strategy(&self) -> BackoffStrategy {
        self.strategy
    }

    /// Wait after failed attempt `attempt` (1-based) before the next one.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        delay_for(attempt, self.base_delay(), self.strategy)
    }

    /// Cumulative wait if every attempt fails. No wait follows the last one.
    pub fn total_backoff(&self) -> Duration {
        (1..self.limit).fold(Duration::ZERO, |acc, attempt| {
            acc.saturating_add(self.delay_for(attempt))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_sequence() {
        let base = Duration::from_millis(100);
        let delays: Vec<_> = (1..=4)
            .map(|a| delay_for(a, base, BackoffStrategy::Linear))
            .collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(300),
                Duration::from_millis(400),
            ]
        );
    }

    #[test]
    fn test_exponential_sequence() {
        let base = Duration::from_millis(100);
        let delays: Vec<_> = (1..=4)
            .map(|a| delay_for(a, base, BackoffStrategy::Exponential))
            .collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(400),
                Duration::from_millis(800),
            ]
        );
    }

    #[test]
    fn test_non_decreasing_and_saturating() {
        let base = Duration::from_secs(10);
        for strategy in [BackoffStrategy::Linear, BackoffStrategy::Exponential] {
            let mut previous = Duration::ZERO;
            for attempt in [1, 2, 3, 10, 31, 32, 33, 64, u32::MAX] {
                let delay = delay_for(attempt, base, strategy);
                assert!(delay >= previous, "{strategy:?} decreased at {attempt}");
                previous = delay;
            }
        }
    }

    #[test]
    fn test_none_strategy() {
        assert_eq!(
            delay_for(7, Duration::from_secs(2), BackoffStrategy::None),
            Duration::from_secs(2)
        );
        assert_eq!(
            delay_for(7, Duration::ZERO, BackoffStrategy::None),
            Duration::ZERO
        );
        assert_eq!(
            delay_for(0, Duration::from_secs(2), BackoffStrategy::Linear),
            Duration::from_secs(2)
        );
    }

    #[test]
    fn test_policy_validation() {
        assert!(matches!(
            RetryPolicy::linear(0, "1 second"),
            Err(WorkflowError::Configuration(_))
        ));
        assert!(matches!(
            RetryPolicy::exponential(3, "soon"),
            Err(WorkflowError::Configuration(_))
        ));
        let policy = RetryPolicy::once();
        assert_eq!(policy.limit(), 1);
        assert_eq!(policy.total_backoff(), Duration::ZERO);
    }

    #[test]
    fn test_total_backoff() {
        let policy = RetryPolicy::linear(3, "1 second").expect("valid policy");
        assert_eq!(policy.total_backoff(), Duration::from_secs(3));

        let policy = RetryPolicy::exponential(4, "1 second").expect("valid policy");
        assert_eq!(policy.total_backoff(), Duration::from_secs(7));
    }

    #[test]
    fn test_policy_from_config() {
        let policy: RetryPolicy = serde_json::from_str(
            r#"{"limit": 3, "delay": "10 second", "backoff": "exponential"}"#,
        )
        .expect("valid policy");
        assert_eq!(policy.limit(), 3);
        assert_eq!(policy.base_delay(), Duration::from_secs(10));
        assert_eq!(policy.strategy(), BackoffStrategy::Exponential);

        let policy: RetryPolicy =
            serde_json::from_str(r#"{"limit": 2}"#).expect("delay and backoff are optional");
        assert_eq!(policy.base_delay(), Duration::ZERO);
        assert_eq!(policy.strategy(), BackoffStrategy::None);

        assert!(serde_json::from_str::<RetryPolicy>(r#"{"limit": 0}"#).is_err());
        assert!(serde_json::from_str::<RetryPolicy>(
            r#"{"limit": 2, "delay": "2 weeks"}"#
        )
        .is_err());
    }
}
