//! Step names, options and per-step ledger records.

use crate::duration::StepDuration;
use crate::error::WorkflowError;
use crate::retry::RetryPolicy;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Type-safe step name wrapper.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepName(String);

impl StepName {
    /// Creates a new StepName.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the step name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StepName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for StepName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for StepName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for StepName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Retry and timeout settings for one `step.run_with` call.
///
/// Without options a step gets a single attempt and no timeout.
///
/// # Examples
///
/// ```
/// use ayumi_core::{RetryPolicy, StepOptions};
/// use std::time::Duration;
///
/// let options = StepOptions::new()
///     .with_retries(RetryPolicy::exponential(3, "10 second")?)
///     .with_timeout_expr("10 minutes")?;
///
/// assert_eq!(options.attempt_limit(), 3);
/// assert_eq!(options.timeout_duration(), Some(Duration::from_secs(600)));
/// # Ok::<(), ayumi_core::WorkflowError>(())
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepOptions {
    /// Retry policy. `None` means one attempt.
    #[serde(default)]
    pub retries: Option<RetryPolicy>,
    /// Limit applied to each attempt. `None` means unbounded.
    #[serde(default)]
    pub timeout: Option<StepDuration>,
}

impl StepOptions {
    /// Options with a single attempt and no timeout.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the retry policy.
    pub fn with_retries(mut self, policy: RetryPolicy) -> Self {
        self.retries = Some(policy);
        self
    }

    /// Sets the per-attempt timeout.
    pub fn with_timeout(mut self, timeout: impl Into<StepDuration>) -> Self {
        self.timeout = Some(timeout.into());
        self
    }

    /// Sets the per-attempt timeout from an expression such as `"1 minute"`.
    pub fn with_timeout_expr(self, expr: &str) -> Result<Self, WorkflowError> {
        Ok(self.with_timeout(expr.parse::<StepDuration>()?))
    }

    /// Effective retry policy.
    pub fn retry_policy(&self) -> RetryPolicy {
        self.retries.unwrap_or_default()
    }

    /// Maximum number of attempts.
    pub fn attempt_limit(&self) -> u32 {
        self.retry_policy().limit()
    }

    /// Per-attempt timeout, if any.
    pub fn timeout_duration(&self) -> Option<Duration> {
        self.timeout.map(|t| t.as_duration())
    }
}

/// What a step record was created by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepKind {
    /// Caller-supplied work driven by the retry state machine.
    Task,
    /// A pure delay.
    Sleep,
}

/// Lifecycle state of a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    /// An attempt or backoff wait is in progress.
    Running,
    /// The step produced a value.
    Succeeded,
    /// Attempts were exhausted.
    Failed,
    /// A termination signal stopped the step.
    Terminated,
}

impl StepStatus {
    /// Returns `true` once the step can no longer change.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StepStatus::Running)
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StepStatus::Running => "running",
            StepStatus::Succeeded => "succeeded",
            StepStatus::Failed => "failed",
            StepStatus::Terminated => "terminated",
        };
        f.write_str(s)
    }
}

/// One entry in a run's ledger.
///
/// Two calls with the same name produce two records, told apart by `index`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    /// Name given by the workflow author.
    pub name: StepName,
    /// Position in call order within the run, starting at 0.
    pub index: usize,
    /// Task or sleep.
    pub kind: StepKind,
    /// Attempts started so far.
    pub attempts: u32,
    /// Current state.
    pub status: StepStatus,
    /// When the step was first called.
    pub started_at: DateTime<Utc>,
    /// When the step reached a terminal state.
    pub finished_at: Option<DateTime<Utc>>,
    /// Message of the most recent attempt failure.
    pub last_error: Option<String>,
}

impl StepRecord {
    pub(crate) fn new(name: StepName, index: usize, kind: StepKind) -> Self {
        Self {
            name,
            index,
            kind,
            attempts: 0,
            status: StepStatus::Running,
            started_at: Utc::now(),
            finished_at: None,
            last_error: None,
        }
    }

    /// Wall-clock milliseconds from first call to terminal state.
    pub fn duration_ms(&self) -> Option<u64> {
        let finished = self.finished_at?;
        let elapsed = (finished - self.started_at).num_milliseconds();
        Some(u64::try_from(elapsed).unwrap_or(0))
    }
}
