//! Workflow error types.

use crate::step::StepName;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Intentional early exit from a workflow run.
///
/// Raise it from a step body (as an `anyhow::Error`) or from the business
/// method (as a [`WorkflowError`]) to stop the run. It is never retried and
/// the run is reported as `terminated` rather than `failed`.
///
/// # Examples
///
/// ```
/// use ayumi_core::{Termination, WorkflowError};
///
/// let err: WorkflowError = Termination::new("no sources configured").into();
/// assert_eq!(err.termination().map(|t| t.reason()), Some("no sources configured"));
///
/// // Also recognised when it travels through anyhow.
/// let err = anyhow::Error::new(Termination::new("empty feed")).context("scrape");
/// assert!(Termination::find(&err).is_some());
/// ```
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("Workflow terminated: {reason}")]
pub struct Termination {
    reason: String,
}

impl Termination {
    /// Creates a termination signal with a human-readable reason.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    /// Returns the reason given when the signal was raised.
    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// Looks for a termination signal anywhere in an error chain.
    ///
    /// A [`WorkflowError`] in the chain counts when it carries one, so a
    /// step body can `?` the result of a nested step or of a helper that
    /// returns `WorkflowError`.
    pub fn find(err: &anyhow::Error) -> Option<&Termination> {
        err.downcast_ref::<Termination>()
            .or_else(|| {
                err.downcast_ref::<WorkflowError>()
                    .and_then(WorkflowError::termination)
            })
            .or_else(|| {
                err.chain().find_map(|cause| {
                    cause.downcast_ref::<Termination>().or_else(|| {
                        cause
                            .downcast_ref::<WorkflowError>()
                            .and_then(WorkflowError::termination)
                    })
                })
            })
    }
}

/// Errors that can occur during workflow execution.
///
/// Marked `#[non_exhaustive]`; include a wildcard arm when matching.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum WorkflowError {
    /// The run was stopped on purpose.
    #[error(transparent)]
    Terminated(#[from] Termination),

    /// A step exhausted its attempts. `source` is the last attempt's error.
    #[error("Step '{step_name}' failed after {attempts} attempt(s): {source}")]
    StepFailed {
        /// The name of the step that failed.
        step_name: StepName,
        /// Number of attempts made.
        attempts: u32,
        /// Error raised by the final attempt.
        #[source]
        source: anyhow::Error,
    },

    /// The final attempt of a step exceeded its timeout.
    #[error("Timeout occurred in step: {step_name} (limit {timeout:?}, {attempts} attempt(s))")]
    Timeout {
        /// The name of the step that timed out.
        step_name: StepName,
        /// Per-attempt limit that elapsed.
        timeout: Duration,
        /// Number of attempts made.
        attempts: u32,
    },

    /// Malformed duration, retry policy or engine configuration.
    #[error("Invalid workflow configuration: {0}")]
    Configuration(String),

    /// Any other error raised by business code.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl WorkflowError {
    /// Wraps an arbitrary error raised by business code.
    pub fn other(err: impl Into<anyhow::Error>) -> Self {
        WorkflowError::Other(err.into())
    }

    /// Returns the termination signal carried by this error, if any.
    pub fn termination(&self) -> Option<&Termination> {
        match self {
            WorkflowError::Terminated(signal) => Some(signal),
            WorkflowError::Other(err) => Termination::find(err),
            _ => None,
        }
    }

    /// Returns `true` if this error means the run was stopped on purpose.
    pub fn is_termination(&self) -> bool {
        self.termination().is_some()
    }

    /// Returns `true` if the last attempt of a step ran out of time.
    pub fn is_timeout(&self) -> bool {
        matches!(self, WorkflowError::Timeout { .. })
    }

    /// Number of attempts made by the step that produced this error.
    pub fn attempts(&self) -> Option<u32> {
        match self {
            WorkflowError::StepFailed { attempts, .. }
            | WorkflowError::Timeout { attempts, .. } => Some(*attempts),
            _ => None,
        }
    }
}
