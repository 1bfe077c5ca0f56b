//! The step facade handed to workflow authors.

use crate::events::RunEventKind;
use crate::executor::{Attempt, OpenStep, RunLedger, StepExecutor};
use ayumi_core::{
    EventId, RunContext, StepDuration, StepKind, StepName, StepOptions, StepStatus, WorkflowError,
    WorkflowId,
};
use std::fmt;
use std::future::Future;
use tracing::debug;

/// Dispatches step calls for one run.
///
/// Every call opens its own record in the run's ledger, in call order; two
/// calls with the same name are never merged. The facade only lives as long
/// as the business method that received it.
pub struct WorkflowStep {
    ledger: RunLedger,
}

impl fmt::Debug for WorkflowStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowStep")
            .field("workflow_id", self.ledger.workflow_id())
            .field("event_id", self.ledger.event_id())
            .finish()
    }
}

impl WorkflowStep {
    pub(crate) fn new(ledger: RunLedger) -> Self {
        Self { ledger }
    }

    /// Workflow this run belongs to.
    pub fn workflow_id(&self) -> &WorkflowId {
        self.ledger.workflow_id()
    }

    /// Event that started this run.
    pub fn event_id(&self) -> &EventId {
        self.ledger.event_id()
    }

    /// Copy of the ledger as it stands now.
    pub fn ledger(&self) -> RunContext {
        self.ledger.snapshot()
    }

    pub(crate) fn into_context(self) -> RunContext {
        self.ledger.into_context()
    }

    pub(crate) fn publish(&self, kind: RunEventKind) {
        self.ledger.publish(kind);
    }

    /// Runs `body` once, with no timeout.
    ///
    /// See [`run_with`](Self::run_with).
    pub async fn run<T, F, Fut>(
        &self,
        name: impl Into<StepName>,
        body: F,
    ) -> Result<T, WorkflowError>
    where
        F: FnMut(Attempt) -> Fut + Send,
        Fut: Future<Output = anyhow::Result<T>> + Send,
        T: Send,
    {
        self.run_with(name, StepOptions::default(), body).await
    }

    /// Runs `body` under a retry policy and per-attempt timeout.
    ///
    /// `body` is called once per attempt. Returning an error whose chain
    /// contains a [`Termination`](ayumi_core::Termination) stops the step at
    /// once, whatever the retry policy says.
    ///
    /// # Errors
    ///
    /// - [`WorkflowError::Terminated`] if the body raised a termination signal
    /// - [`WorkflowError::StepFailed`] if the last attempt returned an error;
    ///   its `source` field holds that error unchanged, while `Display`
    ///   prefixes it with the step name and attempt count
    /// - [`WorkflowError::Timeout`] if the last attempt ran out of time
    ///
    /// # Examples
    ///
    /// ```
    /// use ayumi::prelude::*;
    ///
    /// # async fn demo(step: &WorkflowStep) -> Result<(), WorkflowError> {
    /// let options = StepOptions::new()
    ///     .with_retries(RetryPolicy::exponential(3, "10 second")?)
    ///     .with_timeout_expr("10 minutes")?;
    ///
    /// let _count = step
    ///     .run_with("scrape-contents", options, |_| async { Ok(12usize) })
    ///     .await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn run_with<T, F, Fut>(
        &self,
        name: impl Into<StepName>,
        options: StepOptions,
        body: F,
    ) -> Result<T, WorkflowError>
    where
        F: FnMut(Attempt) -> Fut + Send,
        Fut: Future<Output = anyhow::Result<T>> + Send,
        T: Send,
    {
        StepExecutor::new(&self.ledger)
            .run(name.into(), options, body)
            .await
    }

    /// Pauses the run and records it as a step.
    ///
    /// A sleep runs no caller logic, so it is never retried, never timed
    /// out, and ends `succeeded` unless the call itself is dropped.
    pub async fn sleep(&self, name: impl Into<StepName>, duration: impl Into<StepDuration>) {
        let name = name.into();
        let duration = duration.into();
        let index = self.ledger.begin_step(&name, StepKind::Sleep);
        let _open = OpenStep::new(&self.ledger, index);
        self.ledger.update(|run| run.start_attempt(index, 1));

        debug!("Step '{}' sleeping for {}", name, duration);
        tokio::time::sleep(duration.as_duration()).await;

        self.ledger.finish_step(index, StepStatus::Succeeded);
    }
}
