//! Retry, backoff and timeout state machine for a single step.

use crate::events::{EventBus, RunEvent, RunEventKind};
use ayumi_core::{
    EventId, RunContext, StepKind, StepName, StepOptions, StepStatus, Termination, WorkflowError,
    WorkflowId,
};
use chrono::Utc;
use parking_lot::Mutex;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

/// Handed to a step body at the start of every attempt.
///
/// The token is cancelled when the attempt is abandoned (timeout, or the
/// step itself being dropped). The attempt's future is dropped at that
/// point, so the token only matters for work the body moved elsewhere,
/// such as spawned tasks.
#[derive(Debug, Clone)]
pub struct Attempt {
    number: u32,
    token: CancellationToken,
}

impl Attempt {
    /// 1-based attempt number.
    pub fn number(&self) -> u32 {
        self.number
    }

    /// Cancellation token for this attempt.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Returns `true` once the engine has stopped waiting on this attempt.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Shared handle to one run's ledger plus its relay.
pub(crate) struct RunLedger {
    workflow_id: WorkflowId,
    event_id: EventId,
    context: Mutex<RunContext>,
    events: Option<EventBus>,
}

impl RunLedger {
    pub(crate) fn new(context: RunContext, events: Option<EventBus>) -> Self {
        Self {
            workflow_id: context.workflow_id().clone(),
            event_id: context.event_id().clone(),
            context: Mutex::new(context),
            events,
        }
    }

    pub(crate) fn workflow_id(&self) -> &WorkflowId {
        &self.workflow_id
    }

    pub(crate) fn event_id(&self) -> &EventId {
        &self.event_id
    }

    pub(crate) fn update<R>(&self, f: impl FnOnce(&mut RunContext) -> R) -> R {
        f(&mut self.context.lock())
    }

    pub(crate) fn snapshot(&self) -> RunContext {
        self.context.lock().clone()
    }

    pub(crate) fn into_context(self) -> RunContext {
        self.context.into_inner()
    }

    pub(crate) fn publish(&self, kind: RunEventKind) {
        if let Some(bus) = &self.events {
            bus.publish(RunEvent {
                workflow_id: self.workflow_id.clone(),
                event_id: self.event_id.clone(),
                timestamp: Utc::now(),
                kind,
            });
        }
    }

    pub(crate) fn begin_step(&self, name: &StepName, kind: StepKind) -> usize {
        let index = self.update(|run| run.begin_step(name.clone(), kind));
        self.publish(RunEventKind::StepStarted {
            name: name.clone(),
            index,
        });
        index
    }

    pub(crate) fn finish_step(&self, index: usize, status: StepStatus) {
        let record = self.update(|run| {
            run.finish_step(index, status)
                .then(|| run.step(index).cloned())
                .flatten()
        });
        if let Some(record) = record {
            self.publish(RunEventKind::StepFinished { record });
        }
    }

    /// Fails a record whose call was dropped before it settled.
    pub(crate) fn abandon_step(&self, index: usize) {
        let record = self.update(|run| {
            // Both calls are no-ops once the record is terminal.
            run.record_attempt_error(index, "abandoned");
            run.finish_step(index, StepStatus::Failed)
                .then(|| run.step(index).cloned())
                .flatten()
        });
        if let Some(record) = record {
            warn!("Step '{}' abandoned before it settled", record.name);
            self.publish(RunEventKind::StepFinished { record });
        }
    }
}

/// Keeps a step record from outliving its call in the `running` state.
pub(crate) struct OpenStep<'a> {
    ledger: &'a RunLedger,
    index: usize,
}

impl<'a> OpenStep<'a> {
    pub(crate) fn new(ledger: &'a RunLedger, index: usize) -> Self {
        Self { ledger, index }
    }
}

impl Drop for OpenStep<'_> {
    fn drop(&mut self) {
        self.ledger.abandon_step(self.index);
    }
}

enum AttemptFailure {
    Error(anyhow::Error),
    TimedOut(Duration),
}

impl AttemptFailure {
    fn message(&self) -> String {
        match self {
            AttemptFailure::Error(err) => format!("{err:#}"),
            AttemptFailure::TimedOut(limit) => format!("attempt timed out after {limit:?}"),
        }
    }

    fn into_error(self, step_name: StepName, attempts: u32) -> WorkflowError {
        match self {
            AttemptFailure::Error(source) => WorkflowError::StepFailed {
                step_name,
                attempts,
                source,
            },
            AttemptFailure::TimedOut(timeout) => WorkflowError::Timeout {
                step_name,
                timeout,
                attempts,
            },
        }
    }
}

enum AttemptOutcome<T> {
    Succeeded(T),
    Terminated(Termination),
    Failed(AttemptFailure),
}

/// Drives one `step.run` call to a terminal state.
pub(crate) struct StepExecutor<'a> {
    ledger: &'a RunLedger,
}

impl<'a> StepExecutor<'a> {
    pub(crate) fn new(ledger: &'a RunLedger) -> Self {
        Self { ledger }
    }

    pub(crate) async fn run<T, F, Fut>(
        &self,
        name: StepName,
        options: StepOptions,
        body: F,
    ) -> Result<T, WorkflowError>
    where
        F: FnMut(Attempt) -> Fut + Send,
        Fut: Future<Output = anyhow::Result<T>> + Send,
        T: Send,
    {
        let index = self.ledger.begin_step(&name, StepKind::Task);
        let _open = OpenStep::new(self.ledger, index);
        let span = info_span!("step", step = %name, index);
        self.drive(name, index, options, body).instrument(span).await
    }

    async fn drive<T, F, Fut>(
        &self,
        name: StepName,
        index: usize,
        options: StepOptions,
        mut body: F,
    ) -> Result<T, WorkflowError>
    where
        F: FnMut(Attempt) -> Fut + Send,
        Fut: Future<Output = anyhow::Result<T>> + Send,
        T: Send,
    {
        let policy = options.retry_policy();
        let limit = policy.limit();
        let timeout = options.timeout_duration();
        let mut attempt: u32 = 1;

        loop {
            self.ledger.update(|run| run.start_attempt(index, attempt));

            let failure = match run_attempt(&mut body, attempt, timeout).await {
                AttemptOutcome::Succeeded(value) => {
                    self.ledger.finish_step(index, StepStatus::Succeeded);
                    info!("Step '{}' completed successfully", name);
                    return Ok(value);
                }
                AttemptOutcome::Terminated(signal) => {
                    self.ledger.update(|run| {
                        run.record_attempt_error(index, signal.reason().to_string())
                    });
                    self.ledger.finish_step(index, StepStatus::Terminated);
                    warn!("Step '{}' terminated: {}", name, signal.reason());
                    return Err(WorkflowError::Terminated(signal));
                }
                AttemptOutcome::Failed(failure) => failure,
            };

            let message = failure.message();
            self.ledger
                .update(|run| run.record_attempt_error(index, message.clone()));

            if attempt >= limit {
                self.ledger.finish_step(index, StepStatus::Failed);
                warn!(
                    "Step '{}' failed after {} attempt(s): {}",
                    name, attempt, message
                );
                return Err(failure.into_error(name, attempt));
            }

            let delay = policy.delay_for(attempt);
            info!(
                "Step '{}' failed ({}), retrying ({}/{}) in {:?}",
                name,
                message,
                attempt + 1,
                limit,
                delay
            );
            self.ledger.publish(RunEventKind::StepRetrying {
                name: name.clone(),
                index,
                attempt,
                delay,
                error: message,
            });
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            attempt += 1;
        }
    }
}

async fn run_attempt<T, F, Fut>(
    body: &mut F,
    number: u32,
    timeout: Option<Duration>,
) -> AttemptOutcome<T>
where
    F: FnMut(Attempt) -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let token = CancellationToken::new();
    let guard = token.clone().drop_guard();
    let future = body(Attempt { number, token });

    let result = match timeout {
        Some(limit) => match tokio::time::timeout(limit, future).await {
            Ok(result) => result,
            // Dropping the guard cancels the attempt's token.
            Err(_) => return AttemptOutcome::Failed(AttemptFailure::TimedOut(limit)),
        },
        None => future.await,
    };
    let _ = guard.disarm();

    match result {
        Ok(value) => AttemptOutcome::Succeeded(value),
        Err(err) => match Termination::find(&err) {
            Some(signal) => AttemptOutcome::Terminated(signal.clone()),
            None => AttemptOutcome::Failed(AttemptFailure::Error(err)),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ayumi_core::{RetryPolicy, StepDuration};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;

    fn ledger() -> RunLedger {
        RunLedger::new(
            RunContext::new(WorkflowId::new("wf"), EventId::new("evt")),
            None,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_first_attempt() {
        let ledger = ledger();
        let started = Instant::now();

        let value = StepExecutor::new(&ledger)
            .run(StepName::new("y"), StepOptions::new(), |_| async { Ok("ok") })
            .await
            .expect("step succeeds");

        assert_eq!(value, "ok");
        assert_eq!(started.elapsed(), Duration::ZERO);
        let run = ledger.snapshot();
        assert_eq!(run.steps()[0].attempts, 1);
        assert_eq!(run.steps()[0].status, StepStatus::Succeeded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_exactly_limit_attempts() {
        let ledger = ledger();
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::exponential(4, "1 second").expect("policy");
        let options = StepOptions::new().with_retries(policy);
        let started = Instant::now();

        let counter = calls.clone();
        let err = StepExecutor::new(&ledger)
            .run(StepName::new("x"), options, move |attempt| {
                counter.fetch_add(1, Ordering::SeqCst);
                async move { Err::<(), _>(anyhow::anyhow!("attempt {} failed", attempt.number())) }
            })
            .await
            .expect_err("step fails");

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        // 1 + 2 + 4 seconds, nothing after the last attempt.
        assert_eq!(started.elapsed(), Duration::from_secs(7));
        assert_eq!(err.attempts(), Some(4));
        assert!(matches!(
            &err,
            WorkflowError::StepFailed { source, .. } if source.to_string() == "attempt 4 failed"
        ));
        let snapshot = ledger.snapshot();
        let record = &snapshot.steps()[0];
        assert_eq!(record.status, StepStatus::Failed);
        assert_eq!(record.last_error.as_deref(), Some("attempt 4 failed"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_failures() {
        let ledger = ledger();
        let options = StepOptions::new().with_retries(
            RetryPolicy::new(5, StepDuration::from_millis(10), ayumi_core::BackoffStrategy::None)
                .expect("policy"),
        );

        let value = StepExecutor::new(&ledger)
            .run(StepName::new("flaky"), options, |attempt| async move {
                if attempt.number() < 3 {
                    anyhow::bail!("not yet");
                }
                Ok(attempt.number())
            })
            .await
            .expect("third attempt succeeds");

        assert_eq!(value, 3);
        let snapshot = ledger.snapshot();
        let record = &snapshot.steps()[0];
        assert_eq!(record.attempts, 3);
        assert_eq!(record.status, StepStatus::Succeeded);
        assert_eq!(record.last_error.as_deref(), Some("not yet"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_termination_skips_retries() {
        let ledger = ledger();
        let calls = Arc::new(AtomicU32::new(0));
        let options =
            StepOptions::new().with_retries(RetryPolicy::linear(5, "1 minute").expect("policy"));
        let started = Instant::now();

        let counter = calls.clone();
        let err = StepExecutor::new(&ledger)
            .run(StepName::new("validate"), options, move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(anyhow::Error::new(Termination::new("ip not whitelisted"))) }
            })
            .await
            .expect_err("step terminates");

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
        assert_eq!(
            err.termination().map(Termination::reason),
            Some("ip not whitelisted")
        );
        let snapshot = ledger.snapshot();
        let record = &snapshot.steps()[0];
        assert_eq!(record.status, StepStatus::Terminated);
        assert_eq!(record.attempts, 1);
    }

    async fn require_sources(configured: bool) -> Result<usize, WorkflowError> {
        if !configured {
            return Err(Termination::new("precondition unmet").into());
        }
        Ok(3)
    }

    #[tokio::test(start_paused = true)]
    async fn test_termination_from_workflow_error_skips_retries() {
        let ledger = ledger();
        let calls = Arc::new(AtomicU32::new(0));
        let options =
            StepOptions::new().with_retries(RetryPolicy::linear(3, "1 second").expect("policy"));

        let counter = calls.clone();
        let err = StepExecutor::new(&ledger)
            .run(StepName::new("guarded"), options, move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { anyhow::Ok(require_sources(false).await?) }
            })
            .await
            .expect_err("step terminates");

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(err.is_termination());
        let snapshot = ledger.snapshot();
        let record = &snapshot.steps()[0];
        assert_eq!(record.status, StepStatus::Terminated);
        assert_eq!(record.last_error.as_deref(), Some("precondition unmet"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_call_fails_record() {
        let ledger = ledger();
        let outcome = tokio::time::timeout(
            Duration::from_secs(1),
            StepExecutor::new(&ledger).run(StepName::new("slow"), StepOptions::new(), |_| {
                std::future::pending::<anyhow::Result<()>>()
            }),
        )
        .await;

        assert!(outcome.is_err());
        let snapshot = ledger.snapshot();
        let record = &snapshot.steps()[0];
        assert_eq!(record.status, StepStatus::Failed);
        assert_eq!(record.last_error.as_deref(), Some("abandoned"));
        assert!(record.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_settled_record_untouched_by_guard() {
        let ledger = ledger();
        StepExecutor::new(&ledger)
            .run(StepName::new("quick"), StepOptions::new(), |_| async { Ok(()) })
            .await
            .expect("step succeeds");

        let snapshot = ledger.snapshot();
        let record = &snapshot.steps()[0];
        assert_eq!(record.status, StepStatus::Succeeded);
        assert!(record.last_error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_cancels_token() {
        let ledger = ledger();
        let tokens = Arc::new(Mutex::new(Vec::new()));
        let options = StepOptions::new().with_timeout(Duration::from_millis(50));

        let seen = tokens.clone();
        let err = StepExecutor::new(&ledger)
            .run(StepName::new("slow"), options, move |attempt| {
                seen.lock().push(attempt.token().clone());
                async {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    Ok(())
                }
            })
            .await
            .expect_err("step times out");

        assert!(err.is_timeout());
        let tokens = tokens.lock();
        assert_eq!(tokens.len(), 1);
        assert!(tokens[0].is_cancelled());
    }

    #[tokio::test]
    async fn test_success_leaves_token_live() {
        let ledger = ledger();
        let token = StepExecutor::new(&ledger)
            .run(StepName::new("quick"), StepOptions::new(), |attempt| async move {
                Ok(attempt.token().clone())
            })
            .await
            .expect("step succeeds");
        assert!(!token.is_cancelled());
    }
}
