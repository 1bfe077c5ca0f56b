//! Workflow entry point: runs a business method against a fresh ledger.

use crate::events::{EventBus, RunEvent, RunEventKind};
use crate::executor::RunLedger;
use crate::metrics::MetricsCollector;
use crate::step::WorkflowStep;
use async_trait::async_trait;
use ayumi_core::{EventId, RunContext, RunStatus, WorkflowError, WorkflowEvent, WorkflowId};
use chrono::Utc;
use indexmap::IndexMap;
use std::fmt;
use std::sync::Arc;
use tracing::{info, info_span, warn, Instrument};

/// Business logic of a workflow.
///
/// Implementations call [`WorkflowStep::run_with`] and
/// [`WorkflowStep::sleep`] for every unit of work they want recorded, and
/// may return a [`Termination`](ayumi_core::Termination) to stop the run
/// early.
///
/// # Examples
///
/// ```
/// use ayumi::prelude::*;
/// use async_trait::async_trait;
///
/// struct Greeter;
///
/// #[async_trait]
/// impl Workflow for Greeter {
///     type Params = String;
///     type Output = String;
///
///     async fn run(
///         &self,
///         event: &WorkflowEvent<String>,
///         step: &WorkflowStep,
///     ) -> Result<String, WorkflowError> {
///         let name = event.payload().clone();
///         step.run("greet", move |_| {
///             let name = name.clone();
///             async move { Ok(format!("hello, {name}")) }
///         })
///         .await
///     }
/// }
/// ```
#[async_trait]
pub trait Workflow: Send + Sync {
    /// Event payload.
    type Params: Send + Sync;
    /// Value returned by a successful run.
    type Output: Send;

    /// Runs one event through the workflow.
    async fn run(
        &self,
        event: &WorkflowEvent<Self::Params>,
        step: &WorkflowStep,
    ) -> Result<Self::Output, WorkflowError>;
}

/// Binds a [`Workflow`] to its id and the shared metrics store.
///
/// One entry point can execute any number of events concurrently; every
/// execution gets its own ledger.
pub struct WorkflowEntrypoint<W> {
    id: WorkflowId,
    workflow: W,
    metrics: Arc<MetricsCollector>,
    events: Option<EventBus>,
}

impl<W> fmt::Debug for WorkflowEntrypoint<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowEntrypoint")
            .field("id", &self.id)
            .field("relay", &self.events.is_some())
            .finish()
    }
}

impl<W: Workflow> WorkflowEntrypoint<W> {
    /// Creates an entry point that records into `metrics`.
    pub fn new(
        id: impl Into<WorkflowId>,
        workflow: W,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            id: id.into(),
            workflow,
            metrics,
            events: None,
        }
    }

    /// Publishes step progress to `bus`.
    pub fn with_events(mut self, bus: EventBus) -> Self {
        self.events = Some(bus);
        self
    }

    /// Workflow id this entry point records under.
    pub fn id(&self) -> &WorkflowId {
        &self.id
    }

    /// The wrapped business logic.
    pub fn workflow(&self) -> &W {
        &self.workflow
    }

    /// The metrics store runs are recorded into.
    pub fn metrics_collector(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    /// Runs `event` through the workflow and records the finalised ledger.
    ///
    /// The ledger is recorded whatever the outcome, before this returns.
    ///
    /// # Errors
    ///
    /// Returns the business method's error unchanged, after recording it.
    pub async fn execute(
        &self,
        event: WorkflowEvent<W::Params>,
    ) -> Result<W::Output, WorkflowError> {
        self.execute_recorded(event).await.0
    }

    /// Like [`execute`](Self::execute), also handing back the ledger.
    pub(crate) async fn execute_recorded(
        &self,
        event: WorkflowEvent<W::Params>,
    ) -> (Result<W::Output, WorkflowError>, RunContext) {
        let context =
            RunContext::new(self.id.clone(), event.id().clone()).with_trigger(event.trigger());
        let step = WorkflowStep::new(RunLedger::new(context, self.events.clone()));
        step.publish(RunEventKind::RunStarted {
            trigger: event.trigger(),
        });

        let span = info_span!(
            "workflow_run",
            workflow_id = %self.id,
            event_id = %event.id()
        );
        let result = async {
            info!("Workflow '{}' started for event '{}'", self.id, event.id());
            self.workflow.run(&event, &step).await
        }
        .instrument(span)
        .await;

        let (status, error) = match &result {
            Ok(_) => (RunStatus::Succeeded, None),
            Err(err) => match err.termination() {
                Some(termination) => (
                    RunStatus::Terminated,
                    Some(termination.reason().to_string()),
                ),
                None => (RunStatus::Failed, Some(format!("{err:#}"))),
            },
        };

        match (&status, &error) {
            (RunStatus::Succeeded, _) => {
                info!("Workflow '{}' completed for event '{}'", self.id, event.id())
            }
            (_, Some(message)) => warn!(
                "Workflow '{}' {} for event '{}': {}",
                self.id,
                status,
                event.id(),
                message
            ),
            (_, None) => {}
        }

        let mut run = step.into_context();
        run.finish(status, error.clone());
        self.metrics.record(run.clone());

        if let Some(bus) = &self.events {
            bus.publish(RunEvent {
                workflow_id: self.id.clone(),
                event_id: event.id().clone(),
                timestamp: Utc::now(),
                kind: RunEventKind::RunFinished { status, error },
            });
        }

        (result, run)
    }

    /// Ledger of one past run of this workflow.
    pub fn event_metrics(&self, event_id: &str) -> Option<RunContext> {
        self.metrics
            .get_workflow_event_metrics(self.id.as_str(), event_id)
    }

    /// Every recorded run of this workflow, oldest first.
    pub fn all_event_metrics(&self) -> IndexMap<EventId, RunContext> {
        self.metrics.get_all_workflow_event_metrics(self.id.as_str())
    }
}
