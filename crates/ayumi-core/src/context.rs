//! Run inputs and the per-run ledger.

use crate::step::{StepKind, StepName, StepRecord, StepStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates an identifier from any string.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Returns the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self::new(s)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// Identifies a workflow definition, e.g. `"weixin-article-workflow"`.
    WorkflowId
);

string_id!(
    /// Identifies one run (the triggering event).
    EventId
);

impl EventId {
    /// Generates a random identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

/// What caused a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowTrigger {
    /// Fired by a schedule.
    Cron,
    /// Started by an operator.
    Manual,
    /// Started through the external API.
    Api,
}

impl fmt::Display for WorkflowTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkflowTrigger::Cron => "cron",
            WorkflowTrigger::Manual => "manual",
            WorkflowTrigger::Api => "api",
        };
        f.write_str(s)
    }
}

/// Input to one run. Immutable once created.
///
/// # Examples
///
/// ```
/// use ayumi_core::{WorkflowEvent, WorkflowTrigger};
///
/// let event = WorkflowEvent::new("run-1", 42u32).with_trigger(WorkflowTrigger::Manual);
/// assert_eq!(event.id().as_str(), "run-1");
/// assert_eq!(*event.payload(), 42);
/// assert_eq!(event.trigger(), Some(WorkflowTrigger::Manual));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowEvent<P> {
    id: EventId,
    payload: P,
    timestamp: DateTime<Utc>,
    trigger: Option<WorkflowTrigger>,
}

impl<P> WorkflowEvent<P> {
    /// Creates an event stamped with the current time.
    pub fn new(id: impl Into<EventId>, payload: P) -> Self {
        Self {
            id: id.into(),
            payload,
            timestamp: Utc::now(),
            trigger: None,
        }
    }

    /// Tags the event with what caused it.
    pub fn with_trigger(mut self, trigger: WorkflowTrigger) -> Self {
        self.trigger = Some(trigger);
        self
    }

    /// Overrides the creation timestamp.
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Event identifier.
    pub fn id(&self) -> &EventId {
        &self.id
    }

    /// Author-defined payload.
    pub fn payload(&self) -> &P {
        &self.payload
    }

    /// Creation time.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Trigger tag, if any.
    pub fn trigger(&self) -> Option<WorkflowTrigger> {
        self.trigger
    }
}

/// Overall state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// The business method has not returned yet.
    Running,
    /// The business method returned normally.
    Succeeded,
    /// An error other than a termination escaped the business method.
    Failed,
    /// A termination signal escaped the business method.
    Terminated,
}

impl RunStatus {
    /// Returns `true` once the run has settled.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
            RunStatus::Terminated => "terminated",
        };
        f.write_str(s)
    }
}

/// Ledger of one execution: its step records and overall status.
///
/// Owned by a single invocation while it runs; afterwards a frozen copy
/// lives in the metrics collector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunContext {
    workflow_id: WorkflowId,
    event_id: EventId,
    trigger: Option<WorkflowTrigger>,
    steps: Vec<StepRecord>,
    status: RunStatus,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    error: Option<String>,
}

impl RunContext {
    /// Opens a ledger in the `running` state.
    pub fn new(workflow_id: WorkflowId, event_id: EventId) -> Self {
        Self {
            workflow_id,
            event_id,
            trigger: None,
            steps: Vec::new(),
            status: RunStatus::Running,
            started_at: Utc::now(),
            finished_at: None,
            error: None,
        }
    }

    /// Records what triggered the run.
    pub fn with_trigger(mut self, trigger: Option<WorkflowTrigger>) -> Self {
        self.trigger = trigger;
        self
    }

    /// Workflow this run belongs to.
    pub fn workflow_id(&self) -> &WorkflowId {
        &self.workflow_id
    }

    /// Event that started this run.
    pub fn event_id(&self) -> &EventId {
        &self.event_id
    }

    /// Trigger tag of the event, if any.
    pub fn trigger(&self) -> Option<WorkflowTrigger> {
        self.trigger
    }

    /// Step records in call order.
    pub fn steps(&self) -> &[StepRecord] {
        &self.steps
    }

    /// Record at `index`.
    pub fn step(&self, index: usize) -> Option<&StepRecord> {
        self.steps.get(index)
    }

    /// Records with the given name, in call order.
    pub fn steps_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a StepRecord> + 'a {
        self.steps.iter().filter(move |s| s.name.as_str() == name)
    }

    /// Overall status.
    pub fn status(&self) -> RunStatus {
        self.status
    }

    /// When the run started.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// When the run settled.
    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    /// Failure message or termination reason.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Wall-clock milliseconds from start to settlement.
    pub fn duration_ms(&self) -> Option<u64> {
        let finished = self.finished_at?;
        let elapsed = (finished - self.started_at).num_milliseconds();
        Some(u64::try_from(elapsed).unwrap_or(0))
    }

    /// Appends a new `running` record and returns its index.
    pub fn begin_step(&mut self, name: StepName, kind: StepKind) -> usize {
        let index = self.steps.len();
        self.steps.push(StepRecord::new(name, index, kind));
        index
    }

    /// Notes that attempt `attempt` of the step at `index` has started.
    pub fn start_attempt(&mut self, index: usize, attempt: u32) {
        if let Some(record) = self.running_step_mut(index) {
            record.attempts = attempt;
        }
    }

    /// Stores the message of a failed attempt.
    pub fn record_attempt_error(&mut self, index: usize, message: impl Into<String>) {
        if let Some(record) = self.running_step_mut(index) {
            record.last_error = Some(message.into());
        }
    }

    /// Moves the step at `index` to a terminal status.
    ///
    /// Returns `false` if the record is missing, already terminal, or
    /// `status` is not terminal.
    pub fn finish_step(&mut self, index: usize, status: StepStatus) -> bool {
        if !status.is_terminal() {
            return false;
        }
        match self.running_step_mut(index) {
            Some(record) => {
                record.status = status;
                record.finished_at = Some(Utc::now());
                true
            }
            None => false,
        }
    }

    /// Settles the run. Has no effect once the run is terminal.
    pub fn finish(&mut self, status: RunStatus, error: Option<String>) {
        if self.status.is_terminal() || !status.is_terminal() {
            return;
        }
        self.status = status;
        self.error = error;
        self.finished_at = Some(Utc::now());
    }

    fn running_step_mut(&mut self, index: usize) -> Option<&mut StepRecord> {
        self.steps
            .get_mut(index)
            .filter(|record| !record.status.is_terminal())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger() -> RunContext {
        RunContext::new(WorkflowId::new("digest"), EventId::new("evt-1"))
    }

    #[test]
    fn test_same_name_gets_two_records() {
        let mut run = ledger();
        let first = run.begin_step(StepName::new("fetch"), StepKind::Task);
        let second = run.begin_step(StepName::new("fetch"), StepKind::Task);

        assert_eq!((first, second), (0, 1));
        assert_eq!(run.steps_named("fetch").count(), 2);
    }

    #[test]
    fn test_terminal_record_is_frozen() {
        let mut run = ledger();
        let index = run.begin_step(StepName::new("fetch"), StepKind::Task);
        run.start_attempt(index, 1);
        assert!(run.finish_step(index, StepStatus::Succeeded));

        run.start_attempt(index, 2);
        run.record_attempt_error(index, "late");
        assert!(!run.finish_step(index, StepStatus::Failed));

        let record = run.step(index).expect("record exists");
        assert_eq!(record.attempts, 1);
        assert_eq!(record.status, StepStatus::Succeeded);
        assert_eq!(record.last_error, None);
    }

    #[test]
    fn test_finish_once() {
        let mut run = ledger();
        run.finish(RunStatus::Running, None);
        assert_eq!(run.status(), RunStatus::Running);

        run.finish(RunStatus::Terminated, Some("no sources configured".into()));
        run.finish(RunStatus::Succeeded, None);
        assert_eq!(run.status(), RunStatus::Terminated);
        assert_eq!(run.error(), Some("no sources configured"));
        assert!(run.duration_ms().is_some());
    }

    #[test]
    fn test_serialized_shape() {
        let mut run = ledger().with_trigger(Some(WorkflowTrigger::Cron));
        let index = run.begin_step(StepName::new("pause"), StepKind::Sleep);
        run.finish_step(index, StepStatus::Succeeded);
        run.finish(RunStatus::Succeeded, None);

        let value = serde_json::to_value(&run).expect("serialise");
        assert_eq!(value["workflow_id"], "digest");
        assert_eq!(value["trigger"], "cron");
        assert_eq!(value["status"], "succeeded");
        assert_eq!(value["steps"][0]["kind"], "sleep");
    }

    #[test]
    fn test_generated_event_ids_differ() {
        assert_ne!(EventId::generate(), EventId::generate());
    }
}
