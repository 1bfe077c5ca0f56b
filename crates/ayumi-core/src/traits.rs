//! Seams for collaborators that consume run outcomes.

use crate::context::{EventId, RunContext, WorkflowId, WorkflowTrigger};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What is known about a run before its business method starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStart {
    /// Workflow being run.
    pub workflow_id: WorkflowId,
    /// Identifier of the triggering event.
    pub event_id: EventId,
    /// What caused the run.
    pub trigger: WorkflowTrigger,
    /// Event payload, serialised for storage.
    pub payload: serde_json::Value,
    /// When the run was requested.
    pub started_at: DateTime<Utc>,
}

/// Durable run history, written around each execution.
///
/// Failures are reported back to the caller but never change the outcome of
/// the run itself.
///
/// # Examples
///
/// ```
/// use ayumi_core::{RunContext, RunRecorder, RunStart};
/// use async_trait::async_trait;
///
/// struct LogRecorder;
///
/// #[async_trait]
/// impl RunRecorder for LogRecorder {
///     async fn run_started(&self, start: &RunStart) -> anyhow::Result<()> {
///         println!("started {} ({})", start.workflow_id, start.event_id);
///         Ok(())
///     }
///
///     async fn run_finished(&self, run: &RunContext) -> anyhow::Result<()> {
///         println!("{} finished: {}", run.event_id(), run.status());
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait RunRecorder: Send + Sync {
    /// Called before the business method runs.
    async fn run_started(&self, start: &RunStart) -> anyhow::Result<()>;

    /// Called with the finalised ledger, including every step record.
    async fn run_finished(&self, run: &RunContext) -> anyhow::Result<()>;
}
