//! Process-local store of finalised run ledgers.

use ayumi_core::{EventId, RunContext, RunStatus, WorkflowId};
use dashmap::DashMap;
use indexmap::IndexMap;
use serde::Serialize;

/// Finalised ledgers keyed by workflow id, then event id.
///
/// Construct one per process and share it (behind an `Arc`) with every
/// entry point. Inserts from concurrent runs only contend on the shard of
/// their own workflow id. Within a workflow, runs are kept in the order they
/// were recorded; with a retention limit the oldest are evicted first.
///
/// # Examples
///
/// ```
/// use ayumi::MetricsCollector;
/// use ayumi_core::{EventId, RunContext, RunStatus, WorkflowId};
///
/// let metrics = MetricsCollector::new();
/// let mut run = RunContext::new(WorkflowId::new("digest"), EventId::new("evt-1"));
/// run.finish(RunStatus::Succeeded, None);
/// metrics.record(run);
///
/// let stored = metrics.get_workflow_event_metrics("digest", "evt-1").unwrap();
/// assert_eq!(stored.status(), RunStatus::Succeeded);
/// assert!(metrics.get_workflow_event_metrics("digest", "evt-2").is_none());
/// ```
#[derive(Debug, Default)]
pub struct MetricsCollector {
    runs: DashMap<WorkflowId, IndexMap<EventId, RunContext>>,
    retention: Option<usize>,
}

/// Aggregate outcome counts for one workflow.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkflowStats {
    /// Runs that ended `succeeded`.
    pub succeeded: usize,
    /// Runs that ended `failed`.
    pub failed: usize,
    /// Runs that ended `terminated`.
    pub terminated: usize,
    /// Mean wall-clock duration of settled runs.
    pub average_duration_ms: u64,
    /// Duration of the most recently recorded run.
    pub last_duration_ms: Option<u64>,
}

impl MetricsCollector {
    /// Creates an unbounded collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a collector that keeps at most `max_runs` runs per workflow.
    pub fn with_retention(max_runs: usize) -> Self {
        Self {
            runs: DashMap::new(),
            retention: Some(max_runs.max(1)),
        }
    }

    /// Stores a ledger under its own workflow and event ids.
    ///
    /// Recording the same event id again replaces the earlier ledger and
    /// counts as the most recent run.
    pub fn record(&self, run: RunContext) {
        let mut runs = self.runs.entry(run.workflow_id().clone()).or_default();
        runs.shift_remove(run.event_id());
        runs.insert(run.event_id().clone(), run);

        if let Some(max) = self.retention {
            while runs.len() > max {
                runs.shift_remove_index(0);
            }
        }
    }

    /// Ledger of one run, if it has been recorded.
    pub fn get_workflow_event_metrics(
        &self,
        workflow_id: &str,
        event_id: &str,
    ) -> Option<RunContext> {
        self.runs
            .get(workflow_id)
            .and_then(|runs| runs.get(event_id).cloned())
    }

    /// Every recorded run of a workflow, oldest first.
    pub fn get_all_workflow_event_metrics(
        &self,
        workflow_id: &str,
    ) -> IndexMap<EventId, RunContext> {
        self.runs
            .get(workflow_id)
            .map(|runs| runs.clone())
            .unwrap_or_default()
    }

    /// Outcome counts and durations for a workflow.
    pub fn stats(&self, workflow_id: &str) -> WorkflowStats {
        let Some(runs) = self.runs.get(workflow_id) else {
            return WorkflowStats::default();
        };

        let mut stats = WorkflowStats::default();
        let mut total_ms: u64 = 0;
        let mut timed: u64 = 0;
        for run in runs.values() {
            match run.status() {
                RunStatus::Succeeded => stats.succeeded += 1,
                RunStatus::Failed => stats.failed += 1,
                RunStatus::Terminated => stats.terminated += 1,
                RunStatus::Running => {}
            }
            if let Some(ms) = run.duration_ms() {
                total_ms = total_ms.saturating_add(ms);
                timed += 1;
            }
        }
        if timed > 0 {
            stats.average_duration_ms = total_ms / timed;
        }
        stats.last_duration_ms = runs.values().last().and_then(RunContext::duration_ms);
        stats
    }

    /// Ids of every workflow with at least one recorded run.
    pub fn workflow_ids(&self) -> Vec<WorkflowId> {
        self.runs.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Drops every run of a workflow and returns how many were removed.
    pub fn clear_workflow(&self, workflow_id: &str) -> usize {
        self.runs
            .remove(workflow_id)
            .map(|(_, runs)| runs.len())
            .unwrap_or(0)
    }
}
