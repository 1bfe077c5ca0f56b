//! Drives an entry point while keeping a durable run history.

use crate::workflow::{Workflow, WorkflowEntrypoint};
use ayumi_core::{EventId, RunRecorder, RunStart, WorkflowError, WorkflowEvent, WorkflowTrigger};
use chrono::Utc;
use serde::Serialize;
use tracing::warn;

/// Wraps [`WorkflowEntrypoint::execute`] with calls to a [`RunRecorder`].
///
/// Recorder failures are logged and otherwise ignored: the caller always
/// gets the run's own outcome.
#[derive(Debug)]
pub struct WorkflowRunner<R> {
    recorder: R,
}

impl<R: RunRecorder> WorkflowRunner<R> {
    /// Creates a runner around `recorder`.
    pub fn new(recorder: R) -> Self {
        Self { recorder }
    }

    /// The wrapped recorder.
    pub fn recorder(&self) -> &R {
        &self.recorder
    }

    /// Starts a new run with a generated event id.
    ///
    /// # Errors
    ///
    /// Returns whatever [`WorkflowEntrypoint::execute`] returned.
    pub async fn trigger<W>(
        &self,
        entrypoint: &WorkflowEntrypoint<W>,
        trigger: WorkflowTrigger,
        payload: W::Params,
    ) -> Result<W::Output, WorkflowError>
    where
        W: Workflow,
        W::Params: Serialize,
    {
        let event = WorkflowEvent::new(EventId::generate(), payload).with_trigger(trigger);
        self.run(entrypoint, event).await
    }

    /// Records the start, executes `event`, then records the finalised ledger.
    ///
    /// Events without a trigger tag are recorded as manual runs.
    ///
    /// # Errors
    ///
    /// Returns whatever [`WorkflowEntrypoint::execute`] returned.
    pub async fn run<W>(
        &self,
        entrypoint: &WorkflowEntrypoint<W>,
        event: WorkflowEvent<W::Params>,
    ) -> Result<W::Output, WorkflowError>
    where
        W: Workflow,
        W::Params: Serialize,
    {
        let payload = serde_json::to_value(event.payload()).unwrap_or_else(|err| {
            warn!(
                "Payload of event '{}' is not serialisable, storing null: {}",
                event.id(),
                err
            );
            serde_json::Value::Null
        });
        let start = RunStart {
            workflow_id: entrypoint.id().clone(),
            event_id: event.id().clone(),
            trigger: event.trigger().unwrap_or(WorkflowTrigger::Manual),
            payload,
            started_at: Utc::now(),
        };
        if let Err(err) = self.recorder.run_started(&start).await {
            warn!(
                "Failed to record start of run '{}' ({}): {:#}",
                start.event_id, start.workflow_id, err
            );
        }

        let (result, run) = entrypoint.execute_recorded(event).await;

        if let Err(err) = self.recorder.run_finished(&run).await {
            warn!(
                "Failed to record end of run '{}' ({}): {:#}",
                run.event_id(),
                run.workflow_id(),
                err
            );
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricsCollector;
    use crate::step::WorkflowStep;
    use async_trait::async_trait;
    use ayumi_core::{RunContext, RunStatus};
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Default)]
    struct MemoryRecorder {
        started: Mutex<Vec<RunStart>>,
        finished: Mutex<Vec<RunContext>>,
        fail: bool,
    }

    #[async_trait]
    impl RunRecorder for MemoryRecorder {
        async fn run_started(&self, start: &RunStart) -> anyhow::Result<()> {
            if self.fail {
                anyhow::bail!("database unavailable");
            }
            self.started.lock().push(start.clone());
            Ok(())
        }

        async fn run_finished(&self, run: &RunContext) -> anyhow::Result<()> {
            if self.fail {
                anyhow::bail!("database unavailable");
            }
            self.finished.lock().push(run.clone());
            Ok(())
        }
    }

    struct Flaky;

    #[async_trait]
    impl Workflow for Flaky {
        type Params = Vec<String>;
        type Output = usize;

        async fn run(
            &self,
            event: &WorkflowEvent<Vec<String>>,
            step: &WorkflowStep,
        ) -> Result<usize, WorkflowError> {
            let urls = event.payload().len();
            step.run("count", move |_| async move {
                if urls == 0 {
                    anyhow::bail!("no urls");
                }
                Ok(urls)
            })
            .await
        }
    }

    fn entrypoint() -> WorkflowEntrypoint<Flaky> {
        WorkflowEntrypoint::new("flaky", Flaky, Arc::new(MetricsCollector::new()))
    }

    #[tokio::test]
    async fn test_records_start_and_finish() {
        let runner = WorkflowRunner::new(MemoryRecorder::default());
        let entry = entrypoint();

        let out = runner
            .trigger(&entry, WorkflowTrigger::Cron, vec!["a".into(), "b".into()])
            .await
            .expect("run succeeds");
        assert_eq!(out, 2);

        let started = runner.recorder().started.lock().clone();
        let finished = runner.recorder().finished.lock().clone();
        assert_eq!(started.len(), 1);
        assert_eq!(started[0].trigger, WorkflowTrigger::Cron);
        assert_eq!(started[0].payload, serde_json::json!(["a", "b"]));
        assert_eq!(finished[0].event_id(), &started[0].event_id);
        assert_eq!(finished[0].status(), RunStatus::Succeeded);
        assert_eq!(finished[0].steps().len(), 1);
    }

    #[tokio::test]
    async fn test_failure_is_recorded_and_reraised() {
        let runner = WorkflowRunner::new(MemoryRecorder::default());
        let entry = entrypoint();

        let err = runner
            .run(&entry, WorkflowEvent::new("evt-empty", Vec::new()))
            .await
            .expect_err("no urls");
        assert_eq!(err.attempts(), Some(1));

        let finished = runner.recorder().finished.lock().clone();
        assert_eq!(finished[0].status(), RunStatus::Failed);
        assert_eq!(
            runner.recorder().started.lock()[0].trigger,
            WorkflowTrigger::Manual
        );
        assert!(entry.event_metrics("evt-empty").is_some());
    }

    #[tokio::test]
    async fn test_recorder_errors_do_not_mask_outcome() {
        let runner = WorkflowRunner::new(MemoryRecorder {
            fail: true,
            ..Default::default()
        });
        let entry = entrypoint();

        let out = runner
            .trigger(&entry, WorkflowTrigger::Api, vec!["a".into()])
            .await;
        assert_eq!(out.ok(), Some(1));
        assert_eq!(entry.all_event_metrics().len(), 1);
    }
}
