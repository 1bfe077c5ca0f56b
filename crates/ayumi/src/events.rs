//! Live relay of run and step progress.
//!
//! Built on `tokio::sync::broadcast`. Publishing with no subscribers is a
//! no-op, and a slow subscriber only loses its own backlog.

use ayumi_core::{EventId, RunStatus, StepName, StepRecord, WorkflowId, WorkflowTrigger};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::broadcast;

/// One progress notification.
#[derive(Debug, Clone, Serialize)]
pub struct RunEvent {
    /// Workflow the run belongs to.
    pub workflow_id: WorkflowId,
    /// Run the event is about.
    pub event_id: EventId,
    /// When the event was published.
    pub timestamp: DateTime<Utc>,
    /// What happened.
    #[serde(flatten)]
    pub kind: RunEventKind,
}

/// What a [`RunEvent`] reports.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEventKind {
    /// `execute()` allocated a ledger.
    RunStarted {
        /// Trigger tag of the event.
        trigger: Option<WorkflowTrigger>,
    },
    /// A step record was opened.
    StepStarted {
        /// Step name.
        name: StepName,
        /// Position in call order.
        index: usize,
    },
    /// An attempt failed and another one is scheduled.
    StepRetrying {
        /// Step name.
        name: StepName,
        /// Position in call order.
        index: usize,
        /// Attempt that just failed.
        attempt: u32,
        /// Wait before the next attempt, in milliseconds.
        #[serde(serialize_with = "serialize_millis")]
        delay: Duration,
        /// Failure message.
        error: String,
    },
    /// A step reached a terminal status.
    StepFinished {
        /// The frozen record.
        record: StepRecord,
    },
    /// The run settled.
    RunFinished {
        /// Final status.
        status: RunStatus,
        /// Failure message or termination reason.
        error: Option<String>,
    },
}

fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

/// Multi-consumer progress bus shared by every entry point of an engine.
///
/// Cloning the bus clones the sender.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<RunEvent>,
}

impl EventBus {
    /// Creates a bus that buffers up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Receives every event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.sender.subscribe()
    }

    /// Publishes to all current subscribers.
    pub fn publish(&self, event: RunEvent) {
        let _ = self.sender.send(event);
    }

    /// Number of live subscribers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("receiver_count", &self.sender.receiver_count())
            .finish()
    }
}

/// Receives only the events of one workflow.
pub struct WorkflowSubscription {
    workflow_id: WorkflowId,
    receiver: broadcast::Receiver<RunEvent>,
}

impl WorkflowSubscription {
    /// Subscribes to `bus`, keeping events for `workflow_id`.
    pub fn new(bus: &EventBus, workflow_id: impl Into<WorkflowId>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            receiver: bus.subscribe(),
        }
    }

    /// Next matching event, or `None` once the bus is gone.
    ///
    /// Lagged events are skipped.
    pub async fn recv(&mut self) -> Option<RunEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if event.workflow_id == self.workflow_id => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(
                        "Subscription for '{}' lagged, {} events skipped",
                        self.workflow_id,
                        skipped
                    );
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(workflow: &str, kind: RunEventKind) -> RunEvent {
        RunEvent {
            workflow_id: WorkflowId::new(workflow),
            event_id: EventId::new("evt"),
            timestamp: Utc::now(),
            kind,
        }
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let bus = EventBus::new(8);
        bus.publish(event("a", RunEventKind::RunStarted { trigger: None }));
        assert_eq!(bus.receiver_count(), 0);
    }

    #[tokio::test]
    async fn test_subscription_filters_by_workflow() {
        let bus = EventBus::new(8);
        let mut sub = WorkflowSubscription::new(&bus, "digest");

        bus.publish(event("other", RunEventKind::RunStarted { trigger: None }));
        bus.publish(event(
            "digest",
            RunEventKind::RunFinished {
                status: RunStatus::Succeeded,
                error: None,
            },
        ));

        let received = sub.recv().await.expect("event delivered");
        assert_eq!(received.workflow_id.as_str(), "digest");
        assert!(matches!(received.kind, RunEventKind::RunFinished { .. }));
    }

    #[test]
    fn test_serialized_shape() {
        let value = serde_json::to_value(event(
            "digest",
            RunEventKind::StepRetrying {
                name: StepName::new("scrape"),
                index: 2,
                attempt: 1,
                delay: Duration::from_secs(10),
                error: "boom".into(),
            },
        ))
        .expect("serialise");

        assert_eq!(value["type"], "step_retrying");
        assert_eq!(value["workflow_id"], "digest");
        assert_eq!(value["delay"], 10_000);
        assert_eq!(value["name"], "scrape");
    }
}
