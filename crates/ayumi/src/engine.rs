//! Owns the shared metrics store and relay, and hands out entry points.

use crate::config::EngineConfig;
use crate::events::{EventBus, WorkflowSubscription};
use crate::metrics::MetricsCollector;
use crate::workflow::{Workflow, WorkflowEntrypoint};
use ayumi_core::{WorkflowError, WorkflowId};
use std::sync::Arc;
use tracing::debug;

/// One engine per process. Every entry point it creates records into the
/// same [`MetricsCollector`] and publishes to the same [`EventBus`].
///
/// # Examples
///
/// ```
/// use ayumi::{EngineConfig, WorkflowEngine};
///
/// let engine = WorkflowEngine::new(EngineConfig::default()).unwrap();
/// assert!(engine.metrics().workflow_ids().is_empty());
/// ```
#[derive(Debug, Clone)]
pub struct WorkflowEngine {
    config: EngineConfig,
    metrics: Arc<MetricsCollector>,
    events: EventBus,
}

impl WorkflowEngine {
    /// Builds an engine from validated settings.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::Configuration`] if `config` is invalid.
    pub fn new(config: EngineConfig) -> Result<Self, WorkflowError> {
        config.validate()?;
        let metrics = match config.metrics_retention {
            Some(max_runs) => MetricsCollector::with_retention(max_runs),
            None => MetricsCollector::new(),
        };
        debug!(
            "Workflow engine created (retention: {:?}, event capacity: {})",
            config.metrics_retention, config.event_capacity
        );
        Ok(Self {
            events: EventBus::new(config.event_capacity),
            metrics: Arc::new(metrics),
            config,
        })
    }

    /// Settings the engine was built with.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The shared metrics store.
    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    /// The shared relay.
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Receives relay events of one workflow.
    pub fn subscribe(&self, workflow_id: impl Into<WorkflowId>) -> WorkflowSubscription {
        WorkflowSubscription::new(&self.events, workflow_id)
    }

    /// Creates an entry point wired to this engine's metrics and relay.
    pub fn entrypoint<W: Workflow>(
        &self,
        id: impl Into<WorkflowId>,
        workflow: W,
    ) -> WorkflowEntrypoint<W> {
        WorkflowEntrypoint::new(id, workflow, self.metrics.clone()).with_events(self.events.clone())
    }
}
