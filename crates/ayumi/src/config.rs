//! Engine-wide settings.

use ayumi_core::WorkflowError;
use serde::{Deserialize, Serialize};

/// Settings shared by every entry point of a [`WorkflowEngine`](crate::WorkflowEngine).
///
/// Missing fields take their defaults, so an empty document is valid.
///
/// # Examples
///
/// ```
/// use ayumi::EngineConfig;
///
/// let config: EngineConfig = serde_json::from_str(r#"{ "metrics_retention": 100 }"#).unwrap();
/// assert_eq!(config.metrics_retention, Some(100));
/// assert_eq!(config.event_capacity, 1024);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Finalised runs kept per workflow; `None` keeps everything.
    pub metrics_retention: Option<usize>,
    /// Buffered relay events per subscriber.
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            metrics_retention: None,
            event_capacity: 1024,
        }
    }
}

impl EngineConfig {
    /// Keeps at most `max_runs` runs per workflow.
    pub fn with_metrics_retention(mut self, max_runs: usize) -> Self {
        self.metrics_retention = Some(max_runs);
        self
    }

    /// Sets the relay buffer size.
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Checks that every setting is usable.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::Configuration`] for a zero retention or a
    /// zero relay capacity.
    pub fn validate(&self) -> Result<(), WorkflowError> {
        if self.metrics_retention == Some(0) {
            return Err(WorkflowError::Configuration(
                "metrics_retention must be at least 1".into(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(WorkflowError::Configuration(
                "event_capacity must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
