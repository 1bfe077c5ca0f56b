//! A step-execution engine for retryable async workflows.
//!
//! A workflow's business method receives a [`WorkflowStep`] and calls
//! [`run_with`](WorkflowStep::run_with) for every unit of work it wants
//! retried, timed out and recorded. The [`WorkflowEntrypoint`] wraps each
//! execution, classifies its outcome and stores the finalised ledger in a
//! shared [`MetricsCollector`].
//!
//! # Example
//!
//! ```rust,no_run
//! use ayumi::prelude::*;
//! use async_trait::async_trait;
//!
//! struct Digest;
//!
//! #[async_trait]
//! impl Workflow for Digest {
//!     type Params = Vec<String>;
//!     type Output = usize;
//!
//!     async fn run(
//!         &self,
//!         event: &WorkflowEvent<Vec<String>>,
//!         step: &WorkflowStep,
//!     ) -> Result<usize, WorkflowError> {
//!         let urls = event.payload().clone();
//!         let options = StepOptions::new()
//!             .with_retries(RetryPolicy::exponential(3, "10 second")?)
//!             .with_timeout_expr("10 minutes")?;
//!
//!         let pages = step
//!             .run_with("scrape-contents", options, move |_| {
//!                 let urls = urls.clone();
//!                 async move { Ok(urls.len()) }
//!             })
//!             .await?;
//!         if pages == 0 {
//!             return Err(Termination::new("no articles found").into());
//!         }
//!
//!         step.sleep("cool-down", "1 second".parse::<StepDuration>()?).await;
//!         Ok(pages)
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), WorkflowError> {
//!     let engine = WorkflowEngine::new(EngineConfig::default())?;
//!     let digest = engine.entrypoint("weixin-article-workflow", Digest);
//!
//!     let event = WorkflowEvent::new(EventId::generate(), vec!["https://example.com".into()]);
//!     let pages = digest.execute(event).await?;
//!     println!("scraped {pages} pages");
//!     Ok(())
//! }
//! ```

mod config;
mod engine;
mod events;
mod executor;
mod metrics;
mod runner;
mod step;
mod workflow;

// Re-export core types
pub use ayumi_core::*;

pub use config::EngineConfig;
pub use engine::WorkflowEngine;
pub use events::{EventBus, RunEvent, RunEventKind, WorkflowSubscription};
pub use executor::Attempt;
pub use metrics::{MetricsCollector, WorkflowStats};
pub use runner::WorkflowRunner;
pub use step::WorkflowStep;
pub use workflow::{Workflow, WorkflowEntrypoint};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::{
        Attempt, BackoffStrategy, EngineConfig, EventId, MetricsCollector, RetryPolicy,
        RunContext, RunStatus, StepDuration, StepOptions, StepStatus, Termination, Workflow,
        WorkflowEngine, WorkflowEntrypoint, WorkflowError, WorkflowEvent, WorkflowId, WorkflowStep,
        WorkflowTrigger,
    };
}
