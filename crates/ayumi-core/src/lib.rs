//! Core types for the ayumi step-execution engine.
//!
//! This crate has no runtime dependencies. It holds the vocabulary shared by
//! the engine and by collaborators that consume its output.
//!
//! # Core Types
//!
//! - [`StepDuration`] / [`parse_duration_ms`] - `"10 second"`-style durations
//! - [`RetryPolicy`] / [`delay_for`] - attempt limits and backoff arithmetic
//! - [`StepOptions`] - retry and timeout settings for one step call
//! - [`RunContext`] / [`StepRecord`] - the per-run ledger
//! - [`Termination`] / [`WorkflowError`] - the error taxonomy
//! - [`RunRecorder`] - run-history seam

mod context;
mod duration;
mod error;
mod retry;
mod step;
mod traits;

pub use context::{EventId, RunContext, RunStatus, WorkflowEvent, WorkflowId, WorkflowTrigger};
pub use duration::{parse_duration_ms, StepDuration};
pub use error::{Termination, WorkflowError};
pub use retry::{delay_for, BackoffStrategy, RetryPolicy};
pub use step::{StepKind, StepName, StepOptions, StepRecord, StepStatus};
pub use traits::{RunRecorder, RunStart};
