//! The checkpointed step runner.
//!
//! A run is an ordered list of steps. After every step the whole
//! [`WorkflowState`] is checkpointed, so a failed or interrupted run can be
//! resumed from the first step that has no recorded output.

pub mod engine;
pub mod executor;
pub mod plan;
pub mod state;

pub use engine::{RunHandle, WorkflowExecutor};
pub use executor::{StepError, StepExecutor, StepResult};
pub use plan::{validate_plan, RetryPolicy, RunConfig, StepConfig};
pub use state::{Cancellation, RunId, RunStatus, StepFailure, WorkflowState};
