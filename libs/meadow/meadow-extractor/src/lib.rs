//! Extractor-side (E) plan execution engine: turns a `Step`/`Plan` tree
//! into outbound HTTP calls.
//!
//! - [`step_executor`] (C5): one step, with retry/backoff and the
//!   abort/break/ignore decision tree.
//! - [`fan_out`] (C6): bounded-concurrency `iterate_over` fan-out.
//! - [`plan_executor`] (C7): top-level orchestration for a single job.
//! - [`auth_runner`]: the `meadow_auth::FlowRunner` impl that lets auth
//!   flows execute their own step tree through the same step executor.

pub mod auth_runner;
pub mod fan_out;
pub mod plan_executor;
pub mod step_executor;

pub use auth_runner::StepExecutorFlowRunner;
pub use fan_out::{FanOutExecutor, FanOutItemOutcome, FanOutResult};
pub use plan_executor::{
    JobRequest, PlanExecutionError, PlanExecutor, PlanExecutorDeps, PlanExecutorOptions,
};
pub use step_executor::{RequestSummary, StepExecutor, StepExecutorOptions, StepResult};
