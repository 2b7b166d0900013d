//! Bridges a consumed [`ExtractorJob`] into the Plan Executor
//! and translates its outcome back into the categories
//! `meadow-stream-worker` uses to decide retry vs. DLQ.

use crate::job::ExtractorJob;
use async_trait::async_trait;
use meadow_core::{ErrorCategory, JobType};
use meadow_extractor::{JobRequest, PlanExecutionError, PlanExecutor};
use meadow_stream_worker::{StreamError, StreamProcessor};
use std::sync::Arc;
use tracing::{info, warn};

pub struct ExtractorProcessor {
    executor: Arc<PlanExecutor>,
}

impl ExtractorProcessor {
    pub fn new(executor: Arc<PlanExecutor>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl StreamProcessor<ExtractorJob> for ExtractorProcessor {
    async fn process(&self, job: &ExtractorJob) -> Result<(), StreamError> {
        if job.job.job_type != JobType::PlanExecution {
            // Unknown job type: permanent, no point retrying.
            return Err(StreamError::JobParsing(format!(
                "unsupported job type on job {}",
                job.job.id
            )));
        }

        let request = JobRequest::from_job(&job.job);
        info!(
            execution_id = %request.execution_id,
            tenant_id = %request.tenant_id,
            plan_key = %request.plan_key,
            "dispatching plan execution"
        );

        self.executor.execute(request).await.map_err(map_plan_error)
    }

    fn name(&self) -> &'static str {
        "meadow-extractor-worker"
    }
}

/// `meadow_core::ErrorCategory` already classifies the failure; map it onto
/// the `StreamError` variant whose `.category()` the worker's retry/DLQ
/// logic already understands, rather than re-deriving it by string-sniffing.
fn map_plan_error(err: PlanExecutionError) -> StreamError {
    match err.category() {
        ErrorCategory::Permanent => StreamError::JobParsing(format!("permanent: {err}")),
        ErrorCategory::Transient => {
            warn!(error = %err, "transient plan execution failure");
            StreamError::Processing(format!("transient error: {err}"))
        }
        ErrorCategory::RateLimited => StreamError::Processing(format!("rate limited: {err}")),
    }
}
