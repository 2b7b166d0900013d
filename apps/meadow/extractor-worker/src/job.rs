//! `StreamJob` adapter wrapping a [`meadow_core::Job`] with the retry
//! bookkeeping `meadow-stream-worker` expects on the wire.

use meadow_stream_worker::StreamJob;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractorJob {
    #[serde(flatten)]
    pub job: meadow_core::Job,
    #[serde(default)]
    pub retry_count: u32,
}

impl StreamJob for ExtractorJob {
    fn job_id(&self) -> String {
        self.job.id.clone()
    }

    fn retry_count(&self) -> u32 {
        self.retry_count
    }

    fn with_retry(&self) -> Self {
        Self {
            job: self.job.clone(),
            retry_count: self.retry_count + 1,
        }
    }
}
