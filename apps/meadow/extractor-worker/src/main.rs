//! Extractor Job Queue Worker - Entry Point
//!
//! Consumes `plan_execution` jobs from the Redis stream and drives each
//! through the Plan Executor.

#[tokio::main]
async fn main() -> eyre::Result<()> {
    meadow_extractor_worker::run().await
}
