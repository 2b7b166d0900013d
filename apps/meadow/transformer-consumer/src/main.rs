//! Transformer Event Consumer - Entry Point
//!
//! Consumes step-batch, step-error, and lifecycle events off the per-tenant
//! Redis streams and drives each through the Dispatch Pipeline.

#[tokio::main]
async fn main() -> eyre::Result<()> {
    meadow_transformer_consumer::run().await
}
