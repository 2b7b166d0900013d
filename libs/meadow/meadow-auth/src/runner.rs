//! Dependency-inversion seam: `meadow-auth` needs to execute an auth flow's
//! step tree, but the step executor lives in
//! `meadow-extractor`, which in turn needs auth contexts from this crate.
//! `FlowRunner` breaks the cycle — `meadow-extractor` implements it and
//! hands the trait object to [`crate::AuthManager`].

use async_trait::async_trait;
use meadow_core::AuthFlow;
use serde_json::Value;

#[async_trait]
pub trait FlowRunner: Send + Sync {
    /// Runs `flow.root_step` against a fresh context containing only
    /// `config` and `auth=nil`, and returns the resulting evaluator context
    /// tree (so the caller can pull `token_path`/`expires_in_path` out of it).
    async fn run_flow(&self, flow: &AuthFlow, config: Value) -> Result<Value, String>;
}
