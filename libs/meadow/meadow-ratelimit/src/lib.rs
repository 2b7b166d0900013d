//! Rate-limit manager: per-`(tenant, integration, config,
//! endpoint)` token bucket and concurrency semaphore.

mod bucket;
mod manager;

pub use bucket::endpoint_bucket;
pub use manager::{RateLimitError, RateLimitKey, RateLimitManager, RateLimitRelease};
