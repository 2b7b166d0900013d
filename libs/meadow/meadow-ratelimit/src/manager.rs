//! Per-bucket token bucket + concurrency semaphore.

use crate::bucket::endpoint_bucket;
use governor::{DefaultDirectRateLimiter, Quota};
use meadow_core::RateLimitDescriptor;
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, OwnedSemaphorePermit, Semaphore};

#[derive(Error, Debug)]
pub enum RateLimitError {
    #[error("rate limit wait timed out after {0:?}")]
    TimedOut(Duration),
}

/// Identifies a rate-limit bucket: `(tenant_id, integration_id, config_id,
/// endpoint_bucket)`, where `endpoint_bucket` is derived from the request URL.
#[derive(Debug, Clone)]
pub struct RateLimitKey {
    pub tenant_id: String,
    pub integration_id: String,
    pub config_id: String,
    pub url: String,
}

impl RateLimitKey {
    fn bucket_id(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            self.tenant_id,
            self.integration_id,
            self.config_id,
            endpoint_bucket(&self.url)
        )
    }
}

struct Bucket {
    limiter: DefaultDirectRateLimiter,
    semaphore: Arc<Semaphore>,
    closed_until: AsyncMutex<Option<Instant>>,
}

impl Bucket {
    fn new(descriptor: &RateLimitDescriptor) -> Self {
        let capacity = NonZeroU32::new(descriptor.capacity.max(1)).unwrap();
        let period = Duration::from_secs_f64(1.0 / descriptor.refill_per_second.max(0.001));
        let quota = Quota::with_period(period)
            .unwrap_or_else(|| Quota::per_second(capacity))
            .allow_burst(capacity);
        Self {
            limiter: DefaultDirectRateLimiter::direct(quota),
            semaphore: Arc::new(Semaphore::new(descriptor.concurrency.max(1) as usize)),
            closed_until: AsyncMutex::new(None),
        }
    }
}

/// Holds the concurrency slot acquired by [`RateLimitManager::wait_for_limit`].
/// Dropping it (or calling [`release`](Self::release) explicitly) returns the
/// slot to the bucket; the rate-limit token itself is never returned.
pub struct RateLimitRelease {
    _permit: OwnedSemaphorePermit,
}

impl RateLimitRelease {
    pub fn release(self) {}
}

/// Owns every bucket keyed by `(tenant, integration, config, endpoint)`.
#[derive(Default)]
pub struct RateLimitManager {
    buckets: std::sync::Mutex<HashMap<String, Arc<Bucket>>>,
}

impl RateLimitManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn bucket_for(&self, key: &RateLimitKey, descriptor: &RateLimitDescriptor) -> Arc<Bucket> {
        let id = key.bucket_id();
        let mut buckets = self.buckets.lock().unwrap();
        buckets
            .entry(id)
            .or_insert_with(|| Arc::new(Bucket::new(descriptor)))
            .clone()
    }

    /// Acquires a concurrency slot, then waits for a rate-limit token.
    /// Returns a release handle once both are granted, or `TimedOut` if
    /// `max_wait` elapses first. The semaphore is FIFO, so concurrency
    /// waiters unblock in arrival order; the governor token wait is
    /// best-effort FIFO (ties broken by GCRA arrival time).
    pub async fn wait_for_limit(
        &self,
        key: &RateLimitKey,
        descriptor: &RateLimitDescriptor,
        max_wait: Duration,
    ) -> Result<RateLimitRelease, RateLimitError> {
        let bucket = self.bucket_for(key, descriptor);
        let deadline = Instant::now() + max_wait;

        let permit = tokio::time::timeout(
            remaining(deadline),
            Arc::clone(&bucket.semaphore).acquire_owned(),
        )
        .await
        .map_err(|_| RateLimitError::TimedOut(max_wait))?
        .expect("semaphore is never closed");

        loop {
            let wait_until = *bucket.closed_until.lock().await;
            let Some(until) = wait_until else { break };
            let now = Instant::now();
            if now >= until {
                *bucket.closed_until.lock().await = None;
                break;
            }
            let sleep_for = (until - now).min(remaining(deadline));
            if remaining(deadline).is_zero() {
                return Err(RateLimitError::TimedOut(max_wait));
            }
            tokio::time::sleep(sleep_for).await;
            if Instant::now() >= deadline {
                return Err(RateLimitError::TimedOut(max_wait));
            }
        }

        tokio::time::timeout(remaining(deadline), bucket.limiter.until_ready())
            .await
            .map_err(|_| RateLimitError::TimedOut(max_wait))?;

        Ok(RateLimitRelease { _permit: permit })
    }

    /// Recognizes `X-RateLimit-*` and `Retry-After` response headers
    /// (case-insensitive) and adjusts the bucket. A `429` with `Retry-After`
    /// closes the bucket for the indicated interval; no tokens are issued
    /// until it reopens.
    pub async fn update_from_response(
        &self,
        key: &RateLimitKey,
        descriptor: &RateLimitDescriptor,
        status_code: u16,
        headers: &BTreeMap<String, String>,
    ) {
        if status_code != 429 {
            return;
        }
        let Some(retry_after) = find_header(headers, "retry-after") else {
            return;
        };
        let Some(secs) = retry_after.trim().parse::<u64>().ok() else {
            return;
        };
        let bucket = self.bucket_for(key, descriptor);
        let mut closed_until = bucket.closed_until.lock().await;
        *closed_until = Some(Instant::now() + Duration::from_secs(secs));
    }
}

fn find_header<'a>(headers: &'a BTreeMap<String, String>, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

fn remaining(deadline: Instant) -> Duration {
    deadline.saturating_duration_since(Instant::now())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(capacity: u32, refill: f64, concurrency: u32) -> RateLimitDescriptor {
        RateLimitDescriptor {
            endpoint_bucket: "api.example.com/users".to_string(),
            capacity,
            refill_per_second: refill,
            concurrency,
        }
    }

    fn key() -> RateLimitKey {
        RateLimitKey {
            tenant_id: "t1".into(),
            integration_id: "i1".into(),
            config_id: "c1".into(),
            url: "https://api.example.com/users/42".into(),
        }
    }

    #[tokio::test]
    async fn grants_immediately_when_under_capacity() {
        let manager = RateLimitManager::new();
        let descriptor = descriptor(10, 10.0, 5);
        let release = manager
            .wait_for_limit(&key(), &descriptor, Duration::from_secs(1))
            .await
            .unwrap();
        release.release();
    }

    #[tokio::test]
    async fn times_out_when_concurrency_exhausted() {
        let manager = RateLimitManager::new();
        let descriptor = descriptor(100, 100.0, 1);
        let _first = manager
            .wait_for_limit(&key(), &descriptor, Duration::from_secs(1))
            .await
            .unwrap();
        let result = manager
            .wait_for_limit(&key(), &descriptor, Duration::from_millis(50))
            .await;
        assert!(matches!(result, Err(RateLimitError::TimedOut(_))));
    }

    #[tokio::test]
    async fn retry_after_closes_bucket() {
        let manager = RateLimitManager::new();
        let descriptor = descriptor(10, 10.0, 5);
        let mut headers = BTreeMap::new();
        headers.insert("Retry-After".to_string(), "1".to_string());
        manager
            .update_from_response(&key(), &descriptor, 429, &headers)
            .await;
        let result = manager
            .wait_for_limit(&key(), &descriptor, Duration::from_millis(50))
            .await;
        assert!(matches!(result, Err(RateLimitError::TimedOut(_))));
    }
}
