//! Compiled mapping cache: at-most-one compile per
//! `(tenant_id, mapping_id)` under concurrent callers, TTL + size-bounded
//! eviction. Coalescing follows the same slot-mutex pattern as
//! `meadow_auth::AuthManager`.

use crate::mapping_executor::{CompileError, CompiledMapping};
use meadow_core::MappingRepository;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex as AsyncMutex;
use tracing::debug;

/// Default entry lifetime before a cache hit still triggers a reload.
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);
/// Default `max_size`: once the cache holds this many entries, the next
/// insert evicts the oldest half by last-access time.
pub const DEFAULT_MAX_SIZE: usize = 1000;

#[derive(Debug, thiserror::Error)]
pub enum MappingCacheError {
    #[error("mapping not found: {tenant_id}/{mapping_id}")]
    NotFound { tenant_id: String, mapping_id: String },
    #[error("repository error: {0}")]
    Repository(String),
    #[error("compile error: {0}")]
    Compile(#[from] CompileError),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    tenant_id: String,
    mapping_id: String,
}

struct Entry {
    mapping: Arc<CompiledMapping>,
    expires_at: Instant,
    last_access: Instant,
}

type Slot = Arc<AsyncMutex<Option<Entry>>>;

pub struct MappingCache {
    repository: Arc<dyn MappingRepository>,
    ttl: Duration,
    max_size: usize,
    entries: std::sync::Mutex<HashMap<CacheKey, Slot>>,
}

impl MappingCache {
    pub fn new(repository: Arc<dyn MappingRepository>) -> Self {
        Self::with_ttl(repository, DEFAULT_TTL)
    }

    pub fn with_ttl(repository: Arc<dyn MappingRepository>, ttl: Duration) -> Self {
        Self {
            repository,
            ttl,
            max_size: DEFAULT_MAX_SIZE,
            entries: std::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Overrides the default size-bounded eviction threshold (`max_size`,
    /// spec.md §4.10).
    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size.max(1);
        self
    }

    fn slot_for(&self, key: &CacheKey) -> Slot {
        let mut entries = self.entries.lock().unwrap();
        if entries.len() >= self.max_size && !entries.contains_key(key) {
            evict_half(&mut entries);
        }
        entries
            .entry(key.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(None)))
            .clone()
    }

    /// Returns the compiled mapping for `(tenant_id, mapping_id)`, compiling
    /// it at most once per cold/expired entry even under concurrent callers
    ///.
    pub async fn get(
        &self,
        tenant_id: &str,
        mapping_id: &str,
    ) -> Result<Arc<CompiledMapping>, MappingCacheError> {
        let key = CacheKey {
            tenant_id: tenant_id.to_string(),
            mapping_id: mapping_id.to_string(),
        };
        let slot = self.slot_for(&key);
        let mut guard = slot.lock().await;

        let now = Instant::now();
        if let Some(entry) = guard.as_mut() {
            if now < entry.expires_at {
                entry.last_access = now;
                return Ok(entry.mapping.clone());
            }
        }

        let def = self
            .repository
            .get_by_id(tenant_id, mapping_id)
            .await
            .map_err(MappingCacheError::Repository)?
            .ok_or_else(|| MappingCacheError::NotFound {
                tenant_id: tenant_id.to_string(),
                mapping_id: mapping_id.to_string(),
            })?;

        let compiled = Arc::new(CompiledMapping::compile(&def)?);
        debug!(tenant_id, mapping_id, "compiled mapping");
        *guard = Some(Entry {
            mapping: compiled.clone(),
            expires_at: now + self.ttl,
            last_access: now,
        });
        Ok(compiled)
    }

    pub async fn invalidate(&self, tenant_id: &str, mapping_id: &str) {
        let key = CacheKey {
            tenant_id: tenant_id.to_string(),
            mapping_id: mapping_id.to_string(),
        };
        let slot = self.slot_for(&key);
        *slot.lock().await = None;
    }

    pub fn invalidate_tenant(&self, tenant_id: &str) {
        let mut entries = self.entries.lock().unwrap();
        entries.retain(|k, _| k.tenant_id != tenant_id);
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }
}

/// Evicts the oldest half of entries by last access time, inspecting only
/// the ones that already have a compiled value (in-flight slots, which have
/// no `Entry` yet, are left alone).
fn evict_half(entries: &mut HashMap<CacheKey, Slot>) {
    let mut ages: Vec<(CacheKey, Instant)> = entries
        .iter()
        .filter_map(|(k, slot)| {
            slot.try_lock()
                .ok()
                .and_then(|g| g.as_ref().map(|e| (k.clone(), e.last_access)))
        })
        .collect();
    ages.sort_by_key(|(_, last_access)| *last_access);
    let evict_count = ages.len() / 2;
    for (key, _) in ages.into_iter().take(evict_count) {
        entries.remove(&key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use meadow_core::{ActionValueType, FieldSpec, MappingDefinition};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingRepo {
        calls: AtomicU32,
    }

    #[async_trait]
    impl MappingRepository for CountingRepo {
        async fn get_by_id(
            &self,
            tenant_id: &str,
            mapping_id: &str,
        ) -> Result<Option<MappingDefinition>, String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            Ok(Some(MappingDefinition {
                tenant_id: tenant_id.to_string(),
                mapping_id: mapping_id.to_string(),
                version: 1,
                source_fields: vec![FieldSpec {
                    id: "src".into(),
                    path: "a".into(),
                    value_type: ActionValueType::Any,
                    nullable: true,
                }],
                target_fields: vec![FieldSpec {
                    id: "dst".into(),
                    path: "b".into(),
                    value_type: ActionValueType::Any,
                    nullable: true,
                }],
                steps: vec![],
                links: vec![meadow_core::Link {
                    source_field_id: "src".into(),
                    target_field_id: "dst".into(),
                }],
            }))
        }
    }

    #[tokio::test]
    async fn warm_hit_does_not_recompile() {
        let repo = Arc::new(CountingRepo { calls: AtomicU32::new(0) });
        let cache = MappingCache::new(repo.clone());
        cache.get("t1", "m1").await.unwrap();
        cache.get("t1", "m1").await.unwrap();
        assert_eq!(repo.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_cold_calls_compile_once() {
        let repo = Arc::new(CountingRepo { calls: AtomicU32::new(0) });
        let cache = Arc::new(MappingCache::new(repo.clone()));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                cache.get("t1", "m1").await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(repo.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn expired_entry_recompiles() {
        let repo = Arc::new(CountingRepo { calls: AtomicU32::new(0) });
        let cache = MappingCache::with_ttl(repo.clone(), Duration::from_millis(20));
        cache.get("t1", "m1").await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        cache.get("t1", "m1").await.unwrap();
        assert_eq!(repo.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn invalidate_forces_recompile() {
        let repo = Arc::new(CountingRepo { calls: AtomicU32::new(0) });
        let cache = MappingCache::new(repo.clone());
        cache.get("t1", "m1").await.unwrap();
        cache.invalidate("t1", "m1").await;
        cache.get("t1", "m1").await.unwrap();
        assert_eq!(repo.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn eviction_bounds_size_after_loading_past_max() {
        let repo = Arc::new(CountingRepo { calls: AtomicU32::new(0) });
        let cache = MappingCache::new(repo.clone()).with_max_size(4);
        for i in 0..5 {
            cache.get("t1", &format!("m{i}")).await.unwrap();
        }
        let size = cache.entries.lock().unwrap().len();
        assert!((2..=4).contains(&size), "cache size {size} out of expected eviction range");
        assert_eq!(repo.calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn not_found_mapping_is_an_error() {
        struct EmptyRepo;
        #[async_trait]
        impl MappingRepository for EmptyRepo {
            async fn get_by_id(&self, _: &str, _: &str) -> Result<Option<MappingDefinition>, String> {
                Ok(None)
            }
        }
        let cache = MappingCache::new(Arc::new(EmptyRepo));
        let err = cache.get("t1", "missing").await.unwrap_err();
        assert!(matches!(err, MappingCacheError::NotFound { .. }));
    }
}
