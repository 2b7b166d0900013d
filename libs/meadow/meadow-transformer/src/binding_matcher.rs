//! Binding Matcher: tenant-scoped binding tables with
//! copy-on-write refresh and coalesced first-sight loads.

use meadow_core::{Binding, BindingRepository};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};

/// A matched binding, returned by reference into the in-memory snapshot —
/// callers must not mutate it.
#[derive(Debug, Clone)]
pub struct BindingMatch {
    pub binding: Arc<Binding>,
}

type Snapshot = Arc<Vec<Arc<Binding>>>;

/// One coalescing slot per tenant: `None` means "never loaded", `Some`
/// holds the current snapshot. The outer mutex only guards map structure;
/// the inner one serializes concurrent first-sight loads for the same
/// tenant the same way `meadow_auth::AuthManager` coalesces token fetches.
struct TenantSlot {
    snapshot: AsyncMutex<Option<Snapshot>>,
}

pub struct BindingMatcher {
    repository: Arc<dyn BindingRepository>,
    tenants: std::sync::Mutex<HashMap<String, Arc<TenantSlot>>>,
}

impl BindingMatcher {
    pub fn new(repository: Arc<dyn BindingRepository>) -> Self {
        Self {
            repository,
            tenants: std::sync::Mutex::new(HashMap::new()),
        }
    }

    fn slot_for(&self, tenant_id: &str) -> Arc<TenantSlot> {
        let mut tenants = self.tenants.lock().unwrap();
        tenants
            .entry(tenant_id.to_string())
            .or_insert_with(|| {
                Arc::new(TenantSlot {
                    snapshot: AsyncMutex::new(None),
                })
            })
            .clone()
    }

    /// Whether `tenant_id` already has a loaded snapshot, without triggering
    /// a load of its own.
    pub async fn is_loaded(&self, tenant_id: &str) -> bool {
        let slot = self.slot_for(tenant_id);
        slot.snapshot.lock().await.is_some()
    }

    /// Ensures bindings are loaded for `tenant_id`. A cold tenant triggers
    /// exactly one load even under concurrent callers; a warm tenant
    /// returns immediately without touching the repository.
    pub async fn ensure_loaded(&self, tenant_id: &str) -> Result<(), String> {
        let slot = self.slot_for(tenant_id);
        let mut guard = slot.snapshot.lock().await;
        if guard.is_some() {
            return Ok(());
        }
        let loaded = self.repository.list_enabled(tenant_id).await?;
        let snapshot: Snapshot = Arc::new(loaded.into_iter().map(Arc::new).collect());
        debug!(tenant_id, count = snapshot.len(), "loaded bindings for tenant");
        *guard = Some(snapshot);
        Ok(())
    }

    /// Atomically replaces the snapshot for `tenant_id`; in-flight `match`
    /// calls see either the old or the new snapshot, never a torn view,
    /// because the `Arc<Vec<_>>` swap itself is atomic under the mutex and
    /// readers clone the `Arc` before iterating.
    pub async fn refresh(&self, tenant_id: &str) -> Result<(), String> {
        let slot = self.slot_for(tenant_id);
        let loaded = self.repository.list_enabled(tenant_id).await?;
        let snapshot: Snapshot = Arc::new(loaded.into_iter().map(Arc::new).collect());
        *slot.snapshot.lock().await = Some(snapshot);
        Ok(())
    }

    /// Matches `event` against the tenant's loaded bindings.
    /// Returns an empty vec for a tenant that has never been loaded;
    /// callers are expected to call [`ensure_loaded`] first.
    pub async fn match_event(
        &self,
        tenant_id: &str,
        integration: &str,
        plan_key: &str,
        status_code: u16,
    ) -> Vec<BindingMatch> {
        let slot = self.slot_for(tenant_id);
        let snapshot = slot.snapshot.lock().await.clone();
        let Some(snapshot) = snapshot else {
            warn!(tenant_id, "match_event called before bindings were loaded");
            return Vec::new();
        };
        snapshot
            .iter()
            .filter(|b| b.matches(integration, plan_key, status_code))
            .map(|b| BindingMatch { binding: b.clone() })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use meadow_core::BindingFilter;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingRepo {
        calls: AtomicU32,
        bindings: Vec<Binding>,
    }

    #[async_trait]
    impl BindingRepository for CountingRepo {
        async fn list_enabled(&self, _tenant_id: &str) -> Result<Vec<Binding>, String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            Ok(self.bindings.clone())
        }
    }

    fn binding(id: &str, integration: Option<&str>) -> Binding {
        Binding {
            tenant_id: "t1".into(),
            binding_id: id.into(),
            mapping_id: "m1".into(),
            filter: BindingFilter {
                integration: integration.map(String::from),
                ..Default::default()
            },
            output_topic: Some("out".into()),
            enabled: true,
        }
    }

    #[tokio::test]
    async fn concurrent_first_sight_loads_coalesce_to_one_call() {
        let repo = Arc::new(CountingRepo {
            calls: AtomicU32::new(0),
            bindings: vec![binding("b1", None)],
        });
        let matcher = Arc::new(BindingMatcher::new(repo.clone()));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let matcher = matcher.clone();
            handles.push(tokio::spawn(async move {
                matcher.ensure_loaded("t1").await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(repo.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn match_filters_by_integration_and_status() {
        let repo = Arc::new(CountingRepo {
            calls: AtomicU32::new(0),
            bindings: vec![binding("b1", Some("shopify")), binding("b2", Some("square"))],
        });
        let matcher = BindingMatcher::new(repo);
        matcher.ensure_loaded("t1").await.unwrap();

        let matches = matcher.match_event("t1", "shopify", "orders", 200).await;
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].binding.binding_id, "b1");
    }

    #[tokio::test]
    async fn unloaded_tenant_matches_nothing() {
        let repo = Arc::new(CountingRepo {
            calls: AtomicU32::new(0),
            bindings: vec![binding("b1", None)],
        });
        let matcher = BindingMatcher::new(repo);
        let matches = matcher.match_event("never-loaded", "x", "y", 200).await;
        assert!(matches.is_empty());
    }

    #[tokio::test]
    async fn refresh_swaps_snapshot_atomically() {
        let repo = Arc::new(CountingRepo {
            calls: AtomicU32::new(0),
            bindings: vec![binding("b1", None)],
        });
        let matcher = BindingMatcher::new(repo.clone());
        matcher.ensure_loaded("t1").await.unwrap();
        assert_eq!(matcher.match_event("t1", "x", "y", 200).await.len(), 1);

        // Simulate the bindings table changing out from under us.
        let repo2 = Arc::new(CountingRepo {
            calls: AtomicU32::new(0),
            bindings: vec![],
        });
        let matcher2 = BindingMatcher::new(repo2);
        matcher2.refresh("t1").await.unwrap();
        assert!(matcher2.match_event("t1", "x", "y", 200).await.is_empty());
    }
}
