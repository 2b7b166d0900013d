//! Binding + filter.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Binding {
    pub tenant_id: String,
    pub binding_id: String,
    pub mapping_id: String,
    pub filter: BindingFilter,
    pub output_topic: Option<String>,
    pub enabled: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BindingFilter {
    pub integration: Option<String>,
    #[serde(default)]
    pub plan_keys: BTreeSet<String>,
    pub min_status_code: Option<u16>,
    pub max_status_code: Option<u16>,
}

impl BindingFilter {
    pub fn matches(&self, integration: &str, plan_key: &str, status_code: u16) -> bool {
        if let Some(expected) = &self.integration {
            if expected != integration {
                return false;
            }
        }
        if !self.plan_keys.is_empty() && !self.plan_keys.contains(plan_key) {
            return false;
        }
        if self.min_status_code.is_some() || self.max_status_code.is_some() {
            let min = self.min_status_code.unwrap_or(0);
            let max = self.max_status_code.unwrap_or(u16::MAX);
            if status_code < min || status_code > max {
                return false;
            }
        }
        true
    }
}

impl Binding {
    pub fn matches(&self, integration: &str, plan_key: &str, status_code: u16) -> bool {
        self.enabled && self.filter.matches(integration, plan_key, status_code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binding(filter: BindingFilter) -> Binding {
        Binding {
            tenant_id: "t1".into(),
            binding_id: "b1".into(),
            mapping_id: "m1".into(),
            filter,
            output_topic: Some("out".into()),
            enabled: true,
        }
    }

    #[test]
    fn unset_filters_match_anything() {
        let b = binding(BindingFilter::default());
        assert!(b.matches("shopify", "orders", 200));
        assert!(b.matches("anything", "anything", 500));
    }

    #[test]
    fn integration_filter_is_exact() {
        let b = binding(BindingFilter {
            integration: Some("shopify".into()),
            ..Default::default()
        });
        assert!(b.matches("shopify", "orders", 200));
        assert!(!b.matches("square", "orders", 200));
    }

    #[test]
    fn plan_key_set_must_contain_key() {
        let b = binding(BindingFilter {
            plan_keys: BTreeSet::from(["orders".to_string(), "refunds".to_string()]),
            ..Default::default()
        });
        assert!(b.matches("shopify", "refunds", 200));
        assert!(!b.matches("shopify", "customers", 200));
    }

    #[test]
    fn status_range_both_bounds() {
        let b = binding(BindingFilter {
            min_status_code: Some(400),
            max_status_code: Some(499),
            ..Default::default()
        });
        assert!(b.matches("shopify", "orders", 404));
        assert!(!b.matches("shopify", "orders", 200));
        assert!(!b.matches("shopify", "orders", 500));
    }

    #[test]
    fn disabled_binding_never_matches() {
        let mut b = binding(BindingFilter::default());
        b.enabled = false;
        assert!(!b.matches("shopify", "orders", 200));
    }
}
