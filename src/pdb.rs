//! PodDisruptionBudget limits
//!
//! Built once per tick from the live budgets, then consulted by the eviction
//! gate. A node whose pods include one covered by a budget with zero allowed
//! disruptions cannot be consolidated this tick.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;

use crate::kube_access::KubeApi;
use crate::Result;

/// Per-tick view of the cluster's disruption budgets.
pub struct PdbLimits {
    budgets: Vec<Budget>,
}

struct Budget {
    namespace: String,
    selector: LabelSelector,
    disruptions_allowed: i32,
}

impl PdbLimits {
    /// Snapshot the cluster's budgets.
    pub async fn new(kube: &dyn KubeApi) -> Result<Self> {
        let budgets = kube
            .list_pdbs()
            .await?
            .into_iter()
            .filter_map(budget_from_pdb)
            .collect();
        Ok(Self { budgets })
    }

    /// Build limits from already-fetched budgets.
    pub fn from_pdbs(pdbs: Vec<PodDisruptionBudget>) -> Self {
        Self {
            budgets: pdbs.into_iter().filter_map(budget_from_pdb).collect(),
        }
    }

    /// Whether all of the given pods may be evicted simultaneously.
    pub fn can_evict_pods(&self, pods: &[Pod]) -> bool {
        pods.iter().all(|p| self.can_evict_pod(p))
    }

    fn can_evict_pod(&self, pod: &Pod) -> bool {
        let namespace = pod.metadata.namespace.as_deref().unwrap_or("default");
        let labels = pod.metadata.labels.clone().unwrap_or_default();
        !self.budgets.iter().any(|b| {
            b.disruptions_allowed <= 0
                && b.namespace == namespace
                && selector_matches(&b.selector, &labels)
        })
    }
}

fn budget_from_pdb(pdb: PodDisruptionBudget) -> Option<Budget> {
    let namespace = pdb.metadata.namespace.clone()?;
    let selector = pdb.spec.as_ref()?.selector.clone()?;
    let disruptions_allowed = pdb.status.as_ref().map(|s| s.disruptions_allowed)?;
    Some(Budget {
        namespace,
        selector,
        disruptions_allowed,
    })
}

/// Evaluate a Kubernetes label selector against a label set.
///
/// Supports `matchLabels` and the In/NotIn/Exists/DoesNotExist operators of
/// `matchExpressions`. An empty selector matches everything, per the API
/// convention.
fn selector_matches(selector: &LabelSelector, labels: &BTreeMap<String, String>) -> bool {
    if let Some(match_labels) = &selector.match_labels {
        for (k, v) in match_labels {
            if labels.get(k) != Some(v) {
                return false;
            }
        }
    }
    if let Some(expressions) = &selector.match_expressions {
        for expr in expressions {
            let value = labels.get(&expr.key);
            let values = expr.values.as_deref().unwrap_or_default();
            let matched = match expr.operator.as_str() {
                "In" => value.is_some_and(|v| values.iter().any(|candidate| candidate == v)),
                "NotIn" => !value.is_some_and(|v| values.iter().any(|candidate| candidate == v)),
                "Exists" => value.is_some(),
                "DoesNotExist" => value.is_none(),
                _ => false,
            };
            if !matched {
                return false;
            }
        }
    }
    true
}
