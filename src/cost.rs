//! Cost model for consolidation decisions
//!
//! Two scalars drive candidate ordering: the per-pod eviction cost and its
//! per-node sum, the disruption cost. Both are pure functions of the observed
//! objects. A separate lifetime-remaining factor discounts nodes that are
//! close to their provisioner-declared expiry.

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Pod;
use tracing::error;

use crate::crd::{ProvisionerSpec, POD_DELETION_COST_ANNOTATION};

/// Lower clamp for a single pod's eviction cost.
const MIN_POD_COST: f64 = 0.01;
/// Upper clamp for a single pod's eviction cost.
const MAX_POD_COST: f64 = 10.0;

/// Cost of evicting one pod, in arbitrary units. Higher is harder to evict.
///
/// A pod with neither a deletion-cost annotation nor a priority costs exactly
/// 1.0. The declared deletion cost and the pod priority each shift the result
/// monotonically; the result is clamped to [0.01, 10.0] so one pod can be at
/// most ~1000x more expensive than another.
pub fn pod_eviction_cost(pod: &Pod) -> f64 {
    let mut cost = 1.0;

    if let Some(declared) = pod
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(POD_DELETION_COST_ANNOTATION))
    {
        match declared.parse::<f64>() {
            // the declared deletion cost is an i32; normalize into [-1, 1]
            Ok(deletion_cost) => cost += deletion_cost / i32::MAX as f64,
            Err(e) => error!(
                pod = %pod_key(pod),
                value = %declared,
                error = %e,
                "Ignoring unparseable pod-deletion-cost annotation"
            ),
        }
    }

    if let Some(priority) = pod.spec.as_ref().and_then(|s| s.priority) {
        cost += f64::from(priority) / i32::MAX as f64;
    }

    cost.clamp(MIN_POD_COST, MAX_POD_COST)
}

/// Aggregate disruption cost of evicting all of the given pods.
pub fn disruption_cost(pods: &[Pod]) -> f64 {
    pods.iter().map(pod_eviction_cost).sum()
}

/// Fraction of node lifetime remaining, in [0.0, 1.0].
///
/// When the provisioner sets `ttlSecondsUntilExpired` the fraction starts at
/// 1.0 on creation and approaches 0.0 as the node ages toward expiry; an
/// already-expired node reports 0.0. Without a TTL the lifetime is unbounded
/// and the factor is 1.0.
pub fn lifetime_remaining(
    provisioner: &ProvisionerSpec,
    node_created: DateTime<Utc>,
    now: DateTime<Utc>,
) -> f64 {
    let Some(ttl_seconds) = provisioner.ttl_seconds_until_expired else {
        return 1.0;
    };
    if ttl_seconds <= 0 {
        return 0.0;
    }
    let total = ttl_seconds as f64;
    let age = (now - node_created).num_milliseconds() as f64 / 1000.0;
    ((total - age) / total).clamp(0.0, 1.0)
}

fn pod_key(pod: &Pod) -> String {
    format!(
        "{}/{}",
        pod.metadata.namespace.as_deref().unwrap_or_default(),
        pod.metadata.name.as_deref().unwrap_or_default()
    )
}
