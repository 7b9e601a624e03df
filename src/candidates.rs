//! Candidate selection
//!
//! Per tick, turns the observed fleet into the list of nodes worth analyzing.
//! Everything here is filtering: a node survives only when a known policy
//! owns it, consolidation is enabled for that policy, its price is knowable,
//! and nothing marks it or its pods as off-limits.
//!
//! One global guard: if any otherwise-eligible node has not finished
//! initializing, the whole tick yields no candidates. Scheduling simulation
//! assumes known capacity, and a node that is still coming up may shortly
//! absorb load.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::{Node, Pod};
use tracing::error;

use crate::cost::disruption_cost;
use crate::crd::{
    Provisioner, CAPACITY_TYPE_LABEL, CAPACITY_TYPE_SPOT, DO_NOT_CONSOLIDATE_ANNOTATION,
    INITIALIZED_LABEL, INSTANCE_TYPE_LABEL, PROVISIONER_NAME_LABEL,
};
use crate::kube_access::KubeApi;
use crate::pods;
use crate::provider::{CloudProvider, InstanceType};
use crate::state::{snapshot_nodes, ClusterState};
use crate::Result;

/// A node under consideration for consolidation this tick.
///
/// Created transiently per tick, never persisted.
#[derive(Clone, Debug)]
pub struct CandidateNode {
    /// The observed node
    pub node: Node,
    /// The node's resolved instance type (carries the price)
    pub instance_type: InstanceType,
    /// The policy governing the node
    pub provisioner: Provisioner,
    /// The node's reschedulable pods
    pub pods: Vec<Pod>,
    /// Aggregate cost of evicting those pods
    pub disruption_cost: f64,
}

impl CandidateNode {
    /// The node's name.
    pub fn name(&self) -> &str {
        self.node.metadata.name.as_deref().unwrap_or_default()
    }

    /// When the node was created; epoch when unknown.
    pub fn created(&self) -> DateTime<Utc> {
        self.node
            .metadata
            .creation_timestamp
            .as_ref()
            .map(|t| t.0)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Whether the node hosts no reschedulable pods.
    pub fn is_empty(&self) -> bool {
        self.pods.is_empty()
    }

    /// Whether the node runs on spot capacity.
    pub fn is_spot(&self) -> bool {
        node_label(&self.node, CAPACITY_TYPE_LABEL) == Some(CAPACITY_TYPE_SPOT)
    }
}

/// Enumerate the nodes eligible for consolidation this tick.
///
/// Returns an empty list when any eligible node is still initializing.
pub async fn candidate_nodes(
    kube: &dyn KubeApi,
    cluster: &dyn ClusterState,
    cloud: &dyn CloudProvider,
) -> Result<Vec<CandidateNode>> {
    let policies = build_policy_map(kube, cloud).await?;

    let mut candidates = Vec::new();
    let mut uninitialized_node_exists = false;

    for snapshot in snapshot_nodes(cluster) {
        let node = &snapshot.node;

        // the node must be owned by a known policy
        let Some(policy) = node_label(node, PROVISIONER_NAME_LABEL)
            .and_then(|name| policies.get(name))
        else {
            continue;
        };

        // with consolidation enabled and a resolvable price
        if !policy.provisioner.spec.consolidation_enabled() {
            continue;
        }
        let Some(instance_type) = node_label(node, INSTANCE_TYPE_LABEL)
            .and_then(|name| policy.instance_types.get(name))
        else {
            continue;
        };

        // one un-initialized node poisons the tick; no need to keep looking
        if uninitialized_node_exists {
            continue;
        }
        if node_label(node, INITIALIZED_LABEL) != Some("true") {
            uninitialized_node_exists = true;
            continue;
        }

        if node_annotation(node, DO_NOT_CONSOLIDATE_ANNOTATION) == Some("true") {
            continue;
        }

        // about to fill up with pending pods
        if cluster.is_node_nominated(snapshot.name()) {
            continue;
        }

        let pods = match reschedulable_pods(kube, snapshot.name()).await {
            Ok(pods) => pods,
            Err(e) => {
                error!(node = snapshot.name(), error = %e, "Determining node pods");
                continue;
            }
        };

        candidates.push(CandidateNode {
            node: node.clone(),
            instance_type: instance_type.clone(),
            provisioner: policy.provisioner.clone(),
            disruption_cost: disruption_cost(&pods),
            pods,
        });
    }

    if uninitialized_node_exists {
        return Ok(Vec::new());
    }
    Ok(candidates)
}

/// Order candidates so the least painful consolidation is tried first:
/// ascending disruption cost, ties broken by older creation timestamp
/// (shorter remaining useful life).
pub fn sort_by_disruption_cost(candidates: &mut [CandidateNode]) {
    candidates.sort_by(|a, b| {
        a.disruption_cost
            .partial_cmp(&b.disruption_cost)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.created().cmp(&b.created()))
    });
}

struct Policy {
    provisioner: Provisioner,
    instance_types: HashMap<String, InstanceType>,
}

/// Build a policy-name → (provisioner, instance-type catalog) map.
async fn build_policy_map(
    kube: &dyn KubeApi,
    cloud: &dyn CloudProvider,
) -> Result<HashMap<String, Policy>> {
    let mut policies = HashMap::new();
    for provisioner in kube.list_provisioners().await? {
        let Some(name) = provisioner.metadata.name.clone() else {
            continue;
        };
        let instance_types = cloud
            .instance_types(&provisioner)
            .await?
            .into_iter()
            .map(|it| (it.name.clone(), it))
            .collect();
        policies.insert(
            name,
            Policy {
                provisioner,
                instance_types,
            },
        );
    }
    Ok(policies)
}

/// The node's pods that would need rescheduling if the node went away.
async fn reschedulable_pods(kube: &dyn KubeApi, node_name: &str) -> Result<Vec<Pod>> {
    Ok(kube
        .list_pods_on_node(node_name)
        .await?
        .into_iter()
        .filter(|p| {
            !pods::is_owned_by_node(p) && !pods::is_owned_by_daemonset(p) && !pods::is_terminal(p)
        })
        .collect())
}

fn node_label<'a>(node: &'a Node, key: &str) -> Option<&'a str> {
    node.metadata
        .labels
        .as_ref()
        .and_then(|l| l.get(key))
        .map(String::as_str)
}

fn node_annotation<'a>(node: &'a Node, key: &str) -> Option<&'a str> {
    node.metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(key))
        .map(String::as_str)
}
