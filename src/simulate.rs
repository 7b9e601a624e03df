//! Scheduling-simulation seam to the provisioning subsystem
//!
//! The provisioning subsystem owns the real scheduler. The controller drives
//! it in simulation mode: "treat the fleet minus one node as fixed capacity
//! and place that node's pods". The answer - how many new nodes would be
//! needed, and which pods land on existing capacity - is the whole basis of
//! the delete/replace decision.
//!
//! Simulations always receive deep copies of the observed state
//! ([`crate::state::snapshot_nodes`] clones) so concurrent observer mutations
//! cannot perturb a decision mid-tick.

use std::collections::BTreeSet;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;

#[cfg(test)]
use mockall::automock;

use crate::provider::InstanceType;
use crate::state::NodeSnapshot;
use crate::Result;

/// A node the scheduler would need to provision to host the displaced pods.
#[derive(Clone, Debug, Default)]
pub struct ProposedNode {
    /// Instance types that could satisfy the placement, cheapest first.
    ///
    /// The ordering is the provisioning subsystem's contract; the planner
    /// relies on index 0 being the cheapest surviving option.
    pub instance_type_options: Vec<InstanceType>,
    /// Capacity types the proposal's requirements allow (e.g. "spot")
    pub capacity_types: BTreeSet<String>,
    /// Pods the proposal would host
    pub pods: Vec<Pod>,
}

impl ProposedNode {
    /// Drop instance-type options priced at or above `max_price`.
    ///
    /// Relative order is preserved, so the cheapest surviving option stays
    /// first.
    pub fn filter_by_price(&mut self, max_price: f64) {
        self.instance_type_options.retain(|it| it.price < max_price);
    }

    /// Whether the proposal's requirements admit spot capacity.
    pub fn allows_spot(&self) -> bool {
        self.capacity_types
            .contains(crate::crd::CAPACITY_TYPE_SPOT)
    }
}

/// Pods the simulation placed onto an existing node.
#[derive(Clone, Debug)]
pub struct InflightPlacement {
    /// Name of the existing node absorbing the pods
    pub node_name: String,
    /// The pods placed there
    pub pods: Vec<Pod>,
}

/// Outcome of one scheduling simulation.
#[derive(Clone, Debug, Default)]
pub struct Simulation {
    /// Additional nodes the scheduler would need to provision
    pub new_nodes: Vec<ProposedNode>,
    /// Placements on the existing fleet
    pub inflight: Vec<InflightPlacement>,
}

impl Simulation {
    /// Total number of pods the simulation placed on existing nodes.
    pub fn pods_placed_on_existing(&self) -> usize {
        self.inflight.iter().map(|p| p.pods.len()).sum()
    }
}

/// The provisioning-subsystem interface the controller consumes.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Provisioning: Send + Sync {
    /// Simulate placing `pods` on the fleet described by `state_nodes`,
    /// excluding `excluded_node` from the usable capacity.
    ///
    /// Side-effect free; `state_nodes` are deep copies owned by the caller.
    async fn simulate(
        &self,
        pods: Vec<Pod>,
        state_nodes: Vec<NodeSnapshot>,
        excluded_node: &str,
    ) -> Result<Simulation>;

    /// Launch the proposed node and return the created node names.
    ///
    /// `record_pod_nomination` is false for consolidation launches: the pod
    /// set came from a simulation, not from real pending-pod bindings, so the
    /// scheduler must not treat the new node as nominated.
    async fn launch(&self, node: &ProposedNode, record_pod_nomination: bool)
        -> Result<Vec<String>>;
}
