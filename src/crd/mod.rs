//! Custom resources and well-known keys for the consolidation controller
//!
//! The [`Provisioner`] resource carries the per-fleet policy the controller
//! consumes: whether consolidation is enabled and the optional node expiry
//! TTL. The label and annotation constants below are the controller's wire
//! contract with node and pod authors.

mod provisioner;

pub use provisioner::{ConsolidationSpec, Provisioner, ProvisionerSpec};

/// Node label binding a node to the [`Provisioner`] policy that owns it.
pub const PROVISIONER_NAME_LABEL: &str = "defrag.dev/provisioner-name";

/// Node label set once the node is ready to host workloads.
///
/// Candidate selection requires the value `"true"`; the replacement readiness
/// wait only requires the key to appear.
pub const INITIALIZED_LABEL: &str = "defrag.dev/initialized";

/// Node label naming the capacity type the node was launched with.
pub const CAPACITY_TYPE_LABEL: &str = "defrag.dev/capacity-type";

/// Capacity type for interruptible, discounted instances.
pub const CAPACITY_TYPE_SPOT: &str = "spot";

/// Capacity type for regular instances.
pub const CAPACITY_TYPE_ON_DEMAND: &str = "on-demand";

/// Standard node label resolving the node's instance type in the catalog.
pub const INSTANCE_TYPE_LABEL: &str = "node.kubernetes.io/instance-type";

/// Node annotation excluding a node from consolidation entirely.
pub const DO_NOT_CONSOLIDATE_ANNOTATION: &str = "defrag.dev/do-not-consolidate";

/// Pod annotation blocking eviction of the pod (and so its node).
pub const DO_NOT_EVICT_ANNOTATION: &str = "defrag.dev/do-not-evict";

/// Standard pod annotation declaring the relative cost of deleting the pod.
pub const POD_DELETION_COST_ANNOTATION: &str = "controller.kubernetes.io/pod-deletion-cost";
