//! Read-only cluster-state observer seam
//!
//! The embedding orchestrator maintains a live, callback-driven view of nodes
//! and the pods bound to them. The controller only ever reads it: per tick it
//! copies the visited nodes into an owned snapshot so no observer lock is held
//! across candidate filtering or scheduling simulation.

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Node;

/// One node as seen by the cluster-state observer.
///
/// A plain value: cloning it deep-copies the underlying node object, which is
/// what isolates the scheduling simulation from concurrent observer updates.
#[derive(Clone, Debug)]
pub struct NodeSnapshot {
    /// The observed node object
    pub node: Node,
}

impl NodeSnapshot {
    /// Create a snapshot of the given node.
    pub fn new(node: Node) -> Self {
        Self { node }
    }

    /// The node's name; empty string when metadata is incomplete.
    pub fn name(&self) -> &str {
        self.node.metadata.name.as_deref().unwrap_or_default()
    }
}

/// The cluster-state observer interface the controller consumes.
///
/// Implementations must be safe to call from the controller task while the
/// observer is concurrently updated; `for_each_node` is expected to visit
/// under the observer's own lock.
pub trait ClusterState: Send + Sync {
    /// Visit every live node.
    fn for_each_node(&self, visit: &mut dyn FnMut(&NodeSnapshot));

    /// Whether the scheduler has tentatively targeted this node for pending
    /// pods that have not yet bound.
    fn is_node_nominated(&self, node_name: &str) -> bool;

    /// When the controller (or anything else) last deleted a node.
    fn last_node_deletion_time(&self) -> DateTime<Utc>;

    /// Opaque fingerprint of cluster shape; changes whenever a consolidation
    /// decision might plausibly differ. Compared only for equality.
    fn consolidation_state(&self) -> i64;
}

/// Copy all visited nodes out of the observer.
///
/// The observer's lock is only held for the duration of the visit; everything
/// downstream works on the returned owned values.
pub fn snapshot_nodes(state: &dyn ClusterState) -> Vec<NodeSnapshot> {
    let mut nodes = Vec::new();
    state.for_each_node(&mut |n| nodes.push(n.clone()));
    nodes
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ObjectMeta;

    struct TwoNodeState;

    impl ClusterState for TwoNodeState {
        fn for_each_node(&self, visit: &mut dyn FnMut(&NodeSnapshot)) {
            for name in ["worker-1", "worker-2"] {
                let snapshot = NodeSnapshot::new(Node {
                    metadata: ObjectMeta {
                        name: Some(name.to_string()),
                        ..Default::default()
                    },
                    ..Default::default()
                });
                visit(&snapshot);
            }
        }

        fn is_node_nominated(&self, _node_name: &str) -> bool {
            false
        }

        fn last_node_deletion_time(&self) -> DateTime<Utc> {
            DateTime::<Utc>::MIN_UTC
        }

        fn consolidation_state(&self) -> i64 {
            0
        }
    }

    #[test]
    fn snapshot_copies_every_visited_node() {
        let nodes = snapshot_nodes(&TwoNodeState);
        let names: Vec<&str> = nodes.iter().map(|n| n.name()).collect();
        assert_eq!(names, vec!["worker-1", "worker-2"]);
    }

    #[test]
    fn snapshot_name_defaults_to_empty() {
        let snapshot = NodeSnapshot::new(Node::default());
        assert_eq!(snapshot.name(), "");
    }
}
