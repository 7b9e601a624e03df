//! Action planning
//!
//! Turns one candidate into a concrete consolidation action by asking the
//! scheduling simulation where the candidate's pods would go. The action is a
//! closed set of outcomes, so it is a plain tagged variant rather than a
//! trait object.

use std::fmt;

use k8s_openapi::api::core::v1::Node;
use tracing::error;

use crate::candidates::CandidateNode;
use crate::clock::Clock;
use crate::cost::{disruption_cost, lifetime_remaining};
use crate::metrics;
use crate::simulate::{ProposedNode, Provisioning};
use crate::state::{snapshot_nodes, ClusterState};
use crate::Result;

/// The outcome of analyzing one tick's candidates.
#[derive(Clone, Debug)]
pub enum ConsolidationAction {
    /// Delete nodes that host no reschedulable pods; batched per tick
    DeleteEmpty {
        /// The empty nodes to delete
        nodes: Vec<Node>,
    },
    /// Delete one node; its pods fit on the existing fleet as-is
    Delete {
        /// The node to delete
        node: Node,
        /// Price of the deleted node per unit time
        savings: f64,
        /// Cost of evicting the node's pods, scaled by lifetime remaining
        disruption_cost: f64,
    },
    /// Remove one node and launch a single cheaper node for its pods
    Replace {
        /// The node to delete
        node: Node,
        /// The replacement the scheduler proposed, price-filtered
        replacement: ProposedNode,
        /// Old price minus the cheapest surviving replacement option
        savings: f64,
        /// Cost of evicting the node's pods, scaled by lifetime remaining
        disruption_cost: f64,
    },
    /// The candidate cannot be consolidated under current constraints
    NotPossible,
    /// Analysis failed; try again on a later tick
    Unknown,
}

impl ConsolidationAction {
    /// Whether the executor has anything to do for this action.
    pub fn is_actionable(&self) -> bool {
        matches!(
            self,
            ConsolidationAction::DeleteEmpty { .. }
                | ConsolidationAction::Delete { .. }
                | ConsolidationAction::Replace { .. }
        )
    }

    /// Metric label for this action.
    pub fn label(&self) -> &'static str {
        match self {
            ConsolidationAction::DeleteEmpty { .. } => "delete-empty",
            ConsolidationAction::Delete { .. } => "delete",
            ConsolidationAction::Replace { .. } => "replace",
            ConsolidationAction::NotPossible => "not-possible",
            ConsolidationAction::Unknown => "unknown",
        }
    }

    /// The nodes this action would remove.
    pub fn old_nodes(&self) -> Vec<&Node> {
        match self {
            ConsolidationAction::DeleteEmpty { nodes } => nodes.iter().collect(),
            ConsolidationAction::Delete { node, .. }
            | ConsolidationAction::Replace { node, .. } => vec![node],
            _ => Vec::new(),
        }
    }
}

impl fmt::Display for ConsolidationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsolidationAction::DeleteEmpty { nodes } => {
                let names: Vec<&str> = nodes
                    .iter()
                    .map(|n| n.metadata.name.as_deref().unwrap_or_default())
                    .collect();
                write!(f, "delete empty nodes {}", names.join(", "))
            }
            ConsolidationAction::Delete { node, savings, .. } => write!(
                f,
                "delete {} (saving {:.3}/hr)",
                node.metadata.name.as_deref().unwrap_or_default(),
                savings
            ),
            ConsolidationAction::Replace {
                node,
                replacement,
                savings,
                ..
            } => write!(
                f,
                "replace {} with {} (saving {:.3}/hr)",
                node.metadata.name.as_deref().unwrap_or_default(),
                replacement
                    .instance_type_options
                    .first()
                    .map(|it| it.name.as_str())
                    .unwrap_or("?"),
                savings
            ),
            ConsolidationAction::NotPossible => f.write_str("consolidation not possible"),
            ConsolidationAction::Unknown => f.write_str("unknown"),
        }
    }
}

/// Decide what to do with one non-empty candidate.
///
/// Simulation failures are logged and collapse to [`ConsolidationAction::Unknown`]
/// so the caller can move on to the next candidate. The disruption cost on
/// the returned action is discounted by the node's remaining lifetime: a node
/// about to expire is cheap to disrupt. The discount annotates the action
/// only; whether consolidation happens never depends on it.
pub async fn consolidation_action(
    candidate: &CandidateNode,
    cluster: &dyn ClusterState,
    provisioning: &dyn Provisioning,
    clock: &dyn Clock,
) -> ConsolidationAction {
    let lifetime = lifetime_remaining(&candidate.provisioner.spec, candidate.created(), clock.now());

    let action = match replace_or_delete(candidate, cluster, provisioning).await {
        Ok(action) => action,
        Err(e) => {
            error!(node = candidate.name(), error = %e, "Consolidating node (replace)");
            ConsolidationAction::Unknown
        }
    };

    scale_disruption_cost(action, lifetime)
}

/// Simulate placing the candidate's pods on the fleet without it, and read
/// the verdict off the simulation shape.
async fn replace_or_delete(
    candidate: &CandidateNode,
    cluster: &dyn ClusterState,
    provisioning: &dyn Provisioning,
) -> Result<ConsolidationAction> {
    let _timer = metrics::measure_evaluation("replace/delete");

    // deep copies, so concurrent observer updates cannot skew the simulation
    let state_nodes = snapshot_nodes(cluster);
    let simulation = provisioning
        .simulate(candidate.pods.clone(), state_nodes, candidate.name())
        .await?;

    // everything fits on the fleet that already exists
    if simulation.new_nodes.is_empty()
        && simulation.pods_placed_on_existing() == candidate.pods.len()
    {
        return Ok(ConsolidationAction::Delete {
            node: candidate.node.clone(),
            savings: candidate.instance_type.price,
            disruption_cost: disruption_cost(&candidate.pods),
        });
    }

    // we're not going to turn a single node into multiple nodes
    if simulation.new_nodes.len() != 1 {
        return Ok(ConsolidationAction::NotPossible);
    }

    let old_price = candidate.instance_type.price;
    let Some(mut replacement) = simulation.new_nodes.into_iter().next() else {
        return Ok(ConsolidationAction::NotPossible);
    };
    replacement.filter_by_price(old_price);
    if replacement.instance_type_options.is_empty() {
        // no instance types remain after filtering by price
        return Ok(ConsolidationAction::NotPossible);
    }

    // A spot node replaced by another spot node is refused outright: there is
    // no reliable signal that the new spot pool is any less likely to be
    // reclaimed than the one we already hold.
    if candidate.is_spot() && replacement.allows_spot() {
        return Ok(ConsolidationAction::NotPossible);
    }

    let savings = old_price - replacement.instance_type_options[0].price;

    Ok(ConsolidationAction::Replace {
        node: candidate.node.clone(),
        savings,
        disruption_cost: disruption_cost(&candidate.pods),
        replacement,
    })
}

fn scale_disruption_cost(action: ConsolidationAction, lifetime: f64) -> ConsolidationAction {
    match action {
        ConsolidationAction::Delete {
            node,
            savings,
            disruption_cost,
        } => ConsolidationAction::Delete {
            node,
            savings,
            disruption_cost: disruption_cost * lifetime,
        },
        ConsolidationAction::Replace {
            node,
            replacement,
            savings,
            disruption_cost,
        } => ConsolidationAction::Replace {
            node,
            replacement,
            savings,
            disruption_cost: disruption_cost * lifetime,
        },
        other => other,
    }
}
