//! Eviction gate
//!
//! Fast pre-checks that decide whether a candidate's pods could be moved at
//! all, so a tick never pays for scheduling simulation on a node that can't
//! be touched. Rejections are silent skips at the call site; the reason is
//! only for debug logging.

use std::fmt;

use crate::candidates::CandidateNode;
use crate::pdb::PdbLimits;
use crate::pods;

/// Why a candidate cannot be terminated this tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TerminationBlock {
    /// The node already has a deletion timestamp
    AlreadyDeleting,
    /// A PodDisruptionBudget forbids evicting one of the pods
    BlockedByPdb,
    /// A pod carries the do-not-evict annotation
    DoNotEvictPod,
    /// A pod has no controlling owner and could not be recreated
    PodWithoutController,
}

impl fmt::Display for TerminationBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            TerminationBlock::AlreadyDeleting => "already being deleted",
            TerminationBlock::BlockedByPdb => "not eligible for termination due to PDBs",
            TerminationBlock::DoNotEvictPod => "found do-not-evict pod",
            TerminationBlock::PodWithoutController => "found pod with no controller",
        };
        f.write_str(reason)
    }
}

/// Whether this candidate's pods may be moved.
///
/// Terminating, terminal, and node-owned pods are ignored: they do not need
/// rescheduling, so they cannot block it.
pub fn can_be_terminated(
    candidate: &CandidateNode,
    pdbs: &PdbLimits,
) -> Result<(), TerminationBlock> {
    if candidate.node.metadata.deletion_timestamp.is_some() {
        return Err(TerminationBlock::AlreadyDeleting);
    }
    if !pdbs.can_evict_pods(&candidate.pods) {
        return Err(TerminationBlock::BlockedByPdb);
    }
    pods_prevent_eviction(candidate)
}

fn pods_prevent_eviction(candidate: &CandidateNode) -> Result<(), TerminationBlock> {
    for pod in &candidate.pods {
        if pods::is_terminating(pod) || pods::is_terminal(pod) || pods::is_owned_by_node(pod) {
            continue;
        }
        if pods::has_do_not_evict(pod) {
            return Err(TerminationBlock::DoNotEvictPod);
        }
        if !pods::has_controller_owner(pod) {
            return Err(TerminationBlock::PodWithoutController);
        }
    }
    Ok(())
}
