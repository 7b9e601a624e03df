//! Pod classification helpers
//!
//! The selector, eviction gate, and stabilization window all reason about
//! pods through these predicates. They operate on the raw `k8s_openapi` pod
//! so the rest of the controller never touches optional metadata directly.

use k8s_openapi::api::core::v1::Pod;

use crate::crd::DO_NOT_EVICT_ANNOTATION;

/// Whether the pod is bound directly to a node object (static/mirror pods).
///
/// Such pods disappear with their node and never need rescheduling.
pub fn is_owned_by_node(pod: &Pod) -> bool {
    owner_kinds(pod).any(|kind| kind == "Node")
}

/// Whether the pod is managed by a DaemonSet.
pub fn is_owned_by_daemonset(pod: &Pod) -> bool {
    owner_kinds(pod).any(|kind| kind == "DaemonSet")
}

/// Whether the pod has any controlling owner at all.
///
/// A pod with no controller cannot be recreated after eviction.
pub fn has_controller_owner(pod: &Pod) -> bool {
    pod.metadata
        .owner_references
        .as_deref()
        .unwrap_or_default()
        .iter()
        .any(|r| r.controller.unwrap_or(false))
}

/// Whether the pod has reached a terminal phase (Succeeded or Failed).
pub fn is_terminal(pod: &Pod) -> bool {
    matches!(phase(pod), Some("Succeeded") | Some("Failed"))
}

/// Whether the pod is being deleted.
pub fn is_terminating(pod: &Pod) -> bool {
    pod.metadata.deletion_timestamp.is_some()
}

/// Whether the pod carries the do-not-evict annotation.
pub fn has_do_not_evict(pod: &Pod) -> bool {
    pod.metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(DO_NOT_EVICT_ANNOTATION))
        .map(|v| v == "true")
        .unwrap_or(false)
}

/// Whether the pod is bound to a node.
pub fn is_scheduled(pod: &Pod) -> bool {
    pod.spec
        .as_ref()
        .and_then(|s| s.node_name.as_deref())
        .map(|n| !n.is_empty())
        .unwrap_or(false)
}

/// Whether the pod is waiting for the provisioning subsystem to create
/// capacity: unscheduled, not finished, and marked unschedulable by the
/// kube-scheduler.
pub fn is_provisionable(pod: &Pod) -> bool {
    !is_scheduled(pod) && !is_terminal(pod) && failed_to_schedule(pod)
}

fn failed_to_schedule(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map(|conditions| {
            conditions.iter().any(|c| {
                c.type_ == "PodScheduled"
                    && c.status == "False"
                    && c.reason.as_deref() == Some("Unschedulable")
            })
        })
        .unwrap_or(false)
}

fn phase(pod: &Pod) -> Option<&str> {
    pod.status.as_ref().and_then(|s| s.phase.as_deref())
}

fn owner_kinds(pod: &Pod) -> impl Iterator<Item = &str> {
    pod.metadata
        .owner_references
        .as_deref()
        .unwrap_or_default()
        .iter()
        .map(|r| r.kind.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{PodCondition, PodSpec, PodStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference, Time};
    use rstest::rstest;
    use std::collections::BTreeMap;

    fn pod() -> Pod {
        Pod::default()
    }

    fn pod_owned_by(kind: &str, controller: bool) -> Pod {
        Pod {
            metadata: ObjectMeta {
                owner_references: Some(vec![OwnerReference {
                    api_version: "apps/v1".to_string(),
                    kind: kind.to_string(),
                    name: "owner".to_string(),
                    uid: "uid-1".to_string(),
                    controller: Some(controller),
                    ..Default::default()
                }]),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn pod_in_phase(phase: &str) -> Pod {
        Pod {
            status: Some(PodStatus {
                phase: Some(phase.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn ownership_predicates_match_owner_kinds() {
        assert!(is_owned_by_node(&pod_owned_by("Node", true)));
        assert!(!is_owned_by_node(&pod_owned_by("ReplicaSet", true)));
        assert!(is_owned_by_daemonset(&pod_owned_by("DaemonSet", true)));
        assert!(!is_owned_by_daemonset(&pod()));
    }

    #[test]
    fn controller_owner_requires_the_controller_flag() {
        assert!(has_controller_owner(&pod_owned_by("ReplicaSet", true)));
        // owner reference present but not a controller
        assert!(!has_controller_owner(&pod_owned_by("ReplicaSet", false)));
        assert!(!has_controller_owner(&pod()));
    }

    #[rstest]
    #[case::succeeded("Succeeded", true)]
    #[case::failed("Failed", true)]
    #[case::running("Running", false)]
    #[case::pending("Pending", false)]
    #[case::unknown("Unknown", false)]
    fn terminal_phases_are_succeeded_and_failed(#[case] phase: &str, #[case] terminal: bool) {
        assert_eq!(is_terminal(&pod_in_phase(phase)), terminal);
        assert!(!is_terminal(&pod()));
    }

    #[test]
    fn terminating_means_deletion_timestamp_set() {
        let mut p = pod();
        assert!(!is_terminating(&p));
        p.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
        assert!(is_terminating(&p));
    }

    #[test]
    fn do_not_evict_requires_the_true_value() {
        let mut p = pod();
        assert!(!has_do_not_evict(&p));

        let mut annotations = BTreeMap::new();
        annotations.insert(DO_NOT_EVICT_ANNOTATION.to_string(), "false".to_string());
        p.metadata.annotations = Some(annotations.clone());
        assert!(!has_do_not_evict(&p));

        annotations.insert(DO_NOT_EVICT_ANNOTATION.to_string(), "true".to_string());
        p.metadata.annotations = Some(annotations);
        assert!(has_do_not_evict(&p));
    }

    #[test]
    fn provisionable_pods_are_unscheduled_and_unschedulable() {
        let unschedulable = Pod {
            status: Some(PodStatus {
                phase: Some("Pending".to_string()),
                conditions: Some(vec![PodCondition {
                    type_: "PodScheduled".to_string(),
                    status: "False".to_string(),
                    reason: Some("Unschedulable".to_string()),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(is_provisionable(&unschedulable));

        // already bound
        let mut scheduled = unschedulable.clone();
        scheduled.spec = Some(PodSpec {
            node_name: Some("worker-1".to_string()),
            ..Default::default()
        });
        assert!(!is_provisionable(&scheduled));

        // freshly created, scheduler has not reported yet
        assert!(!is_provisionable(&pod_in_phase("Pending")));
    }
}
