//! Shared fixtures for controller tests: node/pod builders and a scripted
//! cluster-state observer.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::{Node, NodeSpec, Pod, PodSpec, PodStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference, Time};

use crate::crd::{
    ConsolidationSpec, Provisioner, ProvisionerSpec, CAPACITY_TYPE_LABEL, INITIALIZED_LABEL,
    INSTANCE_TYPE_LABEL, PROVISIONER_NAME_LABEL,
};
use crate::state::{ClusterState, NodeSnapshot};

/// Builder for worker nodes with the labels the controller reads.
pub struct NodeBuilder {
    name: String,
    labels: BTreeMap<String, String>,
    annotations: BTreeMap<String, String>,
    created: Option<DateTime<Utc>>,
    deletion_timestamp: Option<DateTime<Utc>>,
    unschedulable: bool,
}

impl NodeBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
            created: None,
            deletion_timestamp: None,
            unschedulable: false,
        }
    }

    /// Standard consolidatable worker: bound to a provisioner, initialized,
    /// with a resolvable instance type.
    pub fn worker(name: &str, provisioner: &str, instance_type: &str) -> Self {
        Self::new(name)
            .label(PROVISIONER_NAME_LABEL, provisioner)
            .label(INITIALIZED_LABEL, "true")
            .label(INSTANCE_TYPE_LABEL, instance_type)
    }

    pub fn label(mut self, key: &str, value: &str) -> Self {
        self.labels.insert(key.to_string(), value.to_string());
        self
    }

    pub fn annotation(mut self, key: &str, value: &str) -> Self {
        self.annotations.insert(key.to_string(), value.to_string());
        self
    }

    pub fn capacity_type(self, value: &str) -> Self {
        self.label(CAPACITY_TYPE_LABEL, value)
    }

    pub fn uninitialized(mut self) -> Self {
        self.labels
            .insert(INITIALIZED_LABEL.to_string(), "false".to_string());
        self
    }

    pub fn created_at(mut self, t: DateTime<Utc>) -> Self {
        self.created = Some(t);
        self
    }

    pub fn deleting(mut self) -> Self {
        self.deletion_timestamp = Some(Utc::now());
        self
    }

    pub fn cordoned(mut self) -> Self {
        self.unschedulable = true;
        self
    }

    pub fn build(self) -> Node {
        Node {
            metadata: ObjectMeta {
                name: Some(self.name),
                uid: Some("node-uid".to_string()),
                labels: Some(self.labels),
                annotations: Some(self.annotations),
                creation_timestamp: self.created.map(Time),
                deletion_timestamp: self.deletion_timestamp.map(Time),
                ..Default::default()
            },
            spec: Some(NodeSpec {
                unschedulable: Some(self.unschedulable),
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

/// Builder for pods in the shapes the controller cares about.
pub struct PodBuilder {
    name: String,
    namespace: String,
    labels: BTreeMap<String, String>,
    annotations: BTreeMap<String, String>,
    owner: Option<(String, bool)>,
    phase: Option<String>,
    node_name: Option<String>,
    priority: Option<i32>,
}

impl PodBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: "default".to_string(),
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
            owner: None,
            phase: Some("Running".to_string()),
            node_name: None,
            priority: None,
        }
    }

    /// Pod controlled by a ReplicaSet, the common reschedulable shape.
    pub fn replicaset_pod(name: &str) -> Self {
        Self::new(name).owned_by("ReplicaSet")
    }

    pub fn namespace(mut self, ns: &str) -> Self {
        self.namespace = ns.to_string();
        self
    }

    pub fn label(mut self, key: &str, value: &str) -> Self {
        self.labels.insert(key.to_string(), value.to_string());
        self
    }

    pub fn annotation(mut self, key: &str, value: &str) -> Self {
        self.annotations.insert(key.to_string(), value.to_string());
        self
    }

    pub fn owned_by(mut self, kind: &str) -> Self {
        self.owner = Some((kind.to_string(), true));
        self
    }

    pub fn phase(mut self, phase: &str) -> Self {
        self.phase = Some(phase.to_string());
        self
    }

    pub fn on_node(mut self, node: &str) -> Self {
        self.node_name = Some(node.to_string());
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn build(self) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(self.name),
                namespace: Some(self.namespace),
                labels: Some(self.labels),
                annotations: Some(self.annotations),
                owner_references: self.owner.map(|(kind, controller)| {
                    vec![OwnerReference {
                        api_version: "apps/v1".to_string(),
                        kind,
                        name: "owner".to_string(),
                        uid: "owner-uid".to_string(),
                        controller: Some(controller),
                        ..Default::default()
                    }]
                }),
                ..Default::default()
            },
            spec: Some(PodSpec {
                node_name: self.node_name,
                priority: self.priority,
                ..Default::default()
            }),
            status: Some(PodStatus {
                phase: self.phase,
                ..Default::default()
            }),
        }
    }
}

/// Scripted cluster-state observer.
pub struct FakeClusterState {
    pub nodes: Vec<Node>,
    pub nominated: Vec<String>,
    pub last_deletion: DateTime<Utc>,
    pub fingerprint: Mutex<i64>,
}

impl FakeClusterState {
    pub fn with_nodes(nodes: Vec<Node>) -> Self {
        Self {
            nodes,
            nominated: Vec::new(),
            last_deletion: DateTime::<Utc>::MIN_UTC,
            fingerprint: Mutex::new(1),
        }
    }
}

impl ClusterState for FakeClusterState {
    fn for_each_node(&self, visit: &mut dyn FnMut(&NodeSnapshot)) {
        for node in &self.nodes {
            visit(&NodeSnapshot::new(node.clone()));
        }
    }

    fn is_node_nominated(&self, node_name: &str) -> bool {
        self.nominated.iter().any(|n| n == node_name)
    }

    fn last_node_deletion_time(&self) -> DateTime<Utc> {
        self.last_deletion
    }

    fn consolidation_state(&self) -> i64 {
        *self.fingerprint.lock().unwrap()
    }
}

/// A provisioner named `name` with consolidation enabled.
pub fn consolidating_provisioner(name: &str) -> Provisioner {
    provisioner_with_spec(
        name,
        ProvisionerSpec {
            consolidation: Some(ConsolidationSpec {
                enabled: Some(true),
            }),
            ttl_seconds_until_expired: None,
        },
    )
}

pub fn provisioner_with_spec(name: &str, spec: ProvisionerSpec) -> Provisioner {
    let mut provisioner = Provisioner::new(name, spec);
    provisioner.metadata.name = Some(name.to_string());
    provisioner
}
