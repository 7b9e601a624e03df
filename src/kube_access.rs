//! API-server access seam
//!
//! [`KubeApi`] names exactly the operations the controller performs against
//! the cluster, so tests can mock them and production code stays a thin
//! wrapper over `kube::Api`. All list calls return owned items; the
//! controller never watches.

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{ReplicaSet, StatefulSet};
use k8s_openapi::api::core::v1::{Node, Pod, ReplicationController};
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams};
use kube::Client;

#[cfg(test)]
use mockall::automock;

use crate::crd::Provisioner;
use crate::Result;

/// The Kubernetes API operations the consolidation controller performs.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KubeApi: Send + Sync {
    /// List all Provisioner policies.
    async fn list_provisioners(&self) -> Result<Vec<Provisioner>>;

    /// List the pods bound to the given node.
    async fn list_pods_on_node(&self, node_name: &str) -> Result<Vec<Pod>>;

    /// List pods not bound to any node.
    async fn list_unscheduled_pods(&self) -> Result<Vec<Pod>>;

    /// List all PodDisruptionBudgets across namespaces.
    async fn list_pdbs(&self) -> Result<Vec<PodDisruptionBudget>>;

    /// List all ReplicaSets across namespaces.
    async fn list_replicasets(&self) -> Result<Vec<ReplicaSet>>;

    /// List all ReplicationControllers across namespaces.
    async fn list_replication_controllers(&self) -> Result<Vec<ReplicationController>>;

    /// List all StatefulSets across namespaces.
    async fn list_statefulsets(&self) -> Result<Vec<StatefulSet>>;

    /// Fetch one node by name.
    async fn get_node(&self, name: &str) -> Result<Node>;

    /// Cordon or uncordon a node.
    ///
    /// Idempotent: a node already in the requested state is left untouched,
    /// and an uncordon of a node that is already being deleted is skipped.
    async fn set_node_unschedulable(&self, name: &str, unschedulable: bool) -> Result<()>;

    /// Delete a node object.
    async fn delete_node(&self, name: &str) -> Result<()>;
}

/// Production implementation over `kube::Client`.
#[derive(Clone)]
pub struct KubeApiClient {
    client: Client,
}

impl KubeApiClient {
    /// Wrap the given client.
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn nodes(&self) -> Api<Node> {
        Api::all(self.client.clone())
    }
}

#[async_trait]
impl KubeApi for KubeApiClient {
    async fn list_provisioners(&self) -> Result<Vec<Provisioner>> {
        let api: Api<Provisioner> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn list_pods_on_node(&self, node_name: &str) -> Result<Vec<Pod>> {
        let api: Api<Pod> = Api::all(self.client.clone());
        let params = ListParams::default().fields(&format!("spec.nodeName={}", node_name));
        Ok(api.list(&params).await?.items)
    }

    async fn list_unscheduled_pods(&self) -> Result<Vec<Pod>> {
        let api: Api<Pod> = Api::all(self.client.clone());
        let params = ListParams::default().fields("spec.nodeName=");
        Ok(api.list(&params).await?.items)
    }

    async fn list_pdbs(&self) -> Result<Vec<PodDisruptionBudget>> {
        let api: Api<PodDisruptionBudget> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn list_replicasets(&self) -> Result<Vec<ReplicaSet>> {
        let api: Api<ReplicaSet> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn list_replication_controllers(&self) -> Result<Vec<ReplicationController>> {
        let api: Api<ReplicationController> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn list_statefulsets(&self) -> Result<Vec<StatefulSet>> {
        let api: Api<StatefulSet> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn get_node(&self, name: &str) -> Result<Node> {
        Ok(self.nodes().get(name).await?)
    }

    async fn set_node_unschedulable(&self, name: &str, unschedulable: bool) -> Result<()> {
        let api = self.nodes();
        let node = api.get(name).await?;

        // node is being deleted already, no need to un-cordon
        if !unschedulable && node.metadata.deletion_timestamp.is_some() {
            return Ok(());
        }

        let current = node
            .spec
            .as_ref()
            .and_then(|s| s.unschedulable)
            .unwrap_or(false);
        if current == unschedulable {
            return Ok(());
        }

        let patch = serde_json::json!({
            "spec": { "unschedulable": unschedulable }
        });
        api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn delete_node(&self, name: &str) -> Result<()> {
        self.nodes().delete(name, &DeleteParams::default()).await?;
        Ok(())
    }
}
