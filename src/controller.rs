//! Loop driver
//!
//! The consolidation controller is not a reconcile-style controller: it has
//! no resource of its own to watch. Instead one long-lived task ticks on a
//! fixed period, and each tick runs at most one consolidation. Two gates keep
//! the loop quiet when acting would be pointless or risky:
//!
//! - a memoized cluster-shape fingerprint skips ticks when nothing that could
//!   change the decision has changed since the last fruitless pass;
//! - a stabilization window holds off after a recent node deletion unless the
//!   cluster looks fully healthy (no provisionable pending pods, every
//!   ReplicaSet, ReplicationController and StatefulSet at its desired ready
//!   count).
//!
//! Errors never stop the loop; only cancellation does.

use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use k8s_openapi::api::core::v1::Node;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::candidates::{candidate_nodes, sort_by_disruption_cost};
use crate::clock::Clock;
use crate::events::EventPublisher;
use crate::execute::Executor;
use crate::gate::can_be_terminated;
use crate::kube_access::KubeApi;
use crate::pdb::PdbLimits;
use crate::plan::{consolidation_action, ConsolidationAction};
use crate::pods;
use crate::provider::CloudProvider;
use crate::simulate::Provisioning;
use crate::state::ClusterState;
use crate::Result;

/// How often the cluster is inspected for consolidation opportunities.
pub const DEFAULT_POLLING_PERIOD: Duration = Duration::from_secs(10);

/// Tunables for the loop driver.
#[derive(Clone, Debug)]
pub struct ControllerConfig {
    /// Interval between ticks
    pub polling_period: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            polling_period: DEFAULT_POLLING_PERIOD,
        }
    }
}

/// Outcome of one pass over the cluster.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessResult {
    /// An action was performed; the tick ended early
    Consolidated,
    /// No candidate could be consolidated
    NothingToDo,
}

/// The consolidation controller.
///
/// Owns trait objects for every collaborator so the embedding orchestrator
/// wires production implementations and tests wire mocks.
pub struct Controller {
    kube: Arc<dyn KubeApi>,
    cluster: Arc<dyn ClusterState>,
    cloud: Arc<dyn CloudProvider>,
    provisioning: Arc<dyn Provisioning>,
    recorder: Arc<dyn EventPublisher>,
    clock: Arc<dyn Clock>,
    config: ControllerConfig,
    last_consolidation_state: i64,
}

impl Controller {
    /// Create a controller over the given collaborators.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        kube: Arc<dyn KubeApi>,
        cluster: Arc<dyn ClusterState>,
        cloud: Arc<dyn CloudProvider>,
        provisioning: Arc<dyn Provisioning>,
        recorder: Arc<dyn EventPublisher>,
        clock: Arc<dyn Clock>,
        config: ControllerConfig,
    ) -> Self {
        Self {
            kube,
            cluster,
            cloud,
            provisioning,
            recorder,
            clock,
            config,
            last_consolidation_state: 0,
        }
    }

    /// Run the loop until cancellation.
    ///
    /// Ticking only begins once `start` fires, giving the embedding
    /// orchestrator a chance to warm its caches; a dropped sender is treated
    /// as cancellation.
    pub async fn run(mut self, start: oneshot::Receiver<()>, cancel: CancellationToken) {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("Shutting down");
                return;
            }
            started = start => {
                if started.is_err() {
                    info!("Start signal dropped, shutting down");
                    return;
                }
            }
        }

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Shutting down");
                    return;
                }
                _ = tokio::time::sleep(self.config.polling_period) => {
                    self.tick().await;
                }
            }
        }
    }

    /// One pass of the gated loop body.
    pub(crate) async fn tick(&mut self) {
        // the last pass couldn't improve things and nothing relevant has
        // changed since
        if self.last_consolidation_state == self.cluster.consolidation_state() {
            return;
        }

        // don't consolidate again too soon after a scale-down
        let window = self.stabilization_window().await;
        if self.cluster.last_node_deletion_time() >= self.clock.now() - window {
            debug!("Within stabilization window, skipping tick");
            return;
        }

        match self.process_cluster().await {
            Err(e) => error!(error = %e, "Consolidating cluster"),
            Ok(ProcessResult::NothingToDo) => {
                self.last_consolidation_state = self.cluster.consolidation_state();
            }
            Ok(ProcessResult::Consolidated) => {}
        }
    }

    /// Analyze the cluster and perform at most one consolidation.
    ///
    /// Exposed for the embedding orchestrator's tests and manual invocation.
    pub async fn process_cluster(&self) -> Result<ProcessResult> {
        let mut candidates = candidate_nodes(
            self.kube.as_ref(),
            self.cluster.as_ref(),
            self.cloud.as_ref(),
        )
        .await?;
        if candidates.is_empty() {
            return Ok(ProcessResult::NothingToDo);
        }

        let executor = Executor::new(
            self.kube.as_ref(),
            self.provisioning.as_ref(),
            self.recorder.as_ref(),
        );

        // empty nodes are deletable without simulation; batch them all
        let empty_nodes: Vec<Node> = candidates
            .iter()
            .filter(|c| c.is_empty())
            .map(|c| c.node.clone())
            .collect();
        if !empty_nodes.is_empty() {
            executor
                .perform(&ConsolidationAction::DeleteEmpty { nodes: empty_nodes })
                .await;
            return Ok(ProcessResult::Consolidated);
        }

        let pdbs = PdbLimits::new(self.kube.as_ref()).await?;

        // cheapest disruption first; the first workable candidate wins
        sort_by_disruption_cost(&mut candidates);
        for candidate in &candidates {
            if let Err(reason) = can_be_terminated(candidate, &pdbs) {
                debug!(node = candidate.name(), %reason, "Skipping candidate");
                continue;
            }
            let action = consolidation_action(
                candidate,
                self.cluster.as_ref(),
                self.provisioning.as_ref(),
                self.clock.as_ref(),
            )
            .await;
            if action.is_actionable() {
                executor.perform(&action).await;
                return Ok(ProcessResult::Consolidated);
            }
        }
        Ok(ProcessResult::NothingToDo)
    }

    /// Zero when the cluster is fully healthy, five minutes otherwise.
    ///
    /// List failures count as not-healthy: when in doubt the controller
    /// prefers waiting over acting on a cluster it cannot see clearly.
    async fn stabilization_window(&self) -> ChronoDuration {
        if !self.has_provisionable_pods().await
            && self.replica_sets_ready().await
            && self.replication_controllers_ready().await
            && self.stateful_sets_ready().await
        {
            ChronoDuration::zero()
        } else {
            ChronoDuration::minutes(5)
        }
    }

    async fn has_provisionable_pods(&self) -> bool {
        match self.kube.list_unscheduled_pods().await {
            Err(e) => {
                error!(error = %e, "Listing pending pods");
                true
            }
            Ok(pod_list) => pod_list.iter().any(pods::is_provisionable),
        }
    }

    async fn replica_sets_ready(&self) -> bool {
        match self.kube.list_replicasets().await {
            Err(e) => {
                error!(error = %e, "Listing replicasets");
                false
            }
            Ok(sets) => sets.iter().all(|rs| {
                workload_ready(
                    rs.spec.as_ref().and_then(|s| s.replicas),
                    rs.status.as_ref().and_then(|s| s.ready_replicas),
                )
            }),
        }
    }

    async fn replication_controllers_ready(&self) -> bool {
        match self.kube.list_replication_controllers().await {
            Err(e) => {
                error!(error = %e, "Listing replication controllers");
                false
            }
            Ok(controllers) => controllers.iter().all(|rc| {
                workload_ready(
                    rc.spec.as_ref().and_then(|s| s.replicas),
                    rc.status.as_ref().and_then(|s| s.ready_replicas),
                )
            }),
        }
    }

    async fn stateful_sets_ready(&self) -> bool {
        match self.kube.list_statefulsets().await {
            Err(e) => {
                error!(error = %e, "Listing statefulsets");
                false
            }
            Ok(sets) => sets.iter().all(|sts| {
                workload_ready(
                    sts.spec.as_ref().and_then(|s| s.replicas),
                    sts.status.as_ref().and_then(|s| s.ready_replicas),
                )
            }),
        }
    }
}

/// Unspecified desired replicas default to 1, per the API convention.
fn workload_ready(desired: Option<i32>, ready: Option<i32>) -> bool {
    ready.unwrap_or(0) >= desired.unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::crd::{
        ConsolidationSpec, ProvisionerSpec, DO_NOT_CONSOLIDATE_ANNOTATION, INITIALIZED_LABEL,
    };
    use crate::events::NoopEventPublisher;
    use crate::kube_access::MockKubeApi;
    use crate::provider::{InstanceType, MockCloudProvider};
    use crate::simulate::{
        InflightPlacement, MockProvisioning, ProposedNode, Simulation,
    };
    use crate::test_support::{
        consolidating_provisioner, provisioner_with_spec, FakeClusterState, NodeBuilder,
        PodBuilder,
    };
    use chrono::{Duration as ChronoDuration, Utc};
    use k8s_openapi::api::core::v1::Pod;
    use k8s_openapi::api::policy::v1::{
        PodDisruptionBudget, PodDisruptionBudgetSpec, PodDisruptionBudgetStatus,
    };
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
    use kube::core::ObjectMeta;
    use std::collections::HashMap;
    use std::sync::{Arc as StdArc, Mutex};

    const PROVISIONER: &str = "general";
    const BIG: &str = "m5.8xlarge"; // most expensive type in the test catalog
    const SMALL: &str = "m5.xlarge";
    const BIG_PRICE: f64 = 1.536;
    const SMALL_PRICE: f64 = 0.192;

    /// Records destructive calls so tests assert outcomes, not mock wiring.
    #[derive(Clone, Default)]
    struct SideEffects {
        deleted: StdArc<Mutex<Vec<String>>>,
        launched: StdArc<Mutex<u32>>,
    }

    impl SideEffects {
        fn deleted_nodes(&self) -> Vec<String> {
            self.deleted.lock().unwrap().clone()
        }

        fn launches(&self) -> u32 {
            *self.launched.lock().unwrap()
        }
    }

    struct Fixture {
        nodes: Vec<Node>,
        pods_per_node: HashMap<String, Vec<Pod>>,
        pdbs: Vec<PodDisruptionBudget>,
        provisioners: Vec<crate::crd::Provisioner>,
        simulations: HashMap<String, Simulation>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                nodes: Vec::new(),
                pods_per_node: HashMap::new(),
                pdbs: Vec::new(),
                provisioners: vec![consolidating_provisioner(PROVISIONER)],
                simulations: HashMap::new(),
            }
        }

        fn node(mut self, node: Node, pods: Vec<Pod>) -> Self {
            let name = node.metadata.name.clone().unwrap();
            self.pods_per_node.insert(name, pods);
            self.nodes.push(node);
            self
        }

        fn pdb(mut self, pdb: PodDisruptionBudget) -> Self {
            self.pdbs.push(pdb);
            self
        }

        fn provisioners(mut self, provisioners: Vec<crate::crd::Provisioner>) -> Self {
            self.provisioners = provisioners;
            self
        }

        /// Scripted simulation outcome for excluding the named node.
        fn simulation(mut self, excluded_node: &str, sim: Simulation) -> Self {
            self.simulations.insert(excluded_node.to_string(), sim);
            self
        }

        fn build(self) -> (Controller, SideEffects) {
            let effects = SideEffects::default();

            let mut kube = MockKubeApi::new();
            let provisioners = self.provisioners.clone();
            kube.expect_list_provisioners()
                .returning(move || Ok(provisioners.clone()));
            let pods = self.pods_per_node.clone();
            kube.expect_list_pods_on_node()
                .returning(move |node| Ok(pods.get(node).cloned().unwrap_or_default()));
            let pdbs = self.pdbs.clone();
            kube.expect_list_pdbs().returning(move || Ok(pdbs.clone()));
            kube.expect_set_node_unschedulable().returning(|_, _| Ok(()));
            kube.expect_get_node().returning(|name| {
                Ok(NodeBuilder::new(name)
                    .label(INITIALIZED_LABEL, "true")
                    .build())
            });
            let deleted = effects.deleted.clone();
            kube.expect_delete_node().returning(move |name| {
                deleted.lock().unwrap().push(name.to_string());
                Ok(())
            });

            let mut cloud = MockCloudProvider::new();
            cloud.expect_instance_types().returning(|_| {
                Ok(vec![
                    InstanceType::new(SMALL, SMALL_PRICE),
                    InstanceType::new("m5.2xlarge", 0.384),
                    InstanceType::new(BIG, BIG_PRICE),
                ])
            });

            let mut provisioning = MockProvisioning::new();
            let simulations = self.simulations.clone();
            provisioning
                .expect_simulate()
                .returning(move |_, _, excluded| {
                    Ok(simulations.get(excluded).cloned().unwrap_or_default())
                });
            let launched = effects.launched.clone();
            provisioning.expect_launch().returning(move |_, _| {
                *launched.lock().unwrap() += 1;
                Ok(vec!["replacement-1".to_string()])
            });

            let controller = Controller::new(
                StdArc::new(kube),
                StdArc::new(FakeClusterState::with_nodes(self.nodes)),
                StdArc::new(cloud),
                StdArc::new(provisioning),
                StdArc::new(NoopEventPublisher),
                StdArc::new(SystemClock),
                ControllerConfig::default(),
            );
            (controller, effects)
        }
    }

    fn fits_elsewhere(pods: &[Pod]) -> Simulation {
        Simulation {
            new_nodes: Vec::new(),
            inflight: vec![InflightPlacement {
                node_name: "other".to_string(),
                pods: pods.to_vec(),
            }],
        }
    }

    fn needs_one_cheaper_node() -> Simulation {
        Simulation {
            new_nodes: vec![ProposedNode {
                instance_type_options: vec![InstanceType::new(SMALL, SMALL_PRICE)],
                ..Default::default()
            }],
            inflight: Vec::new(),
        }
    }

    fn needs_one_node_no_cheaper() -> Simulation {
        Simulation {
            new_nodes: vec![ProposedNode {
                instance_type_options: vec![InstanceType::new(BIG, BIG_PRICE)],
                ..Default::default()
            }],
            inflight: Vec::new(),
        }
    }

    /// Story: a lone expensive node whose pod fits on a cheaper instance is
    /// replaced: exactly one launch, and the original node is gone.
    #[tokio::test(start_paused = true)]
    async fn expensive_node_is_replaced_by_cheaper_instance() {
        let pod = PodBuilder::replicaset_pod("app-1").build();
        let (controller, effects) = Fixture::new()
            .node(
                NodeBuilder::worker("pricey", PROVISIONER, BIG).build(),
                vec![pod],
            )
            .simulation("pricey", needs_one_cheaper_node())
            .build();

        let result = controller.process_cluster().await.unwrap();

        assert_eq!(result, ProcessResult::Consolidated);
        assert_eq!(effects.launches(), 1);
        assert_eq!(effects.deleted_nodes(), vec!["pricey"]);
    }

    /// Story: the same cluster, but the pod sits behind a PDB with no
    /// disruptions allowed. Nothing is launched and the node stays.
    #[tokio::test]
    async fn pdb_with_no_headroom_blocks_replacement() {
        let pod = PodBuilder::replicaset_pod("app-1").label("app", "web").build();
        let (controller, effects) = Fixture::new()
            .node(
                NodeBuilder::worker("pricey", PROVISIONER, BIG).build(),
                vec![pod],
            )
            .simulation("pricey", needs_one_cheaper_node())
            .pdb(PodDisruptionBudget {
                metadata: ObjectMeta {
                    name: Some("web-pdb".to_string()),
                    namespace: Some("default".to_string()),
                    ..Default::default()
                },
                spec: Some(PodDisruptionBudgetSpec {
                    selector: Some(LabelSelector {
                        match_labels: Some(
                            [("app".to_string(), "web".to_string())].into_iter().collect(),
                        ),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                status: Some(PodDisruptionBudgetStatus {
                    disruptions_allowed: 0,
                    ..Default::default()
                }),
            })
            .build();

        let result = controller.process_cluster().await.unwrap();

        assert_eq!(result, ProcessResult::NothingToDo);
        assert_eq!(effects.launches(), 0);
        assert!(effects.deleted_nodes().is_empty());
    }

    /// Story: of two identical nodes, the one annotated do-not-consolidate is
    /// untouchable; only the other is deleted, with no launch.
    #[tokio::test]
    async fn annotated_node_is_kept_and_the_other_deleted() {
        let pod_a = PodBuilder::replicaset_pod("app-a").build();
        let pod_b = PodBuilder::replicaset_pod("app-b").build();
        let (controller, effects) = Fixture::new()
            .node(
                NodeBuilder::worker("pinned", PROVISIONER, BIG)
                    .annotation(DO_NOT_CONSOLIDATE_ANNOTATION, "true")
                    .build(),
                vec![pod_a],
            )
            .node(
                NodeBuilder::worker("movable", PROVISIONER, BIG).build(),
                vec![pod_b.clone()],
            )
            .simulation("movable", fits_elsewhere(&[pod_b]))
            .build();

        let result = controller.process_cluster().await.unwrap();

        assert_eq!(result, ProcessResult::Consolidated);
        assert_eq!(effects.launches(), 0);
        assert_eq!(effects.deleted_nodes(), vec!["movable"]);
    }

    /// Story: two nodes, pods fit on one. The lighter node (fewer pods, lower
    /// disruption cost) is deleted without a launch.
    #[tokio::test]
    async fn lighter_of_two_nodes_is_deleted() {
        let light_pod = PodBuilder::replicaset_pod("light-1").build();
        let heavy_pods = vec![
            PodBuilder::replicaset_pod("heavy-1").build(),
            PodBuilder::replicaset_pod("heavy-2").build(),
        ];
        let (controller, effects) = Fixture::new()
            .node(
                NodeBuilder::worker("light", PROVISIONER, BIG).build(),
                vec![light_pod.clone()],
            )
            .node(
                NodeBuilder::worker("heavy", PROVISIONER, BIG).build(),
                heavy_pods,
            )
            .simulation("light", fits_elsewhere(&[light_pod]))
            .build();

        let result = controller.process_cluster().await.unwrap();

        assert_eq!(result, ProcessResult::Consolidated);
        assert_eq!(effects.launches(), 0);
        assert_eq!(effects.deleted_nodes(), vec!["light"]);
    }

    /// Story: a node hosting a controller-less pod can never be drained; the
    /// node with replicaset pods is deleted instead even though the
    /// standalone node sorts first.
    #[tokio::test]
    async fn standalone_pod_protects_its_node() {
        let standalone = PodBuilder::new("one-off").build();
        let managed = PodBuilder::replicaset_pod("app-1").build();
        let (controller, effects) = Fixture::new()
            .node(
                NodeBuilder::worker("fragile", PROVISIONER, BIG)
                    .created_at(Utc::now() - ChronoDuration::hours(2))
                    .build(),
                vec![standalone],
            )
            .node(
                NodeBuilder::worker("managed", PROVISIONER, BIG)
                    .created_at(Utc::now())
                    .build(),
                vec![managed.clone()],
            )
            .simulation("fragile", fits_elsewhere(&[PodBuilder::new("x").build()]))
            .simulation("managed", fits_elsewhere(&[managed]))
            .build();

        let result = controller.process_cluster().await.unwrap();

        assert_eq!(result, ProcessResult::Consolidated);
        assert_eq!(effects.deleted_nodes(), vec!["managed"]);
    }

    /// Story: identical nodes created a second apart under an expiry TTL; the
    /// older one (less lifetime remaining) is the one deleted.
    #[tokio::test]
    async fn older_of_identical_nodes_is_deleted() {
        let now = Utc::now();
        let pod_a = PodBuilder::replicaset_pod("app-a").build();
        let pod_b = PodBuilder::replicaset_pod("app-b").build();
        let ttl_provisioner = provisioner_with_spec(
            PROVISIONER,
            ProvisionerSpec {
                consolidation: Some(ConsolidationSpec {
                    enabled: Some(true),
                }),
                ttl_seconds_until_expired: Some(30 * 24 * 3600),
            },
        );
        let (controller, effects) = Fixture::new()
            .provisioners(vec![ttl_provisioner])
            .node(
                NodeBuilder::worker("younger", PROVISIONER, BIG)
                    .created_at(now - ChronoDuration::seconds(1))
                    .build(),
                vec![pod_a.clone()],
            )
            .node(
                NodeBuilder::worker("older", PROVISIONER, BIG)
                    .created_at(now - ChronoDuration::seconds(2))
                    .build(),
                vec![pod_b.clone()],
            )
            .simulation("younger", fits_elsewhere(&[pod_a]))
            .simulation("older", fits_elsewhere(&[pod_b]))
            .build();

        let result = controller.process_cluster().await.unwrap();

        assert_eq!(result, ProcessResult::Consolidated);
        assert_eq!(effects.deleted_nodes(), vec!["older"]);
    }

    /// Story: every candidate needs a same-price replacement (e.g. pinned by
    /// anti-affinity to one pod per node at the cheapest tier), so no action
    /// is possible.
    #[tokio::test]
    async fn no_action_when_no_cheaper_shape_exists() {
        let pods: Vec<Pod> = (0..3)
            .map(|i| PodBuilder::replicaset_pod(&format!("app-{}", i)).build())
            .collect();
        let mut fixture = Fixture::new();
        for (i, pod) in pods.iter().enumerate() {
            let name = format!("node-{}", i);
            fixture = fixture
                .node(
                    NodeBuilder::worker(&name, PROVISIONER, BIG).build(),
                    vec![pod.clone()],
                )
                .simulation(&name, needs_one_node_no_cheaper());
        }
        let (controller, effects) = fixture.build();

        let result = controller.process_cluster().await.unwrap();

        assert_eq!(result, ProcessResult::NothingToDo);
        assert_eq!(effects.launches(), 0);
        assert!(effects.deleted_nodes().is_empty());
    }

    /// Story: all empty nodes go in one batched action, no launches.
    #[tokio::test]
    async fn empty_nodes_are_deleted_in_one_batch() {
        let (controller, effects) = Fixture::new()
            .node(NodeBuilder::worker("empty-1", PROVISIONER, BIG).build(), vec![])
            .node(NodeBuilder::worker("empty-2", PROVISIONER, SMALL).build(), vec![])
            .build();

        let result = controller.process_cluster().await.unwrap();

        assert_eq!(result, ProcessResult::Consolidated);
        assert_eq!(effects.launches(), 0);
        assert_eq!(effects.deleted_nodes(), vec!["empty-1", "empty-2"]);
    }

    /// Story: an uninitialized node anywhere in the fleet freezes the tick;
    /// even a trivially empty node is kept.
    #[tokio::test]
    async fn uninitialized_node_inhibits_all_action() {
        let (controller, effects) = Fixture::new()
            .node(NodeBuilder::worker("empty", PROVISIONER, BIG).build(), vec![])
            .node(
                NodeBuilder::worker("warming", PROVISIONER, BIG)
                    .uninitialized()
                    .build(),
                vec![],
            )
            .build();

        let result = controller.process_cluster().await.unwrap();

        assert_eq!(result, ProcessResult::NothingToDo);
        assert_eq!(effects.launches(), 0);
        assert!(effects.deleted_nodes().is_empty());
    }

    #[tokio::test]
    async fn empty_cluster_is_nothing_to_do() {
        let (controller, effects) = Fixture::new().build();
        let result = controller.process_cluster().await.unwrap();
        assert_eq!(result, ProcessResult::NothingToDo);
        assert!(effects.deleted_nodes().is_empty());
    }

    mod loop_gating {
        use super::*;

        /// A healthy, empty cluster: zero stabilization window, nothing to
        /// consolidate. Tests add their own `list_provisioners` expectation
        /// to assert how often processing actually runs.
        fn quiet_kube() -> MockKubeApi {
            let mut kube = MockKubeApi::new();
            kube.expect_list_unscheduled_pods().returning(|| Ok(vec![]));
            kube.expect_list_replicasets().returning(|| Ok(vec![]));
            kube.expect_list_replication_controllers()
                .returning(|| Ok(vec![]));
            kube.expect_list_statefulsets().returning(|| Ok(vec![]));
            kube
        }

        fn controller_with(
            kube: MockKubeApi,
            cluster: FakeClusterState,
        ) -> Controller {
            Controller::new(
                StdArc::new(kube),
                StdArc::new(cluster),
                StdArc::new(MockCloudProvider::new()),
                StdArc::new(MockProvisioning::new()),
                StdArc::new(NoopEventPublisher),
                StdArc::new(SystemClock),
                ControllerConfig::default(),
            )
        }

        /// Story: a fruitless pass memoizes the cluster fingerprint; until it
        /// changes, later ticks do not touch the API server at all.
        #[tokio::test]
        async fn unchanged_fingerprint_skips_the_tick() {
            let mut kube = quiet_kube();
            // exactly one full pass, then silence
            kube.expect_list_provisioners()
                .times(1)
                .returning(|| Ok(vec![]));

            let mut controller =
                controller_with(kube, FakeClusterState::with_nodes(vec![]));

            controller.tick().await;
            // fingerprint unchanged; these ticks return before any API call
            controller.tick().await;
            controller.tick().await;
        }

        /// Story: a recent deletion plus an unhealthy workload keeps the
        /// controller quiet for the five-minute window.
        #[tokio::test]
        async fn recent_deletion_with_pending_pods_skips_processing() {
            let mut kube = MockKubeApi::new();
            // one provisionable pending pod forces the 5 minute window
            kube.expect_list_unscheduled_pods().returning(|| {
                Ok(vec![Pod {
                    status: Some(k8s_openapi::api::core::v1::PodStatus {
                        phase: Some("Pending".to_string()),
                        conditions: Some(vec![k8s_openapi::api::core::v1::PodCondition {
                            type_: "PodScheduled".to_string(),
                            status: "False".to_string(),
                            reason: Some("Unschedulable".to_string()),
                            ..Default::default()
                        }]),
                        ..Default::default()
                    }),
                    ..Default::default()
                }])
            });
            // list_provisioners is not mocked: processing would panic

            let mut cluster = FakeClusterState::with_nodes(vec![]);
            cluster.last_deletion = Utc::now() - ChronoDuration::minutes(1);

            let mut controller = controller_with(kube, cluster);
            controller.tick().await;
        }

        /// Story: the same recent deletion is fine once the cluster is fully
        /// healthy; the window collapses to zero and processing runs.
        #[tokio::test]
        async fn healthy_cluster_collapses_the_window() {
            let mut kube = quiet_kube();
            kube.expect_list_provisioners()
                .times(1)
                .returning(|| Ok(vec![]));

            let mut cluster = FakeClusterState::with_nodes(vec![]);
            cluster.last_deletion = Utc::now() - ChronoDuration::seconds(30);

            let mut controller = controller_with(kube, cluster);
            controller.tick().await;
        }

        #[tokio::test(start_paused = true)]
        async fn run_exits_on_cancellation_before_start() {
            let controller =
                controller_with(MockKubeApi::new(), FakeClusterState::with_nodes(vec![]));
            let (_start_tx, start_rx) = oneshot::channel();
            let cancel = CancellationToken::new();
            cancel.cancel();
            controller.run(start_rx, cancel).await;
        }

        #[tokio::test(start_paused = true)]
        async fn run_exits_when_start_sender_is_dropped() {
            let controller =
                controller_with(MockKubeApi::new(), FakeClusterState::with_nodes(vec![]));
            let (start_tx, start_rx) = oneshot::channel::<()>();
            drop(start_tx);
            controller.run(start_rx, CancellationToken::new()).await;
        }

        #[tokio::test(start_paused = true)]
        async fn run_ticks_after_start_until_cancelled() {
            let mut kube = quiet_kube();
            // first tick processes and memoizes; later ticks skip
            kube.expect_list_provisioners()
                .times(1)
                .returning(|| Ok(vec![]));
            let controller = controller_with(kube, FakeClusterState::with_nodes(vec![]));

            let (start_tx, start_rx) = oneshot::channel();
            let cancel = CancellationToken::new();
            let handle = tokio::spawn(controller.run(start_rx, cancel.clone()));

            start_tx.send(()).unwrap();
            // let a few polling periods elapse under paused time
            tokio::time::sleep(Duration::from_secs(35)).await;
            cancel.cancel();
            handle.await.unwrap();
        }
    }

    mod stabilization {
        use super::*;
        use k8s_openapi::api::apps::v1::{
            ReplicaSet, ReplicaSetSpec, ReplicaSetStatus, StatefulSet,
        };

        #[test]
        fn workload_readiness_defaults_desired_to_one() {
            assert!(workload_ready(None, Some(1)));
            assert!(!workload_ready(None, Some(0)));
            assert!(!workload_ready(None, None));
            assert!(workload_ready(Some(3), Some(3)));
            assert!(!workload_ready(Some(3), Some(2)));
            assert!(workload_ready(Some(0), None));
        }

        fn controller_for_window(kube: MockKubeApi) -> Controller {
            Controller::new(
                StdArc::new(kube),
                StdArc::new(FakeClusterState::with_nodes(vec![])),
                StdArc::new(MockCloudProvider::new()),
                StdArc::new(MockProvisioning::new()),
                StdArc::new(NoopEventPublisher),
                StdArc::new(SystemClock),
                ControllerConfig::default(),
            )
        }

        #[tokio::test]
        async fn degraded_replicaset_forces_the_long_window() {
            let mut kube = MockKubeApi::new();
            kube.expect_list_unscheduled_pods().returning(|| Ok(vec![]));
            kube.expect_list_replicasets().returning(|| {
                Ok(vec![ReplicaSet {
                    spec: Some(ReplicaSetSpec {
                        replicas: Some(3),
                        ..Default::default()
                    }),
                    status: Some(ReplicaSetStatus {
                        ready_replicas: Some(2),
                        ..Default::default()
                    }),
                    ..Default::default()
                }])
            });

            let controller = controller_for_window(kube);
            assert_eq!(
                controller.stabilization_window().await,
                ChronoDuration::minutes(5)
            );
        }

        #[tokio::test]
        async fn list_failure_counts_as_unhealthy() {
            let mut kube = MockKubeApi::new();
            kube.expect_list_unscheduled_pods().returning(|| Ok(vec![]));
            kube.expect_list_replicasets().returning(|| Ok(vec![]));
            kube.expect_list_replication_controllers()
                .returning(|| Ok(vec![]));
            kube.expect_list_statefulsets()
                .returning(|| Err(crate::Error::internal("apiserver overload")));

            let controller = controller_for_window(kube);
            assert_eq!(
                controller.stabilization_window().await,
                ChronoDuration::minutes(5)
            );
        }

        #[tokio::test]
        async fn healthy_cluster_has_zero_window() {
            let mut kube = MockKubeApi::new();
            kube.expect_list_unscheduled_pods().returning(|| Ok(vec![]));
            kube.expect_list_replicasets().returning(|| Ok(vec![]));
            kube.expect_list_replication_controllers()
                .returning(|| Ok(vec![]));
            kube.expect_list_statefulsets()
                .returning(|| Ok(vec![StatefulSet::default()]));

            let controller = controller_for_window(kube);
            assert_eq!(
                controller.stabilization_window().await,
                ChronoDuration::zero()
            );
        }
    }
}
