//! Action execution
//!
//! Orders the side effects of a consolidation action. For a replacement the
//! sequence is strict: cordon the old node, launch the successor, wait until
//! the successor reports initialized, and only then delete the old node. A
//! successor that never becomes ready aborts the action and un-cordons the
//! old node; the stranded successor is empty and will be picked up by the
//! delete-empty path on a later tick.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use k8s_openapi::api::core::v1::Node;
use kube::runtime::events::EventType;
use tracing::{error, info};

use crate::crd::INITIALIZED_LABEL;
use crate::events::{node_reference, reasons, EventPublisher};
use crate::kube_access::KubeApi;
use crate::metrics;
use crate::plan::ConsolidationAction;
use crate::retry::{retry_with_backoff, RetrySchedule};
use crate::simulate::{ProposedNode, Provisioning};
use crate::{Error, Result};

/// Readiness wait: 2s initial delay doubling to a 10s cap, 30 attempts,
/// roughly four and a half minutes end to end.
fn readiness_retry() -> RetrySchedule {
    RetrySchedule {
        attempts: 30,
        delay: Duration::from_secs(2),
        max_delay: Duration::from_secs(10),
        multiplier: 2.0,
    }
}

/// Executes consolidation actions against the cluster.
pub struct Executor<'a> {
    kube: &'a dyn KubeApi,
    provisioning: &'a dyn Provisioning,
    recorder: &'a dyn EventPublisher,
}

impl<'a> Executor<'a> {
    /// Create an executor over the given collaborators.
    pub fn new(
        kube: &'a dyn KubeApi,
        provisioning: &'a dyn Provisioning,
        recorder: &'a dyn EventPublisher,
    ) -> Self {
        Self {
            kube,
            provisioning,
            recorder,
        }
    }

    /// Carry out one action.
    ///
    /// Failures are logged, counted, and contained: within a batched delete
    /// the remaining nodes are still attempted, and a failed launch aborts
    /// before anything was destroyed. Nothing is retried within the tick.
    pub async fn perform(&self, action: &ConsolidationAction) {
        if !action.is_actionable() {
            error!(%action, "Invalid consolidation action calculated");
            return;
        }

        metrics::record_action(action.label());
        info!(%action, "Consolidating");

        if let ConsolidationAction::Replace {
            node, replacement, ..
        } = action
        {
            if let Err(e) = self
                .launch_replacement(node, replacement, &action.to_string())
                .await
            {
                // If we failed to launch the replacement, don't consolidate.
                // A permanent failure here must not disrupt workloads that
                // have nowhere else to go.
                error!(error = %e, "Launching replacement node");
                return;
            }
        }

        for old_node in action.old_nodes() {
            let name = old_node.metadata.name.as_deref().unwrap_or_default();
            self.recorder
                .publish(
                    &node_reference(old_node),
                    EventType::Normal,
                    reasons::TERMINATING,
                    Some(action.to_string()),
                )
                .await;
            match self.kube.delete_node(name).await {
                Ok(()) => metrics::NODES_TERMINATED.add(1, &[]),
                Err(e) => error!(node = name, error = %e, "Deleting node"),
            }
        }
    }

    /// Launch a replacement node and block until it reports initialized.
    ///
    /// The old node is cordoned first so nothing new schedules onto it while
    /// the successor comes up.
    async fn launch_replacement(
        &self,
        old_node: &Node,
        replacement: &ProposedNode,
        note: &str,
    ) -> Result<()> {
        let _timer = metrics::measure_replacement_initialization();
        let old_name = old_node.metadata.name.as_deref().unwrap_or_default();

        self.kube
            .set_node_unschedulable(old_name, true)
            .await
            .map_err(|e| Error::launch(format!("cordoning node {}: {}", old_name, e)))?;

        let node_names = self.provisioning.launch(replacement, false).await?;
        let [replacement_name] = node_names.as_slice() else {
            return Err(Error::launch(format!(
                "expected a single node name, got {}",
                node_names.len()
            )));
        };

        metrics::NODES_CREATED.add(1, &[]);

        let announced = AtomicBool::new(false);
        let announced = &announced;
        let kube = self.kube;
        let recorder = self.recorder;
        let name: &str = replacement_name;
        let wait = retry_with_backoff(&readiness_retry(), "replacement-readiness", move || {
            async move {
                let node = kube
                    .get_node(name)
                    .await
                    .map_err(|e| Error::launch(format!("getting node: {}", e)))?;

                if !announced.swap(true, Ordering::SeqCst) {
                    recorder
                        .publish(
                            &node_reference(&node),
                            EventType::Normal,
                            reasons::LAUNCHING,
                            Some(note.to_string()),
                        )
                        .await;
                }

                if !has_initialized_label(&node) {
                    // make the user aware of why consolidation is paused
                    recorder
                        .publish(
                            &node_reference(&node),
                            EventType::Normal,
                            reasons::WAITING_ON_READINESS,
                            None,
                        )
                        .await;
                    return Err(Error::internal("node is not initialized"));
                }
                Ok(())
            }
        })
        .await;

        if let Err(e) = wait {
            // never became ready; put the old node back into service and
            // surface both outcomes as one error
            let message = match self.kube.set_node_unschedulable(old_name, false).await {
                Ok(()) => e.to_string(),
                Err(uncordon_err) => format!(
                    "{}; un-cordoning node {} failed: {}",
                    e, old_name, uncordon_err
                ),
            };
            return Err(Error::ReadinessTimeout {
                node: replacement_name.clone(),
                message,
            });
        }
        Ok(())
    }
}

/// The readiness wait only requires the initialized label key to appear;
/// candidate selection separately insists on the value "true".
fn has_initialized_label(node: &Node) -> bool {
    node.metadata
        .labels
        .as_ref()
        .is_some_and(|l| l.contains_key(INITIALIZED_LABEL))
}
