//! Provisioner Custom Resource Definition
//!
//! A Provisioner describes a class of nodes the provisioning subsystem
//! manages. The consolidation controller only reads the policy fields it
//! consumes; launch templates, requirements, and limits belong to the
//! provisioning subsystem's view of the same resource.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Specification for a Provisioner
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "defrag.dev",
    version = "v1alpha1",
    kind = "Provisioner",
    plural = "provisioners",
    namespaced = false,
    printcolumn = r#"{"name":"Consolidate","type":"boolean","jsonPath":".spec.consolidation.enabled"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionerSpec {
    /// Consolidation policy for nodes owned by this provisioner
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consolidation: Option<ConsolidationSpec>,

    /// Seconds until a node owned by this provisioner is considered expired.
    ///
    /// When set, nodes approaching expiry become progressively cheaper to
    /// disrupt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_seconds_until_expired: Option<i64>,
}

/// Consolidation policy block
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConsolidationSpec {
    /// Whether the controller may delete or replace this provisioner's nodes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
}

impl ProvisionerSpec {
    /// Whether consolidation is enabled for this provisioner.
    ///
    /// Absent blocks default to disabled.
    pub fn consolidation_enabled(&self) -> bool {
        self.consolidation
            .as_ref()
            .and_then(|c| c.enabled)
            .unwrap_or(false)
    }
}
