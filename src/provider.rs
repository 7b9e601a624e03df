//! Cloud-provider instance-type catalog seam
//!
//! The cloud provider exposes, per provisioner, the instance types it could
//! launch and their current price. The controller treats this as a read-only
//! catalog; pricing freshness is the provider's problem.

use async_trait::async_trait;

#[cfg(test)]
use mockall::automock;

use crate::crd::Provisioner;
use crate::Result;

/// One launchable instance type and its price.
#[derive(Clone, Debug, PartialEq)]
pub struct InstanceType {
    /// Catalog name, matching the node's instance-type label
    pub name: String,
    /// Monetary price per unit time
    pub price: f64,
}

impl InstanceType {
    /// Create an instance-type record.
    pub fn new(name: impl Into<String>, price: f64) -> Self {
        Self {
            name: name.into(),
            price,
        }
    }
}

/// The cloud-provider interface the controller consumes.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Instance types the provider could launch for the given provisioner.
    async fn instance_types(&self, provisioner: &Provisioner) -> Result<Vec<InstanceType>>;
}
