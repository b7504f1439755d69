//! Cluster handle consumed by every hook
//!
//! A [`ClusterHandle`] refers to exactly one provisioned cluster for its whole
//! lifetime. Hooks only read from it; all side effects go through the
//! collaborators held by [`crate::context::HookContext`].

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Cloud provider a cluster was created on
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    /// Amazon (EC2 autoscaling groups)
    Aws,
    /// Azure (AKS)
    Azure,
    /// Google (GKE)
    Gcp,
    /// Local docker/kind clusters
    Docker,
}

impl ProviderType {
    /// Lowercase provider name
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderType::Aws => "aws",
            ProviderType::Azure => "azure",
            ProviderType::Gcp => "gcp",
            ProviderType::Docker => "docker",
        }
    }
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "aws" | "amazon" => Ok(ProviderType::Aws),
            "azure" => Ok(ProviderType::Azure),
            "gcp" | "google" => Ok(ProviderType::Gcp),
            "docker" => Ok(ProviderType::Docker),
            other => Err(Error::config(format!("unknown provider type: {other}"))),
        }
    }
}

/// A worker pool as provisioned
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodePool {
    /// Pool name
    pub name: String,
    /// Current node count
    #[serde(default)]
    pub count: u32,
    /// Whether the pool participates in autoscaling
    #[serde(default)]
    pub autoscaling: bool,
    /// Lower bound when autoscaling
    #[serde(default)]
    pub min_count: u32,
    /// Upper bound when autoscaling
    #[serde(default)]
    pub max_count: u32,
}

/// Node-pool layout and placement of a cluster
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeTopology {
    /// Region or location the cluster runs in
    #[serde(default)]
    pub location: String,
    /// Resource group (Azure only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_group: Option<String>,
    /// Worker pools
    #[serde(default)]
    pub node_pools: Vec<NodePool>,
}

/// Provider credentials attached to a cluster, as key/value pairs
pub type CloudSecret = BTreeMap<String, String>;

/// Read-only capability for one provisioned cluster
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterHandle: Send + Sync {
    /// Cluster display name
    fn name(&self) -> String;

    /// Owning organization
    fn organization_id(&self) -> u64;

    /// Cloud provider
    fn provider(&self) -> ProviderType;

    /// Node-pool topology
    fn node_topology(&self) -> NodeTopology;

    /// Force a fresh download of the kubeconfig from the provider.
    ///
    /// Fails while the control plane is not reachable yet.
    async fn download_kubeconfig(&self) -> Result<Vec<u8>>;

    /// Current kubeconfig, possibly cached
    async fn kubeconfig(&self) -> Result<Vec<u8>>;

    /// Provider credentials used by cluster-side components
    async fn cloud_secret(&self) -> Result<CloudSecret>;
}
