//! Cluster autoscaler values, one capability per cloud provider
//!
//! Each supported provider implements [`AutoscalerProvider`] once: it knows how
//! to turn a cluster's node pools into autoscaler node groups and how to wrap
//! them into chart values. [`for_provider`] is the only place that branches on
//! the provider type.

use serde::{Deserialize, Serialize};

use crate::cluster::{CloudSecret, NodeTopology, ProviderType};
use crate::{Error, Result};

/// Release name of the autoscaler chart
pub const AUTOSCALER_RELEASE: &str = "autoscaler";

/// CA bundle mounted into the autoscaler on AWS
const AWS_SSL_CERT_PATH: &str = "/etc/ssl/certs/ca-certificates.crt";

/// A bounded group of nodes managed by the autoscaler
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeGroup {
    /// Provider identifier of the group (ASG name, AKS pool name)
    pub name: String,
    /// Lower bound
    pub min_size: u32,
    /// Upper bound
    pub max_size: u32,
}

/// Azure service-principal and placement settings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AzureInfo {
    /// Service principal client id
    pub client_id: String,
    /// Service principal secret
    pub client_secret: String,
    /// Subscription id
    pub subscription_id: String,
    /// Tenant id
    pub tenant_id: String,
    /// Resource group of the AKS cluster
    pub resource_group: String,
    /// Resource group holding the AKS nodes
    pub node_resource_group: String,
    /// AKS cluster name
    pub cluster_name: String,
}

/// RBAC toggles of the chart
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rbac {
    /// Create RBAC resources
    pub create: bool,
}

/// Chart values for the cluster autoscaler
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoscalingValues {
    /// Provider tag understood by the autoscaler (`aws`, `azure`)
    pub cloud_provider: String,
    /// Managed node groups
    pub autoscaling_groups: Vec<NodeGroup>,
    /// AWS region
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aws_region: Option<String>,
    /// Azure settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub azure: Option<AzureInfo>,
    /// RBAC toggles
    pub rbac: Rbac,
    /// Host CA bundle path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssl_cert_path: Option<String>,
}

impl AutoscalingValues {
    /// Serialize to YAML chart values
    pub fn to_yaml(&self) -> Result<Vec<u8>> {
        serde_yaml::to_string(self)
            .map(String::into_bytes)
            .map_err(|e| Error::serialization(format!("autoscaler values: {e}")))
    }

    /// Parse YAML chart values
    pub fn from_yaml(raw: &[u8]) -> Result<Self> {
        serde_yaml::from_slice(raw)
            .map_err(|e| Error::serialization(format!("autoscaler values: {e}")))
    }
}

/// Provider-specific autoscaler knowledge
pub trait AutoscalerProvider: Send + Sync {
    /// Provider this capability serves
    fn provider(&self) -> ProviderType;

    /// Node groups eligible for autoscaling; empty means nothing to install
    fn node_groups(&self, cluster_name: &str, topology: &NodeTopology) -> Vec<NodeGroup>;

    /// Chart values wrapping `groups`
    fn values(
        &self,
        cluster_name: &str,
        topology: &NodeTopology,
        secret: &CloudSecret,
        groups: Vec<NodeGroup>,
    ) -> Result<AutoscalingValues>;
}

/// Autoscaling through EC2 autoscaling groups
#[derive(Clone, Copy, Debug, Default)]
pub struct AwsAutoscaler;

impl AwsAutoscaler {
    /// Autoscaling group name of a node pool
    pub fn group_name(cluster_name: &str, pool: &str) -> String {
        format!("{cluster_name}.node.{pool}")
    }
}

impl AutoscalerProvider for AwsAutoscaler {
    fn provider(&self) -> ProviderType {
        ProviderType::Aws
    }

    fn node_groups(&self, cluster_name: &str, topology: &NodeTopology) -> Vec<NodeGroup> {
        topology
            .node_pools
            .iter()
            .filter(|pool| pool.autoscaling)
            .map(|pool| NodeGroup {
                name: Self::group_name(cluster_name, &pool.name),
                min_size: pool.min_count,
                max_size: pool.max_count,
            })
            .collect()
    }

    fn values(
        &self,
        _cluster_name: &str,
        topology: &NodeTopology,
        _secret: &CloudSecret,
        groups: Vec<NodeGroup>,
    ) -> Result<AutoscalingValues> {
        if topology.location.is_empty() {
            return Err(Error::provider(self.provider(), "cluster has no region"));
        }

        Ok(AutoscalingValues {
            cloud_provider: self.provider().to_string(),
            autoscaling_groups: groups,
            aws_region: Some(topology.location.clone()),
            azure: None,
            rbac: Rbac { create: true },
            ssl_cert_path: Some(AWS_SSL_CERT_PATH.to_string()),
        })
    }
}

/// Azure service-principal credentials from a cloud secret
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AzureCredentials {
    /// AZURE_CLIENT_ID
    pub client_id: String,
    /// AZURE_CLIENT_SECRET
    pub client_secret: String,
    /// AZURE_SUBSCRIPTION_ID
    pub subscription_id: String,
    /// AZURE_TENANT_ID
    pub tenant_id: String,
}

impl AzureCredentials {
    /// Load credentials from a cloud secret, naming the first missing key
    pub fn from_secret(secret: &CloudSecret) -> std::result::Result<Self, &'static str> {
        let get = |key: &'static str| secret.get(key).cloned().ok_or(key);
        Ok(Self {
            client_id: get("AZURE_CLIENT_ID")?,
            client_secret: get("AZURE_CLIENT_SECRET")?,
            subscription_id: get("AZURE_SUBSCRIPTION_ID")?,
            tenant_id: get("AZURE_TENANT_ID")?,
        })
    }
}

/// Autoscaling of AKS agent pools
#[derive(Clone, Copy, Debug, Default)]
pub struct AzureAutoscaler;

impl AzureAutoscaler {
    /// Resource group AKS creates for a cluster's nodes
    pub fn node_resource_group(resource_group: &str, cluster_name: &str, location: &str) -> String {
        format!("MC_{resource_group}_{cluster_name}_{location}")
    }
}

impl AutoscalerProvider for AzureAutoscaler {
    fn provider(&self) -> ProviderType {
        ProviderType::Azure
    }

    fn node_groups(&self, _cluster_name: &str, topology: &NodeTopology) -> Vec<NodeGroup> {
        topology
            .node_pools
            .iter()
            .filter(|pool| pool.autoscaling)
            .map(|pool| NodeGroup {
                name: pool.name.clone(),
                min_size: pool.min_count,
                max_size: pool.max_count,
            })
            .collect()
    }

    fn values(
        &self,
        cluster_name: &str,
        topology: &NodeTopology,
        secret: &CloudSecret,
        groups: Vec<NodeGroup>,
    ) -> Result<AutoscalingValues> {
        let credentials = AzureCredentials::from_secret(secret).map_err(|key| {
            Error::provider(self.provider(), format!("{key} missing from cloud secret"))
        })?;
        let resource_group = topology
            .resource_group
            .clone()
            .filter(|rg| !rg.is_empty())
            .ok_or_else(|| Error::provider(self.provider(), "cluster has no resource group"))?;

        Ok(AutoscalingValues {
            cloud_provider: self.provider().to_string(),
            autoscaling_groups: groups,
            aws_region: None,
            azure: Some(AzureInfo {
                client_id: credentials.client_id,
                client_secret: credentials.client_secret,
                subscription_id: credentials.subscription_id,
                tenant_id: credentials.tenant_id,
                node_resource_group: Self::node_resource_group(
                    &resource_group,
                    cluster_name,
                    &topology.location,
                ),
                resource_group,
                cluster_name: cluster_name.to_string(),
            }),
            rbac: Rbac { create: true },
            ssl_cert_path: None,
        })
    }
}

static AWS: AwsAutoscaler = AwsAutoscaler;
static AZURE: AzureAutoscaler = AzureAutoscaler;

/// Autoscaler capability of a provider, `None` when autoscaling is unsupported
pub fn for_provider(provider: ProviderType) -> Option<&'static dyn AutoscalerProvider> {
    match provider {
        ProviderType::Aws => Some(&AWS),
        ProviderType::Azure => Some(&AZURE),
        ProviderType::Gcp | ProviderType::Docker => None,
    }
}
