//! YAML-described clusters for the command line
//!
//! ```yaml
//! name: prod
//! organization:
//!   id: 7
//!   name: acme
//! provider: aws
//! kubeconfig: prod.kubeconfig
//! topology:
//!   location: eu-west-1
//!   nodePools:
//!     - name: workers
//!       autoscaling: true
//!       minCount: 1
//!       maxCount: 5
//! cloudSecret: {}
//! ```
//!
//! A relative `kubeconfig` path is resolved against the descriptor's
//! directory. The file is re-read on every download and cached for
//! [`ClusterHandle::kubeconfig`].

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::cluster::{CloudSecret, ClusterHandle, NodeTopology, ProviderType};
use crate::organization::{Organization, OrganizationResolver};
use crate::{Error, Result};

#[derive(Clone, Debug, Deserialize)]
struct OrganizationSpec {
    id: u64,
    name: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DescriptorSpec {
    name: String,
    organization: OrganizationSpec,
    provider: ProviderType,
    kubeconfig: PathBuf,
    #[serde(default)]
    topology: NodeTopology,
    #[serde(default)]
    cloud_secret: CloudSecret,
}

/// A cluster described by a YAML file
#[derive(Debug)]
pub struct ClusterDescriptor {
    spec: DescriptorSpec,
    cached: OnceCell<Vec<u8>>,
}

impl ClusterDescriptor {
    /// Parse a descriptor; relative kubeconfig paths are resolved against `base_dir`
    pub fn from_yaml(raw: &[u8], base_dir: &Path) -> Result<Self> {
        let mut spec: DescriptorSpec = serde_yaml::from_slice(raw)
            .map_err(|e| Error::config(format!("invalid cluster descriptor: {e}")))?;
        if spec.name.is_empty() {
            return Err(Error::config("cluster descriptor has an empty name"));
        }
        if spec.kubeconfig.is_relative() {
            spec.kubeconfig = base_dir.join(&spec.kubeconfig);
        }
        Ok(Self {
            spec,
            cached: OnceCell::new(),
        })
    }

    /// Read and parse a descriptor file
    pub async fn load(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read(path)
            .await
            .map_err(|e| Error::config(format!("reading {}: {e}", path.display())))?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        Self::from_yaml(&raw, base_dir)
    }

    /// Resolver answering for this descriptor's organization
    pub fn organizations(&self) -> DescriptorOrganizations {
        DescriptorOrganizations {
            organization: Organization {
                id: self.spec.organization.id,
                name: self.spec.organization.name.clone(),
            },
        }
    }

    /// Path the kubeconfig is read from
    pub fn kubeconfig_path(&self) -> &Path {
        &self.spec.kubeconfig
    }
}

#[async_trait]
impl ClusterHandle for ClusterDescriptor {
    fn name(&self) -> String {
        self.spec.name.clone()
    }

    fn organization_id(&self) -> u64 {
        self.spec.organization.id
    }

    fn provider(&self) -> ProviderType {
        self.spec.provider
    }

    fn node_topology(&self) -> NodeTopology {
        self.spec.topology.clone()
    }

    async fn download_kubeconfig(&self) -> Result<Vec<u8>> {
        let path = &self.spec.kubeconfig;
        debug!(path = %path.display(), "Reading kubeconfig");
        tokio::fs::read(path)
            .await
            .map_err(|e| Error::kubeconfig(format!("reading {}: {e}", path.display())))
    }

    async fn kubeconfig(&self) -> Result<Vec<u8>> {
        self.cached
            .get_or_try_init(|| self.download_kubeconfig())
            .await
            .cloned()
    }

    async fn cloud_secret(&self) -> Result<CloudSecret> {
        Ok(self.spec.cloud_secret.clone())
    }
}

/// [`OrganizationResolver`] that knows a single organization
#[derive(Clone, Debug)]
pub struct DescriptorOrganizations {
    organization: Organization,
}

#[async_trait]
impl OrganizationResolver for DescriptorOrganizations {
    async fn organization(&self, id: u64) -> Result<Organization> {
        if id == self.organization.id {
            Ok(self.organization.clone())
        } else {
            Err(Error::Organization {
                id,
                message: "not described".to_string(),
            })
        }
    }
}
