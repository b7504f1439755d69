//! Tenant resolution for package-manager repositories

use std::path::{Path, PathBuf};

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use crate::Result;

/// An organization owning clusters
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Organization {
    /// Organization identifier
    pub id: u64,
    /// Organization name, used to scope helm repositories
    pub name: String,
}

/// Looks up organizations by id
#[cfg_attr(test, automock)]
#[async_trait]
pub trait OrganizationResolver: Send + Sync {
    /// Resolve an organization
    async fn organization(&self, id: u64) -> Result<Organization>;
}

/// Per-organization package-manager environment
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RepoEnv {
    /// Helm home holding the organization's repository index and cache
    pub home: PathBuf,
}

impl RepoEnv {
    /// Helm home for `organization` under `root`
    pub fn for_organization(root: &Path, organization: &str) -> Self {
        Self {
            home: root.join(organization).join("helm"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repo_env_is_scoped_by_organization_name() {
        let env = RepoEnv::for_organization(Path::new("/var/lib/orgs"), "acme");
        assert_eq!(env.home, PathBuf::from("/var/lib/orgs/acme/helm"));
    }
}
