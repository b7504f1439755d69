//! Deployment installer: "install this chart on this cluster"
//!
//! Resolves the cluster's kubeconfig and owning organization, then delegates
//! to the package manager. Whether a failure is fatal is left to the calling
//! hook.

use tracing::{error, info};

use crate::cluster::ClusterHandle;
use crate::context::HookContext;
use crate::helm::{ChartInstall, ReleaseInfo};
use crate::organization::RepoEnv;
use crate::Result;

/// A chart to install on a cluster
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Deployment {
    /// Target namespace
    pub namespace: String,
    /// Chart reference
    pub chart: String,
    /// Release name; empty lets the package manager generate one
    pub release: String,
    /// YAML values; empty means chart defaults
    pub values: Vec<u8>,
}

impl Deployment {
    /// Deployment with chart-default values
    pub fn new(
        namespace: impl Into<String>,
        chart: impl Into<String>,
        release: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            chart: chart.into(),
            release: release.into(),
            values: Vec::new(),
        }
    }

    /// Attach YAML values
    pub fn with_values(mut self, values: Vec<u8>) -> Self {
        self.values = values;
        self
    }
}

/// Install `deployment` on `cluster`
///
/// The kubeconfig must already be retrievable; this does not poll.
pub async fn install_deployment(
    cluster: &dyn ClusterHandle,
    ctx: &HookContext,
    deployment: &Deployment,
) -> Result<ReleaseInfo> {
    let settings = ctx.settings()?;

    let kubeconfig = cluster.kubeconfig().await.inspect_err(|e| {
        error!(error = %e, "Unable to fetch kubeconfig for deployment");
    })?;

    let organization_id = cluster.organization_id();
    let organization = ctx
        .organizations
        .organization(organization_id)
        .await
        .inspect_err(|e| {
            error!(organization = organization_id, error = %e, "Error resolving organization");
        })?;

    let repo = RepoEnv::for_organization(&settings.helm_home_root, &organization.name);
    let request = ChartInstall {
        chart: deployment.chart.clone(),
        namespace: deployment.namespace.clone(),
        release: deployment.release.clone(),
        values: deployment.values.clone(),
    };

    let release = ctx
        .package_manager
        .install_chart(&request, &kubeconfig, &repo)
        .await
        .inspect_err(|e| {
            error!(chart = %deployment.chart, error = %e, "Deployment failed");
        })?;

    info!(chart = %deployment.chart, release = %release.release, namespace = %release.namespace, "Deployment installed");
    Ok(release)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::MockClusterHandle;
    use crate::context::tests::TestContext;
    use crate::kubeconfig::tests::sample_kubeconfig;
    use crate::Error;
    use mockall::predicate::*;
    use std::path::PathBuf;

    fn cluster() -> MockClusterHandle {
        let mut cluster = MockClusterHandle::new();
        cluster.expect_name().return_const("prod".to_string());
        cluster.expect_organization_id().return_const(7u64);
        cluster
            .expect_kubeconfig()
            .returning(|| Ok(sample_kubeconfig("prod")));
        cluster
    }

    #[tokio::test]
    async fn test_installs_chart_with_organization_helm_home() {
        let mut ctx = TestContext::new();
        ctx.package_manager
            .expect_install_chart()
            .withf(|request, kubeconfig, repo| {
                request.chart == "banzaicloud-stable/pipeline-cluster-ingress"
                    && request.namespace == "default"
                    && request.release == "pipeline"
                    && request.values.is_empty()
                    && kubeconfig == sample_kubeconfig("prod").as_slice()
                    && repo.home == PathBuf::from("/orgs/org-7/helm")
            })
            .times(1)
            .returning(|request, _, _| {
                Ok(ReleaseInfo {
                    release: request.release.clone(),
                    namespace: request.namespace.clone(),
                })
            });

        let deployment = Deployment::new(
            "default",
            "banzaicloud-stable/pipeline-cluster-ingress",
            "pipeline",
        );
        let release = install_deployment(&cluster(), &ctx.build(), &deployment)
            .await
            .unwrap();
        assert_eq!(release.release, "pipeline");
    }

    #[tokio::test]
    async fn test_missing_kubeconfig_stops_before_package_manager() {
        let mut cluster = MockClusterHandle::new();
        cluster.expect_organization_id().return_const(7u64);
        cluster
            .expect_kubeconfig()
            .returning(|| Err(Error::kubeconfig("not ready")));

        let mut ctx = TestContext::new();
        ctx.package_manager.expect_install_chart().never();

        let err = install_deployment(&cluster, &ctx.build(), &Deployment::new("default", "c", "r"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Kubeconfig(_)));
    }

    #[tokio::test]
    async fn test_organization_failure_is_returned() {
        let mut ctx = TestContext::new();
        let mut organizations = crate::organization::MockOrganizationResolver::new();
        organizations
            .expect_organization()
            .with(eq(7u64))
            .returning(|id| {
                Err(Error::Organization {
                    id,
                    message: "not found".to_string(),
                })
            });
        ctx.organizations = organizations;
        ctx.package_manager.expect_install_chart().never();

        let err = install_deployment(&cluster(), &ctx.build(), &Deployment::new("default", "c", "r"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Organization { id: 7, .. }));
    }

    #[tokio::test]
    async fn test_package_manager_failure_is_returned_unjudged() {
        let mut ctx = TestContext::new();
        ctx.package_manager
            .expect_install_chart()
            .returning(|request, _, _| Err(Error::install(&request.chart, "release exists")));

        let err = install_deployment(&cluster(), &ctx.build(), &Deployment::new("default", "c", "r"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("release exists"));
    }
}
