//! Cluster autoscaler hook

use async_trait::async_trait;
use tracing::{error, info};

use super::{Hook, HookOutcome};
use crate::autoscaler::{for_provider, AUTOSCALER_RELEASE};
use crate::cluster::ClusterHandle;
use crate::context::HookContext;
use crate::deploy::{install_deployment, Deployment};
use crate::Result;

/// Installs the cluster autoscaler on providers that support it
#[derive(Clone, Copy, Debug, Default)]
pub struct InstallClusterAutoscaler;

#[async_trait]
impl Hook for InstallClusterAutoscaler {
    async fn run(&self, cluster: &dyn ClusterHandle, ctx: &HookContext) -> Result<HookOutcome> {
        let provider = cluster.provider();
        let Some(capability) = for_provider(provider) else {
            info!(provider = %provider, "Autoscaling not supported for provider");
            return Ok(HookOutcome::Skipped(format!(
                "autoscaling not supported on {provider}"
            )));
        };

        let name = cluster.name();
        let topology = cluster.node_topology();
        let groups = capability.node_groups(&name, &topology);
        if groups.is_empty() {
            info!("No node groups configured for autoscaling");
            return Ok(HookOutcome::Skipped(
                "no node groups configured for autoscaling".to_string(),
            ));
        }

        let secret = cluster.cloud_secret().await?;
        let values = capability
            .values(&name, &topology, &secret, groups)?
            .to_yaml()
            .inspect_err(|e| error!(error = %e, "Error during values marshal"))?;

        let settings = ctx.settings()?;
        let deployment = Deployment::new(
            &settings.system_namespace,
            &settings.autoscaler_chart,
            AUTOSCALER_RELEASE,
        )
        .with_values(values);
        install_deployment(cluster, ctx, &deployment).await?;
        Ok(HookOutcome::Completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autoscaler::AutoscalingValues;
    use crate::cluster::{CloudSecret, MockClusterHandle, NodePool, NodeTopology, ProviderType};
    use crate::context::tests::TestContext;
    use crate::helm::ReleaseInfo;
    use crate::kubeconfig::tests::sample_kubeconfig;
    use crate::Error;

    fn cluster(provider: ProviderType, autoscaling: bool) -> MockClusterHandle {
        let mut cluster = MockClusterHandle::new();
        cluster.expect_name().return_const("prod".to_string());
        cluster.expect_organization_id().return_const(1u64);
        cluster.expect_provider().return_const(provider);
        cluster.expect_node_topology().returning(move || NodeTopology {
            location: "eu-west-1".to_string(),
            resource_group: Some("rg".to_string()),
            node_pools: vec![NodePool {
                name: "workers".to_string(),
                count: 2,
                autoscaling,
                min_count: 1,
                max_count: 4,
            }],
        });
        cluster
            .expect_cloud_secret()
            .returning(|| Ok(CloudSecret::new()));
        cluster
            .expect_kubeconfig()
            .returning(|| Ok(sample_kubeconfig("prod")));
        cluster
    }

    #[tokio::test]
    async fn test_aws_cluster_gets_autoscaler_in_system_namespace() {
        let mut ctx = TestContext::new();
        ctx.package_manager
            .expect_install_chart()
            .withf(|request, _, _| {
                let values = AutoscalingValues::from_yaml(&request.values).unwrap();
                request.chart == "banzaicloud-stable/cluster-autoscaler"
                    && request.release == "autoscaler"
                    && request.namespace == "kube-system"
                    && values.cloud_provider == "aws"
                    && values.autoscaling_groups.len() == 1
                    && values.autoscaling_groups[0].name == "prod.node.workers"
            })
            .times(1)
            .returning(|request, _, _| {
                Ok(ReleaseInfo {
                    release: request.release.clone(),
                    namespace: request.namespace.clone(),
                })
            });

        let outcome = InstallClusterAutoscaler
            .run(&cluster(ProviderType::Aws, true), &ctx.build())
            .await
            .unwrap();
        assert_eq!(outcome, HookOutcome::Completed);
    }

    #[tokio::test]
    async fn test_zero_node_groups_never_reach_the_installer() {
        let mut ctx = TestContext::new();
        ctx.package_manager.expect_install_chart().never();

        let outcome = InstallClusterAutoscaler
            .run(&cluster(ProviderType::Aws, false), &ctx.build())
            .await
            .unwrap();
        assert!(matches!(outcome, HookOutcome::Skipped(_)));
    }

    #[tokio::test]
    async fn test_unsupported_provider_is_skipped() {
        let mut ctx = TestContext::new();
        ctx.package_manager.expect_install_chart().never();

        let outcome = InstallClusterAutoscaler
            .run(&cluster(ProviderType::Gcp, true), &ctx.build())
            .await
            .unwrap();
        assert!(matches!(outcome, HookOutcome::Skipped(reason) if reason.contains("gcp")));
    }

    #[tokio::test]
    async fn test_incomplete_azure_secret_fails_before_install() {
        let mut ctx = TestContext::new();
        ctx.package_manager.expect_install_chart().never();

        let err = InstallClusterAutoscaler
            .run(&cluster(ProviderType::Azure, true), &ctx.build())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Provider { .. }));
    }
}
