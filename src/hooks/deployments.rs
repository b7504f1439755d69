//! Chart installs with default values

use async_trait::async_trait;

use super::{Hook, HookOutcome};
use crate::cluster::ClusterHandle;
use crate::context::HookContext;
use crate::deploy::{install_deployment, Deployment};
use crate::Result;

/// Installs the ingress controller into the default namespace
#[derive(Clone, Copy, Debug, Default)]
pub struct InstallIngressController;

#[async_trait]
impl Hook for InstallIngressController {
    async fn run(&self, cluster: &dyn ClusterHandle, ctx: &HookContext) -> Result<HookOutcome> {
        let settings = ctx.settings()?;
        let deployment = Deployment::new(
            &settings.default_namespace,
            &settings.ingress_chart,
            &settings.ingress_release,
        );
        install_deployment(cluster, ctx, &deployment).await?;
        Ok(HookOutcome::Completed)
    }
}

/// Installs the monitoring agent into the default namespace
#[derive(Clone, Copy, Debug, Default)]
pub struct InstallMonitoring;

#[async_trait]
impl Hook for InstallMonitoring {
    async fn run(&self, cluster: &dyn ClusterHandle, ctx: &HookContext) -> Result<HookOutcome> {
        let settings = ctx.settings()?;
        let deployment = Deployment::new(
            &settings.default_namespace,
            &settings.monitoring_chart,
            &settings.monitoring_release,
        );
        install_deployment(cluster, ctx, &deployment).await?;
        Ok(HookOutcome::Completed)
    }
}

/// Installs the logging agent into the default namespace
#[derive(Clone, Copy, Debug, Default)]
pub struct InstallLogging;

#[async_trait]
impl Hook for InstallLogging {
    async fn run(&self, cluster: &dyn ClusterHandle, ctx: &HookContext) -> Result<HookOutcome> {
        let settings = ctx.settings()?;
        let deployment = Deployment::new(
            &settings.default_namespace,
            &settings.logging_chart,
            &settings.logging_release,
        );
        install_deployment(cluster, ctx, &deployment).await?;
        Ok(HookOutcome::Completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::MockClusterHandle;
    use crate::context::tests::TestContext;
    use crate::helm::ReleaseInfo;
    use crate::kubeconfig::tests::sample_kubeconfig;
    use crate::Error;

    fn cluster() -> MockClusterHandle {
        let mut cluster = MockClusterHandle::new();
        cluster.expect_name().return_const("prod".to_string());
        cluster.expect_organization_id().return_const(1u64);
        cluster
            .expect_kubeconfig()
            .returning(|| Ok(sample_kubeconfig("prod")));
        cluster
    }

    fn expect_chart(ctx: &mut TestContext, chart: &'static str, release: &'static str) {
        ctx.package_manager
            .expect_install_chart()
            .withf(move |request, _, _| {
                request.chart == chart
                    && request.release == release
                    && request.namespace == "default"
                    && request.values.is_empty()
            })
            .times(1)
            .returning(|request, _, _| {
                Ok(ReleaseInfo {
                    release: request.release.clone(),
                    namespace: request.namespace.clone(),
                })
            });
    }

    #[tokio::test]
    async fn test_ingress_uses_the_pipeline_release() {
        let mut ctx = TestContext::new();
        expect_chart(&mut ctx, "banzaicloud-stable/pipeline-cluster-ingress", "pipeline");

        let outcome = InstallIngressController
            .run(&cluster(), &ctx.build())
            .await
            .unwrap();
        assert_eq!(outcome, HookOutcome::Completed);
    }

    #[tokio::test]
    async fn test_monitoring_and_logging_follow_configured_charts() {
        let mut ctx = TestContext::new();
        ctx.settings.monitoring_chart = "internal/monitor".to_string();
        expect_chart(&mut ctx, "internal/monitor", "monitor");
        expect_chart(&mut ctx, "banzaicloud-stable/pipeline-cluster-logging", "logging");
        let ctx = ctx.build();

        InstallMonitoring.run(&cluster(), &ctx).await.unwrap();
        InstallLogging.run(&cluster(), &ctx).await.unwrap();
    }

    #[tokio::test]
    async fn test_install_failure_fails_the_hook() {
        let mut ctx = TestContext::new();
        ctx.package_manager
            .expect_install_chart()
            .returning(|request, _, _| Err(Error::install(&request.chart, "timed out")));

        let err = InstallLogging.run(&cluster(), &ctx.build()).await.unwrap_err();
        assert!(matches!(err, Error::Install { .. }));
    }
}
