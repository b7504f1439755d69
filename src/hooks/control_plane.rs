//! Package-manager agent bootstrap
//!
//! Installs the agent, tolerating a cluster that is not reachable yet, then
//! waits until a client connection to the agent succeeds. An agent that was
//! installed but never answered is reported as
//! [`HookOutcome::ReadinessUnconfirmed`] rather than as success or failure.

use async_trait::async_trait;
use tracing::{error, info, warn};

use super::{Hook, HookOutcome};
use crate::cluster::ClusterHandle;
use crate::context::HookContext;
use crate::helm::{install_agent_with_retry, AgentInstall};
use crate::retry::poll_with_retry;
use crate::Result;

/// Installs the package-manager agent and waits for it to answer
#[derive(Clone, Copy, Debug, Default)]
pub struct InstallHelm;

#[async_trait]
impl Hook for InstallHelm {
    async fn run(&self, cluster: &dyn ClusterHandle, ctx: &HookContext) -> Result<HookOutcome> {
        let settings = ctx.settings()?;
        let request = AgentInstall {
            namespace: settings.tiller_namespace.clone(),
            service_account: settings.tiller_service_account.clone(),
            image: settings.tiller_image(),
        };

        let kubeconfig = cluster
            .kubeconfig()
            .await
            .inspect_err(|e| error!(error = %e, "Error retrieving kubernetes config"))?;

        install_agent_with_retry(
            ctx.package_manager.as_ref(),
            &request,
            &kubeconfig,
            &settings.helm_retry,
        )
        .await
        .inspect_err(|e| error!(error = %e, "Error installing package-manager agent"))?;
        info!(image = %request.image, namespace = %request.namespace, "Agent installed");

        let kubeconfig = cluster
            .kubeconfig()
            .await
            .inspect_err(|e| error!(error = %e, "Error retrieving kubernetes config"))?;

        let policy = settings.helm_retry.inclusive();
        match poll_with_retry(&policy, "connect_agent", || {
            ctx.package_manager.connect(&kubeconfig, &request.namespace)
        })
        .await
        {
            Ok(()) => {
                info!("Agent is answering");
                Ok(HookOutcome::Completed)
            }
            Err(e) => {
                warn!(attempts = policy.attempts, error = %e, "Agent did not answer within the retry budget");
                Ok(HookOutcome::ReadinessUnconfirmed)
            }
        }
    }
}
