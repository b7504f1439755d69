//! Credential hooks

use async_trait::async_trait;

use super::{Hook, HookOutcome};
use crate::cluster::ClusterHandle;
use crate::context::HookContext;
use crate::credentials::{acquire_and_persist, persist_keys};
use crate::Result;

/// Polls for the cluster's kubeconfig and stores it durably
#[derive(Clone, Copy, Debug, Default)]
pub struct StoreKubeConfig;

#[async_trait]
impl Hook for StoreKubeConfig {
    async fn run(&self, cluster: &dyn ClusterHandle, ctx: &HookContext) -> Result<HookOutcome> {
        acquire_and_persist(cluster, ctx).await?;
        Ok(HookOutcome::Completed)
    }
}

/// Writes the kubeconfig and client keys into the state store
#[derive(Clone, Copy, Debug, Default)]
pub struct PersistKubernetesKeys;

#[async_trait]
impl Hook for PersistKubernetesKeys {
    async fn run(&self, cluster: &dyn ClusterHandle, ctx: &HookContext) -> Result<HookOutcome> {
        persist_keys(cluster, ctx).await?;
        Ok(HookOutcome::Completed)
    }
}
