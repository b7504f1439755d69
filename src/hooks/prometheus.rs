//! Prometheus refresh hook

use async_trait::async_trait;
use tracing::warn;

use super::{Hook, HookOutcome};
use crate::cluster::ClusterHandle;
use crate::context::HookContext;
use crate::Result;

/// Regenerates the scrape configuration; a failed refresh is only a warning
#[derive(Clone, Copy, Debug, Default)]
pub struct UpdatePrometheus;

#[async_trait]
impl Hook for UpdatePrometheus {
    async fn run(&self, _cluster: &dyn ClusterHandle, ctx: &HookContext) -> Result<HookOutcome> {
        let settings = ctx.settings()?;
        if let Err(e) = ctx.prometheus.refresh(&settings).await {
            warn!(error = %e, "Could not update prometheus configmap");
        }
        Ok(HookOutcome::Completed)
    }
}
