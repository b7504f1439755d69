//! Hook registry and runner
//!
//! A hook is a named, idempotent step run against a freshly provisioned
//! cluster. The set of hooks is closed ([`HookId`]) and their names are the
//! ones callers have always used. The runner resolves every requested name
//! before anything runs, then executes hooks one after another and reports
//! each outcome. One failing hook never prevents the next from running.

mod autoscaler;
mod control_plane;
mod credentials;
mod deployments;
mod prometheus;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{error, info, info_span, warn, Instrument};

use crate::cluster::ClusterHandle;
use crate::context::HookContext;
use crate::metrics;
use crate::{Error, Result};

pub use self::autoscaler::InstallClusterAutoscaler;
pub use self::control_plane::InstallHelm;
pub use self::credentials::{PersistKubernetesKeys, StoreKubeConfig};
pub use self::deployments::{InstallIngressController, InstallLogging, InstallMonitoring};
pub use self::prometheus::UpdatePrometheus;

/// Identifier of a registered hook
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HookId {
    /// Poll for the kubeconfig and store it durably
    StoreKubeConfig,
    /// Write kubeconfig and PEM files, mirror PEMs into the shared record
    PersistKubernetesKeys,
    /// Regenerate the Prometheus scrape configuration
    UpdatePrometheus,
    /// Install the package-manager agent and wait for it
    InstallHelm,
    /// Install the ingress controller chart
    InstallIngressController,
    /// Install the cluster autoscaler chart
    InstallClusterAutoscaler,
    /// Install the monitoring agent chart
    InstallMonitoring,
    /// Install the logging agent chart
    InstallLogging,
}

impl HookId {
    /// Every hook, in registry order
    pub const ALL: [HookId; 8] = [
        HookId::StoreKubeConfig,
        HookId::PersistKubernetesKeys,
        HookId::UpdatePrometheus,
        HookId::InstallHelm,
        HookId::InstallIngressController,
        HookId::InstallClusterAutoscaler,
        HookId::InstallMonitoring,
        HookId::InstallLogging,
    ];

    /// Name callers use to request the hook
    pub fn as_str(&self) -> &'static str {
        match self {
            HookId::StoreKubeConfig => "StoreKubeConfig",
            HookId::PersistKubernetesKeys => "PersistKubernetesKeys",
            HookId::UpdatePrometheus => "UpdatePrometheusPostHook",
            HookId::InstallHelm => "InstallHelmPostHook",
            HookId::InstallIngressController => "InstallIngressControllerPostHook",
            HookId::InstallClusterAutoscaler => "InstallClusterAutoscalerPostHook",
            HookId::InstallMonitoring => "InstallMonitoring",
            HookId::InstallLogging => "InstallLogging",
        }
    }
}

impl fmt::Display for HookId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HookId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        HookId::ALL
            .into_iter()
            .find(|id| id.as_str() == s)
            .ok_or_else(|| Error::UnknownHook(s.to_string()))
    }
}

/// How a hook invocation ended, when it did not fail
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HookOutcome {
    /// The hook did its work
    Completed,
    /// Nothing to do for this cluster
    Skipped(String),
    /// Installed, but readiness could not be confirmed within the budget
    ReadinessUnconfirmed,
}

impl HookOutcome {
    fn metric_label(&self) -> &'static str {
        match self {
            HookOutcome::Completed => "completed",
            HookOutcome::Skipped(_) => "skipped",
            HookOutcome::ReadinessUnconfirmed => "unconfirmed",
        }
    }
}

/// A post-provisioning step
#[async_trait]
pub trait Hook: Send + Sync {
    /// Run against `cluster`; must be safe to repeat
    async fn run(&self, cluster: &dyn ClusterHandle, ctx: &HookContext) -> Result<HookOutcome>;
}

/// Result of one hook in a run
#[derive(Debug)]
pub struct HookReport {
    /// Hook that ran
    pub hook: HookId,
    /// What it returned
    pub outcome: Result<HookOutcome>,
}

/// Queries over the reports of a run
pub trait RunSummary {
    /// Reports of hooks that returned an error
    fn failed(&self) -> Vec<&HookReport>;

    /// True when no hook returned an error
    fn all_succeeded(&self) -> bool {
        self.failed().is_empty()
    }
}

impl RunSummary for [HookReport] {
    fn failed(&self) -> Vec<&HookReport> {
        self.iter().filter(|r| r.outcome.is_err()).collect()
    }
}

/// Ordered set of hooks, built once and never mutated afterwards
#[derive(Clone)]
pub struct HookRegistry {
    hooks: Vec<(HookId, Arc<dyn Hook>)>,
}

impl HookRegistry {
    /// Registry with every built-in hook
    pub fn standard() -> Self {
        Self {
            hooks: HookId::ALL
                .into_iter()
                .map(|id| (id, builtin(id)))
                .collect(),
        }
    }

    /// Registry from explicit implementations; each id may appear once
    pub fn from_hooks(hooks: impl IntoIterator<Item = (HookId, Arc<dyn Hook>)>) -> Result<Self> {
        let mut registered: Vec<(HookId, Arc<dyn Hook>)> = Vec::new();
        for (id, hook) in hooks {
            if registered.iter().any(|(existing, _)| *existing == id) {
                return Err(Error::DuplicateHook(id.to_string()));
            }
            registered.push((id, hook));
        }
        Ok(Self { hooks: registered })
    }

    /// Registered ids in registration order
    pub fn ids(&self) -> impl Iterator<Item = HookId> + '_ {
        self.hooks.iter().map(|(id, _)| *id)
    }

    /// Implementation of `id`, if registered
    pub fn get(&self, id: HookId) -> Option<&Arc<dyn Hook>> {
        self.hooks
            .iter()
            .find(|(registered, _)| *registered == id)
            .map(|(_, hook)| hook)
    }

    /// Resolve every name; the first unknown or unregistered one fails the batch
    pub fn resolve<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<HookId>> {
        names
            .iter()
            .map(|name| {
                let name = name.as_ref();
                let id: HookId = name.parse()?;
                match self.get(id) {
                    Some(_) => Ok(id),
                    None => Err(Error::UnknownHook(name.to_string())),
                }
            })
            .collect()
    }

    /// Run `ids` in order against `cluster`, collecting one report per hook
    ///
    /// An id this registry does not hold fails the batch with
    /// [`Error::UnknownHook`] before any hook runs.
    pub async fn run(
        &self,
        ids: &[HookId],
        cluster: &dyn ClusterHandle,
        ctx: &HookContext,
    ) -> Result<Vec<HookReport>> {
        let hooks = ids
            .iter()
            .map(|&id| {
                self.get(id)
                    .map(|hook| (id, hook))
                    .ok_or_else(|| Error::UnknownHook(id.to_string()))
            })
            .collect::<Result<Vec<_>>>()?;

        let cluster_name = cluster.name();
        let mut reports = Vec::with_capacity(hooks.len());

        for (id, hook) in hooks {
            let span = info_span!("hook", hook = %id, cluster = %cluster_name);
            let started = Instant::now();

            let outcome = hook.run(cluster, ctx).instrument(span.clone()).await;

            span.in_scope(|| match &outcome {
                Ok(HookOutcome::Completed) => info!("Hook completed"),
                Ok(HookOutcome::Skipped(reason)) => info!(reason = %reason, "Hook skipped"),
                Ok(HookOutcome::ReadinessUnconfirmed) => {
                    warn!("Hook finished without confirming readiness")
                }
                Err(e) => error!(error = %e, "Hook failed"),
            });

            let label = match &outcome {
                Ok(outcome) => outcome.metric_label(),
                Err(_) => "error",
            };
            metrics::record_hook(id.as_str(), label, started.elapsed());

            reports.push(HookReport { hook: id, outcome });
        }

        Ok(reports)
    }

    /// Resolve `names` and run them; unknown names fail before any hook runs
    pub async fn run_named<S: AsRef<str>>(
        &self,
        names: &[S],
        cluster: &dyn ClusterHandle,
        ctx: &HookContext,
    ) -> Result<Vec<HookReport>> {
        let ids = self.resolve(names)?;
        self.run(&ids, cluster, ctx).await
    }
}

impl Default for HookRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

fn builtin(id: HookId) -> Arc<dyn Hook> {
    match id {
        HookId::StoreKubeConfig => Arc::new(StoreKubeConfig),
        HookId::PersistKubernetesKeys => Arc::new(PersistKubernetesKeys),
        HookId::UpdatePrometheus => Arc::new(UpdatePrometheus),
        HookId::InstallHelm => Arc::new(InstallHelm),
        HookId::InstallIngressController => Arc::new(InstallIngressController),
        HookId::InstallClusterAutoscaler => Arc::new(InstallClusterAutoscaler),
        HookId::InstallMonitoring => Arc::new(InstallMonitoring),
        HookId::InstallLogging => Arc::new(InstallLogging),
    }
}
