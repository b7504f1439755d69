//! Hook configuration
//!
//! Hooks never cache configuration. Each invocation asks its [`SettingsSource`]
//! for a fresh [`HookSettings`] snapshot, so operators can change retry budgets
//! or chart names between runs without restarting the process.

use std::path::PathBuf;

#[cfg(test)]
use mockall::automock;

use crate::retry::RetryPolicy;
use crate::{Error, Result};

/// Environment variable prefix for all settings
pub const ENV_PREFIX: &str = "POSTHOOK_";

/// Snapshot of every value the hooks read
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HookSettings {
    /// Polling budget for downloading a cluster's kubeconfig
    pub config_retry: RetryPolicy,
    /// Polling budget for the package-manager agent install and readiness wait
    pub helm_retry: RetryPolicy,
    /// Tag of the package-manager agent image
    pub tiller_version: String,
    /// Agent image repository, the tag is appended
    pub tiller_image_repository: String,
    /// Namespace the agent is installed into
    pub tiller_namespace: String,
    /// Service account the agent runs as
    pub tiller_service_account: String,
    /// Root directory for per-cluster credential artifacts
    pub state_store_path: PathBuf,
    /// Root directory for per-organization helm homes
    pub helm_home_root: PathBuf,
    /// Shared ConfigMap mirroring every cluster's certificates, if enabled
    pub monitor_configmap: Option<String>,
    /// Path the shared ConfigMap is mounted at inside the monitoring pod
    pub monitor_mount_path: Option<String>,
    /// Namespace of the shared ConfigMap and the Prometheus config
    pub monitor_namespace: String,
    /// ConfigMap holding the generated Prometheus scrape configuration
    pub prometheus_configmap: String,
    /// Namespace for user-facing deployments
    pub default_namespace: String,
    /// Namespace for cluster-level system deployments
    pub system_namespace: String,
    /// Ingress controller chart
    pub ingress_chart: String,
    /// Ingress controller release name
    pub ingress_release: String,
    /// Cluster autoscaler chart
    pub autoscaler_chart: String,
    /// Monitoring agent chart
    pub monitoring_chart: String,
    /// Monitoring agent release name
    pub monitoring_release: String,
    /// Logging agent chart
    pub logging_chart: String,
    /// Logging agent release name
    pub logging_release: String,
}

impl Default for HookSettings {
    fn default() -> Self {
        Self {
            config_retry: RetryPolicy::from_secs(30, 15),
            helm_retry: RetryPolicy::from_secs(30, 15),
            tiller_version: "v2.9.0".to_string(),
            tiller_image_repository: "gcr.io/kubernetes-helm/tiller".to_string(),
            tiller_namespace: "kube-system".to_string(),
            tiller_service_account: "tiller".to_string(),
            state_store_path: PathBuf::from("./statestore"),
            helm_home_root: PathBuf::from("./orgs"),
            monitor_configmap: None,
            monitor_mount_path: None,
            monitor_namespace: "default".to_string(),
            prometheus_configmap: "prometheus-server".to_string(),
            default_namespace: "default".to_string(),
            system_namespace: "kube-system".to_string(),
            ingress_chart: "banzaicloud-stable/pipeline-cluster-ingress".to_string(),
            ingress_release: "pipeline".to_string(),
            autoscaler_chart: "banzaicloud-stable/cluster-autoscaler".to_string(),
            monitoring_chart: "banzaicloud-stable/pipeline-cluster-monitor".to_string(),
            monitoring_release: "monitor".to_string(),
            logging_chart: "banzaicloud-stable/pipeline-cluster-logging".to_string(),
            logging_release: "logging".to_string(),
        }
    }
}

impl HookSettings {
    /// Full agent image reference
    pub fn tiller_image(&self) -> String {
        format!("{}:{}", self.tiller_image_repository, self.tiller_version)
    }

    /// Directory holding one cluster's credential artifacts
    pub fn cluster_state_dir(&self, cluster_name: &str) -> PathBuf {
        self.state_store_path.join(cluster_name)
    }

    /// Shared mirror target, present only when both name and mount path are set
    pub fn shared_mirror(&self) -> Option<&str> {
        match (&self.monitor_configmap, &self.monitor_mount_path) {
            (Some(name), Some(path)) if !name.is_empty() && !path.is_empty() => Some(name.as_str()),
            _ => None,
        }
    }
}

/// Source of [`HookSettings`], queried at every hook invocation
#[cfg_attr(test, automock)]
pub trait SettingsSource: Send + Sync {
    /// Current settings
    fn settings(&self) -> Result<HookSettings>;
}

/// Fixed settings, mostly for tests and embedding
#[derive(Clone, Debug, Default)]
pub struct StaticSettings(pub HookSettings);

impl SettingsSource for StaticSettings {
    fn settings(&self) -> Result<HookSettings> {
        Ok(self.0.clone())
    }
}

/// Settings read from `POSTHOOK_*` environment variables on every call
///
/// Unset variables fall back to [`HookSettings::default`].
#[derive(Clone, Debug, Default)]
pub struct EnvSettings;

impl SettingsSource for EnvSettings {
    fn settings(&self) -> Result<HookSettings> {
        settings_from_lookup(|key| std::env::var(format!("{ENV_PREFIX}{key}")).ok())
    }
}

fn settings_from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<HookSettings> {
    let defaults = HookSettings::default();

    let int = |key: &str, default: u64| -> Result<u64> {
        match lookup(key) {
            Some(raw) => raw.trim().parse::<u64>().map_err(|e| {
                Error::config(format!("{ENV_PREFIX}{key}={raw:?} is not an integer: {e}"))
            }),
            None => Ok(default),
        }
    };
    let string = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());
    let attempts = |key: &str, default: u32| -> Result<u32> {
        let value = int(key, u64::from(default))?;
        u32::try_from(value)
            .map_err(|_| Error::config(format!("{ENV_PREFIX}{key}={value} is out of range")))
    };

    Ok(HookSettings {
        config_retry: RetryPolicy::from_secs(
            attempts("CONFIG_RETRY_COUNT", defaults.config_retry.attempts)?,
            int("CONFIG_RETRY_SLEEP", defaults.config_retry.delay.as_secs())?,
        ),
        helm_retry: RetryPolicy::from_secs(
            attempts("HELM_RETRY_ATTEMPTS", defaults.helm_retry.attempts)?,
            int("HELM_RETRY_SLEEP", defaults.helm_retry.delay.as_secs())?,
        ),
        tiller_version: string("TILLER_VERSION", &defaults.tiller_version),
        tiller_image_repository: string("TILLER_IMAGE_REPOSITORY", &defaults.tiller_image_repository),
        tiller_namespace: string("TILLER_NAMESPACE", &defaults.tiller_namespace),
        tiller_service_account: string("TILLER_SERVICE_ACCOUNT", &defaults.tiller_service_account),
        state_store_path: lookup("STATE_STORE_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.state_store_path),
        helm_home_root: lookup("HELM_HOME_ROOT")
            .map(PathBuf::from)
            .unwrap_or(defaults.helm_home_root),
        monitor_configmap: lookup("MONITOR_CONFIGMAP").filter(|v| !v.is_empty()),
        monitor_mount_path: lookup("MONITOR_MOUNT_PATH").filter(|v| !v.is_empty()),
        monitor_namespace: string("MONITOR_NAMESPACE", &defaults.monitor_namespace),
        prometheus_configmap: string("PROMETHEUS_CONFIGMAP", &defaults.prometheus_configmap),
        default_namespace: string("DEFAULT_NAMESPACE", &defaults.default_namespace),
        system_namespace: string("SYSTEM_NAMESPACE", &defaults.system_namespace),
        ingress_chart: string("INGRESS_CHART", &defaults.ingress_chart),
        ingress_release: string("INGRESS_RELEASE", &defaults.ingress_release),
        autoscaler_chart: string("AUTOSCALER_CHART", &defaults.autoscaler_chart),
        monitoring_chart: string("MONITORING_CHART", &defaults.monitoring_chart),
        monitoring_release: string("MONITORING_RELEASE", &defaults.monitoring_release),
        logging_chart: string("LOGGING_CHART", &defaults.logging_chart),
        logging_release: string("LOGGING_RELEASE", &defaults.logging_release),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_unset_variables_fall_back_to_defaults() {
        let settings = settings_from_lookup(lookup(&[])).unwrap();
        assert_eq!(settings, HookSettings::default());
        assert_eq!(settings.tiller_image(), "gcr.io/kubernetes-helm/tiller:v2.9.0");
        assert!(settings.shared_mirror().is_none());
    }

    #[test]
    fn test_retry_budgets_are_read_from_environment() {
        let settings = settings_from_lookup(lookup(&[
            ("CONFIG_RETRY_COUNT", "3"),
            ("CONFIG_RETRY_SLEEP", "2"),
            ("HELM_RETRY_ATTEMPTS", "7"),
            ("HELM_RETRY_SLEEP", "1"),
            ("TILLER_VERSION", "v2.10.0"),
        ]))
        .unwrap();

        assert_eq!(settings.config_retry.attempts, 3);
        assert_eq!(settings.config_retry.delay, Duration::from_secs(2));
        assert_eq!(settings.helm_retry.attempts, 7);
        assert_eq!(settings.helm_retry.delay, Duration::from_secs(1));
        assert!(settings.tiller_image().ends_with(":v2.10.0"));
    }

    #[test]
    fn test_non_numeric_retry_count_is_a_config_error() {
        let err = settings_from_lookup(lookup(&[("CONFIG_RETRY_COUNT", "lots")])).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("POSTHOOK_CONFIG_RETRY_COUNT"));
    }

    #[test]
    fn test_shared_mirror_requires_both_name_and_mount_path() {
        let only_name =
            settings_from_lookup(lookup(&[("MONITOR_CONFIGMAP", "cluster-certs")])).unwrap();
        assert!(only_name.shared_mirror().is_none());

        let both = settings_from_lookup(lookup(&[
            ("MONITOR_CONFIGMAP", "cluster-certs"),
            ("MONITOR_MOUNT_PATH", "/etc/cluster-certs"),
        ]))
        .unwrap();
        assert_eq!(both.shared_mirror(), Some("cluster-certs"));
    }

    #[test]
    fn test_cluster_state_dir_is_nested_under_state_store() {
        let settings = HookSettings {
            state_store_path: PathBuf::from("/var/lib/posthook"),
            ..Default::default()
        };
        assert_eq!(
            settings.cluster_state_dir("prod-eu"),
            PathBuf::from("/var/lib/posthook/prod-eu")
        );
    }
}
