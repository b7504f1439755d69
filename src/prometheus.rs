//! Prometheus scrape configuration for every provisioned cluster
//!
//! The state store holds one directory per cluster with its `cluster.cfg`.
//! [`PrometheusTargets`] turns that directory listing into a scrape config and
//! applies it to the monitoring namespace, pointing TLS settings at the
//! certificates mirrored by the shared credential store.

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, Patch, PatchParams};
use kube::Client;
#[cfg(test)]
use mockall::automock;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::credentials::{CA_FILE, CERTIFICATE_FILE, CLUSTER_CONFIG_FILE, KEY_FILE};
use crate::kubeconfig::AccessConfig;
use crate::settings::HookSettings;
use crate::{Error, Result};

/// ConfigMap key holding the generated configuration
pub const PROMETHEUS_CONFIG_KEY: &str = "prometheus.yml";

const FIELD_MANAGER: &str = "posthook";

/// Regenerates the monitoring stack's scrape configuration
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PrometheusConfig: Send + Sync {
    /// Rebuild the scrape configuration from the current state store
    async fn refresh(&self, settings: &HookSettings) -> Result<()>;
}

/// A cluster API server to scrape
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScrapeTarget {
    /// Cluster name, also the job name
    pub cluster: String,
    /// `host:port` of the API server
    pub address: String,
}

#[derive(Serialize)]
struct ScrapeConfigFile {
    scrape_configs: Vec<ScrapeJob>,
}

#[derive(Serialize)]
struct ScrapeJob {
    job_name: String,
    scheme: &'static str,
    metrics_path: &'static str,
    static_configs: Vec<StaticConfig>,
    tls_config: TlsConfig,
}

#[derive(Serialize)]
struct StaticConfig {
    targets: Vec<String>,
}

#[derive(Serialize)]
struct TlsConfig {
    ca_file: String,
    cert_file: String,
    key_file: String,
}

/// Strip scheme and path from an API server URL
fn server_address(server: &str) -> Option<String> {
    let rest = server
        .strip_prefix("https://")
        .or_else(|| server.strip_prefix("http://"))
        .unwrap_or(server);
    let host = rest.split('/').next().unwrap_or_default();
    if host.is_empty() {
        return None;
    }
    Some(host.to_string())
}

/// Render the scrape configuration for `targets`
///
/// Certificates are expected under `mount_path` with the shared mirror's
/// `<cluster>_<file>` naming.
pub fn render_scrape_config(targets: &[ScrapeTarget], mount_path: &str) -> Result<String> {
    let mount = mount_path.trim_end_matches('/');
    let file = |cluster: &str, name: &str| format!("{mount}/{cluster}_{name}");

    let config = ScrapeConfigFile {
        scrape_configs: targets
            .iter()
            .map(|target| ScrapeJob {
                job_name: target.cluster.clone(),
                scheme: "https",
                metrics_path: "/metrics",
                static_configs: vec![StaticConfig {
                    targets: vec![target.address.clone()],
                }],
                tls_config: TlsConfig {
                    ca_file: file(&target.cluster, CA_FILE),
                    cert_file: file(&target.cluster, CERTIFICATE_FILE),
                    key_file: file(&target.cluster, KEY_FILE),
                },
            })
            .collect(),
    };

    serde_yaml::to_string(&config)
        .map_err(|e| Error::serialization(format!("prometheus config: {e}")))
}

/// Collect a scrape target for every cluster directory in the state store
///
/// Directories without a `cluster.cfg`, or whose config names no server, are
/// skipped. A missing state store yields no targets. Targets are sorted by
/// cluster name.
pub async fn discover_targets(state_store: &Path) -> Result<Vec<ScrapeTarget>> {
    let mut entries = match tokio::fs::read_dir(state_store).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut targets = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_dir() {
            continue;
        }
        let cluster = entry.file_name().to_string_lossy().into_owned();
        let raw = match tokio::fs::read(entry.path().join(CLUSTER_CONFIG_FILE)).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        };

        let address = match AccessConfig::parse(&raw) {
            Ok(config) => config.server.as_deref().and_then(server_address),
            Err(e) => {
                warn!(cluster = %cluster, error = %e, "Skipping unreadable cluster config");
                None
            }
        };
        match address {
            Some(address) => targets.push(ScrapeTarget { cluster, address }),
            None => debug!(cluster = %cluster, "No API server address, not scraping"),
        }
    }

    targets.sort_by(|a, b| a.cluster.cmp(&b.cluster));
    Ok(targets)
}

/// [`PrometheusConfig`] writing a ConfigMap through the Kubernetes API
pub struct PrometheusTargets {
    client: Client,
}

impl PrometheusTargets {
    /// Create a refresher using `client`
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PrometheusConfig for PrometheusTargets {
    async fn refresh(&self, settings: &HookSettings) -> Result<()> {
        let Some(mount_path) = settings.monitor_mount_path.as_deref().filter(|p| !p.is_empty())
        else {
            debug!("No certificate mount path configured, skipping prometheus refresh");
            return Ok(());
        };

        let targets = discover_targets(&settings.state_store_path).await?;
        let rendered = render_scrape_config(&targets, mount_path)?;

        let name = &settings.prometheus_configmap;
        let namespace = &settings.monitor_namespace;
        let cm = ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.clone()),
                namespace: Some(namespace.clone()),
                ..Default::default()
            },
            data: Some(BTreeMap::from([(PROMETHEUS_CONFIG_KEY.to_string(), rendered)])),
            ..Default::default()
        };

        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        api.patch(
            name,
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(&cm),
        )
        .await
        .map_err(|e| Error::store_write(format!("configmap {namespace}/{name}"), e))?;

        info!(configmap = %name, namespace = %namespace, targets = targets.len(), "Prometheus scrape config updated");
        Ok(())
    }
}
