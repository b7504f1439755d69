//! Package-manager client
//!
//! [`PackageManager`] abstracts the helm client for testability. [`HelmCli`]
//! drives the `helm` binary; every invocation gets the target cluster's
//! kubeconfig through a scratch file that is removed when the call returns.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tempfile::NamedTempFile;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::organization::RepoEnv;
use crate::retry::{poll_with_retry_if, RetryPolicy};
use crate::{Error, Result};

/// Timeout for a single helm invocation
const COMMAND_TIMEOUT: Duration = Duration::from_secs(300);

/// Timeout for the agent connectivity check
const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Stderr fragments meaning the cluster-side agent is not reachable yet
const UNREACHABLE_MARKERS: &[&str] = &[
    "could not find a ready tiller pod",
    "could not find tiller",
    "connection refused",
    "context deadline exceeded",
    "i/o timeout",
];

/// A chart installation request
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChartInstall {
    /// Chart reference (`repo/chart`)
    pub chart: String,
    /// Target namespace
    pub namespace: String,
    /// Release name; empty lets the package manager generate one
    pub release: String,
    /// YAML values; empty means chart defaults
    pub values: Vec<u8>,
}

/// An installed release
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReleaseInfo {
    /// Release name as reported by the package manager
    pub release: String,
    /// Namespace the release lives in
    pub namespace: String,
}

/// Request to install the package-manager's cluster-side agent
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AgentInstall {
    /// Namespace for the agent
    pub namespace: String,
    /// Service account the agent runs as
    pub service_account: String,
    /// Agent image reference
    pub image: String,
}

/// Client for installing packages onto clusters
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PackageManager: Send + Sync {
    /// Install a chart on the cluster reachable through `kubeconfig`
    async fn install_chart(
        &self,
        request: &ChartInstall,
        kubeconfig: &[u8],
        repo: &RepoEnv,
    ) -> Result<ReleaseInfo>;

    /// Install (or upgrade) the cluster-side agent.
    ///
    /// Returns [`Error::AgentUnreachable`] when the cluster cannot be reached
    /// yet and any other error when the install itself was rejected.
    async fn install_agent(&self, request: &AgentInstall, kubeconfig: &[u8]) -> Result<()>;

    /// Build a client connection to the agent installed in `agent_namespace`
    async fn connect(&self, kubeconfig: &[u8], agent_namespace: &str) -> Result<()>;
}

/// Install the agent, retrying only while the cluster is unreachable
///
/// A rejected install is returned immediately.
pub async fn install_agent_with_retry(
    package_manager: &dyn PackageManager,
    request: &AgentInstall,
    kubeconfig: &[u8],
    policy: &RetryPolicy,
) -> Result<()> {
    poll_with_retry_if(
        policy,
        "install_agent",
        || package_manager.install_agent(request, kubeconfig),
        |e| matches!(e, Error::AgentUnreachable(_)),
    )
    .await
}

/// [`PackageManager`] driving the `helm` binary
#[derive(Clone, Debug)]
pub struct HelmCli {
    binary: PathBuf,
}

impl HelmCli {
    /// Create a client running `binary`
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    async fn run(&self, args: &[String], env_home: Option<&Path>) -> std::result::Result<String, String> {
        let mut cmd = Command::new(&self.binary);
        cmd.args(args).kill_on_drop(true);
        if let Some(home) = env_home {
            cmd.env("HELM_HOME", home);
        }

        debug!(binary = %self.binary.display(), ?args, "Running helm");

        let output = tokio::time::timeout(COMMAND_TIMEOUT, cmd.output())
            .await
            .map_err(|_| format!("timed out after {COMMAND_TIMEOUT:?}"))?
            .map_err(|e| format!("failed to execute {}: {e}", self.binary.display()))?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stdout = String::from_utf8_lossy(&output.stdout);
            Err(format!("{} {}", stdout.trim(), stderr.trim()).trim().to_string())
        }
    }
}

/// Write bytes to a scratch file that lives as long as the returned handle
fn scratch_file(contents: &[u8], what: &str) -> Result<NamedTempFile> {
    let mut file = NamedTempFile::new().map_err(|e| Error::store_write(what, e))?;
    file.write_all(contents)
        .and_then(|_| file.flush())
        .map_err(|e| Error::store_write(what, e))?;
    Ok(file)
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Split agent failures into "not reachable yet" and "rejected"
fn classify_agent_failure(image: &str, message: String) -> Error {
    let lower = message.to_ascii_lowercase();
    if UNREACHABLE_MARKERS.iter().any(|m| lower.contains(m)) {
        Error::AgentUnreachable(message)
    } else {
        Error::install(image, message)
    }
}

/// Arguments for installing a chart
///
/// A named release goes through `helm upgrade --install` so reruns are
/// idempotent. Without a name, `helm install` lets tiller pick one.
fn chart_args(request: &ChartInstall, kubeconfig: &Path, values: Option<&Path>) -> Vec<String> {
    let mut args = if request.release.is_empty() {
        vec!["install".to_string()]
    } else {
        vec![
            "upgrade".to_string(),
            "--install".to_string(),
            request.release.clone(),
        ]
    };
    args.extend([
        request.chart.clone(),
        "--namespace".to_string(),
        request.namespace.clone(),
        "--kubeconfig".to_string(),
        path_arg(kubeconfig),
    ]);
    if let Some(values) = values {
        args.extend(["--values".to_string(), path_arg(values)]);
    }
    args
}

/// Release name from the `NAME:` line `helm install` prints
fn generated_release_name(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .find_map(|line| line.trim().strip_prefix("NAME:"))
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
}

/// Arguments for `helm init` installing the agent
fn agent_args(request: &AgentInstall, kubeconfig: &Path) -> Vec<String> {
    vec![
        "init".to_string(),
        "--upgrade".to_string(),
        "--service-account".to_string(),
        request.service_account.clone(),
        "--tiller-namespace".to_string(),
        request.namespace.clone(),
        "--tiller-image".to_string(),
        request.image.clone(),
        "--kubeconfig".to_string(),
        path_arg(kubeconfig),
    ]
}

#[async_trait]
impl PackageManager for HelmCli {
    async fn install_chart(
        &self,
        request: &ChartInstall,
        kubeconfig: &[u8],
        repo: &RepoEnv,
    ) -> Result<ReleaseInfo> {
        let kubeconfig_file = scratch_file(kubeconfig, "kubeconfig scratch file")?;
        let values_file = if request.values.is_empty() {
            None
        } else {
            Some(scratch_file(&request.values, "values scratch file")?)
        };

        let args = chart_args(
            request,
            kubeconfig_file.path(),
            values_file.as_ref().map(|f| f.path()),
        );

        let stdout = self
            .run(&args, Some(repo.home.as_path()))
            .await
            .map_err(|message| Error::install(&request.chart, message))?;

        let release = if request.release.is_empty() {
            generated_release_name(&stdout).unwrap_or_default()
        } else {
            request.release.clone()
        };
        info!(chart = %request.chart, release = %release, namespace = %request.namespace, "Chart installed");

        Ok(ReleaseInfo {
            release,
            namespace: request.namespace.clone(),
        })
    }

    async fn install_agent(&self, request: &AgentInstall, kubeconfig: &[u8]) -> Result<()> {
        let kubeconfig_file = scratch_file(kubeconfig, "kubeconfig scratch file")?;
        let args = agent_args(request, kubeconfig_file.path());

        match self.run(&args, None).await {
            Ok(_) => {
                info!(image = %request.image, namespace = %request.namespace, "Agent installed");
                Ok(())
            }
            Err(message) => {
                warn!(image = %request.image, error = %message, "Agent install failed");
                Err(classify_agent_failure(&request.image, message))
            }
        }
    }

    async fn connect(&self, kubeconfig: &[u8], agent_namespace: &str) -> Result<()> {
        let kubeconfig_file = scratch_file(kubeconfig, "kubeconfig scratch file")?;
        let args = vec![
            "version".to_string(),
            "--server".to_string(),
            "--tiller-namespace".to_string(),
            agent_namespace.to_string(),
            "--tiller-connection-timeout".to_string(),
            CONNECT_TIMEOUT_SECS.to_string(),
            "--kubeconfig".to_string(),
            path_arg(kubeconfig_file.path()),
        ];

        self.run(&args, None)
            .await
            .map(|_| ())
            .map_err(Error::AgentUnreachable)
    }
}
