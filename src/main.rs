//! Posthook - run post-provisioning hooks against a described cluster

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tracing::info;

use posthook::context::HookContext;
use posthook::descriptor::ClusterDescriptor;
use posthook::helm::HelmCli;
use posthook::hooks::{HookOutcome, HookRegistry, RunSummary};
use posthook::prometheus::PrometheusTargets;
use posthook::settings::{EnvSettings, SettingsSource};
use posthook::store::{ConfigMapCredentialStore, LocalFileStore, SecretAccessConfigStore};
use posthook::telemetry::{init_telemetry, shutdown_telemetry, TelemetryConfig};

/// Posthook - bring freshly provisioned Kubernetes clusters to an operable state
#[derive(Parser, Debug)]
#[command(name = "posthook", version, about, long_about = None)]
struct Cli {
    /// Emit JSON log lines
    #[arg(long, global = true, env = "POSTHOOK_LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run hooks, in the given order, against one cluster
    ///
    /// Every hook runs even if an earlier one failed. The exit code is
    /// non-zero if any hook failed or a hook name is unknown.
    Run(RunArgs),

    /// List the available hook names
    List,
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Path to the cluster descriptor YAML
    #[arg(short = 'c', long = "cluster")]
    cluster: PathBuf,

    /// Comma-separated hook names
    #[arg(long, value_delimiter = ',', required = true)]
    hooks: Vec<String>,

    /// Kubeconfig of the management cluster holding stored credentials
    ///
    /// Falls back to the in-cluster or default kubeconfig.
    #[arg(long, env = "POSTHOOK_MANAGEMENT_KUBECONFIG")]
    management_kubeconfig: Option<PathBuf>,

    /// Prefix of per-organization namespaces holding kubeconfig Secrets
    #[arg(long, env = "POSTHOOK_SECRET_NAMESPACE_PREFIX", default_value = "org-")]
    secret_namespace_prefix: String,

    /// Helm binary
    #[arg(long, env = "POSTHOOK_HELM_BINARY", default_value = "helm")]
    helm_binary: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_telemetry(TelemetryConfig {
        json: cli.log_json,
        ..Default::default()
    })
    .map_err(|e| anyhow::anyhow!("Failed to initialize telemetry: {}", e))?;

    let result = match cli.command {
        Commands::List => {
            for id in HookRegistry::standard().ids() {
                println!("{id}");
            }
            Ok(())
        }
        Commands::Run(args) => run(args).await,
    };

    shutdown_telemetry();
    result
}

async fn management_client(kubeconfig: Option<&PathBuf>) -> anyhow::Result<Client> {
    match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path)
                .map_err(|e| anyhow::anyhow!("Failed to read kubeconfig {:?}: {}", path, e))?;
            let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| anyhow::anyhow!("Invalid kubeconfig {:?}: {}", path, e))?;
            Ok(Client::try_from(config)?)
        }
        None => Ok(Client::try_default().await?),
    }
}

async fn run(args: RunArgs) -> anyhow::Result<()> {
    let registry = HookRegistry::standard();
    let ids = registry.resolve(args.hooks.as_slice())?;

    let cluster = ClusterDescriptor::load(&args.cluster).await?;
    // Malformed POSTHOOK_* variables fail the run before any hook starts
    EnvSettings.settings()?;
    let client = management_client(args.management_kubeconfig.as_ref()).await?;

    let ctx = HookContext {
        settings: Arc::new(EnvSettings),
        files: Arc::new(LocalFileStore),
        access_configs: Arc::new(SecretAccessConfigStore::new(
            client.clone(),
            args.secret_namespace_prefix,
        )),
        shared_credentials: Some(Arc::new(ConfigMapCredentialStore::new(client.clone()))),
        package_manager: Arc::new(HelmCli::new(args.helm_binary)),
        organizations: Arc::new(cluster.organizations()),
        prometheus: Arc::new(PrometheusTargets::new(client)),
    };

    info!(cluster = %args.cluster.display(), hooks = ids.len(), "Running hooks");
    let reports = registry.run(&ids, &cluster, &ctx).await?;

    for report in &reports {
        let status = match &report.outcome {
            Ok(HookOutcome::Completed) => "completed".to_string(),
            Ok(HookOutcome::Skipped(reason)) => format!("skipped: {reason}"),
            Ok(HookOutcome::ReadinessUnconfirmed) => "installed, readiness unconfirmed".to_string(),
            Err(e) => format!("failed: {e}"),
        };
        println!("{}\t{}", report.hook, status);
    }

    let failed = reports.failed();
    if !failed.is_empty() {
        anyhow::bail!("{} of {} hooks failed", failed.len(), reports.len());
    }
    Ok(())
}
