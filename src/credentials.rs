//! Credential acquisition and persistence
//!
//! Two operations back the credential hooks:
//! - [`acquire_and_persist`] polls the provider until a kubeconfig can be
//!   downloaded, then hands it to durable storage.
//! - [`persist_keys`] writes the kubeconfig and its PEM material into the
//!   cluster's state directory and, when configured, mirrors the PEMs into
//!   the shared credential record read by the monitoring stack.
//!
//! Both are idempotent: re-running with the same kubeconfig produces the same
//! files and the same shared entries.

use tracing::{debug, error, info, warn};

use crate::cluster::ClusterHandle;
use crate::context::HookContext;
use crate::kubeconfig::{AccessConfig, ClientKeys};
use crate::retry::poll_with_retry;
use crate::store::SharedCredentialStore;
use crate::{Error, Result};

/// Kubeconfig file name inside a cluster's state directory
pub const CLUSTER_CONFIG_FILE: &str = "cluster.cfg";
/// Client private key file name
pub const KEY_FILE: &str = "client-key-data.pem";
/// Client certificate file name
pub const CERTIFICATE_FILE: &str = "client-certificate-data.pem";
/// Cluster CA file name
pub const CA_FILE: &str = "certificate-authority-data.pem";

/// Read-modify-write attempts against the shared record before giving up
pub const SHARED_STORE_CAS_ATTEMPTS: u32 = 5;

/// Key of a cluster's PEM file in the shared record
pub fn shared_key(cluster: &str, file: &str) -> String {
    format!("{cluster}_{file}")
}

/// Download the cluster's kubeconfig with bounded polling and store it durably
pub async fn acquire_and_persist(cluster: &dyn ClusterHandle, ctx: &HookContext) -> Result<()> {
    let settings = ctx.settings()?;
    let name = cluster.name();
    let policy = settings.config_retry;

    let kubeconfig = poll_with_retry(&policy, "download_kubeconfig", || {
        cluster.download_kubeconfig()
    })
    .await
    .map_err(|e| {
        error!(cluster = %name, error = %e, "Error downloading kubeconfig");
        Error::CredentialUnavailable {
            cluster: name.clone(),
            attempts: policy.attempts.max(1),
            message: e.to_string(),
        }
    })?;

    ctx.access_configs
        .store(cluster.organization_id(), &name, &kubeconfig)
        .await
        .map_err(|e| match e {
            Error::StoreWrite { .. } => e,
            other => Error::store_write(format!("access config for {name}"), other),
        })
        .inspect_err(|e| error!(cluster = %name, error = %e, "Error storing kubeconfig"))?;

    info!(cluster = %name, "Kubeconfig stored");
    Ok(())
}

/// Write the kubeconfig and PEM material to the state store, then mirror the
/// PEMs into the shared record if one is configured
///
/// Stops at the first failed write; files written before it stay in place.
pub async fn persist_keys(cluster: &dyn ClusterHandle, ctx: &HookContext) -> Result<()> {
    let settings = ctx.settings()?;
    let name = cluster.name();
    let dir = settings.cluster_state_dir(&name);
    info!(cluster = %name, path = %dir.display(), "Persisting kubernetes keys");

    let kubeconfig = cluster
        .kubeconfig()
        .await
        .inspect_err(|e| error!(cluster = %name, error = %e, "Error getting kubeconfig"))?;

    ctx.files
        .write(&dir.join(CLUSTER_CONFIG_FILE), &kubeconfig)
        .await
        .inspect_err(|e| error!(error = %e, "Error writing file"))?;

    let keys = AccessConfig::parse(&kubeconfig)
        .inspect_err(|e| error!(cluster = %name, error = %e, "Error parsing kubeconfig"))?
        .keys;

    for (file, contents) in [
        (KEY_FILE, &keys.key),
        (CERTIFICATE_FILE, &keys.certificate),
        (CA_FILE, &keys.ca),
    ] {
        ctx.files
            .write(&dir.join(file), contents)
            .await
            .inspect_err(|e| error!(error = %e, "Error writing file"))?;
    }

    if let Some(record) = settings.shared_mirror() {
        let store = ctx.shared_credentials.as_deref().ok_or_else(|| {
            Error::config(format!(
                "shared mirror {record} configured without a shared credential store"
            ))
        })?;
        info!(record = %record, "Saving certificates to shared record");
        mirror_keys(store, &settings.monitor_namespace, record, &name, &keys)
            .await
            .inspect_err(|e| error!(record = %record, error = %e, "Error saving certificates"))?;
    }

    info!(cluster = %name, "Writing kubernetes keys succeeded");
    Ok(())
}

/// Upsert a cluster's three PEM entries, retrying the read-modify-write on
/// [`Error::Conflict`]
///
/// Running out of attempts is reported as [`Error::StoreWrite`].
async fn mirror_keys(
    store: &dyn SharedCredentialStore,
    namespace: &str,
    record_name: &str,
    cluster: &str,
    keys: &ClientKeys,
) -> Result<()> {
    for attempt in 1..=SHARED_STORE_CAS_ATTEMPTS {
        let mut record = store.get(namespace, record_name).await?;
        for (file, contents) in [
            (KEY_FILE, &keys.key),
            (CERTIFICATE_FILE, &keys.certificate),
            (CA_FILE, &keys.ca),
        ] {
            record.data.insert(
                shared_key(cluster, file),
                String::from_utf8_lossy(contents).into_owned(),
            );
        }

        match store.update(&record).await {
            Ok(()) => return Ok(()),
            Err(Error::Conflict(_)) => {
                debug!(record = %record_name, attempt, "Shared record changed concurrently, retrying");
            }
            Err(e) => return Err(e),
        }
    }

    warn!(record = %record_name, attempts = SHARED_STORE_CAS_ATTEMPTS, "Gave up updating shared record");
    Err(Error::store_write(
        format!("shared record {namespace}/{record_name}"),
        Error::Conflict(record_name.to_string()),
    ))
}
