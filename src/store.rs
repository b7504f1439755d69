//! Persistence collaborators for cluster credentials
//!
//! Three stores are involved:
//! - [`FileStore`]: per-cluster artifacts on local disk
//! - [`AccessConfigStore`]: durable, tenant-scoped kubeconfig storage
//! - [`SharedCredentialStore`]: one record mirrored into the monitoring stack,
//!   holding certificates for every cluster
//!
//! # Atomicity
//!
//! A shared record is written by many clusters' hooks. Implementations of
//! [`SharedCredentialStore::update`] must be compare-and-swap on
//! [`CredentialRecord::version`] and fail with [`Error::Conflict`] when the
//! record changed since it was read. Callers retry the whole read-modify-write.

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::Client;
#[cfg(test)]
use mockall::automock;
use tracing::debug;

use crate::{Error, Result};

const FIELD_MANAGER: &str = "posthook";

/// Writes whole files, creating parent directories as needed
#[cfg_attr(test, automock)]
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Replace the contents of `path`
    async fn write(&self, path: &Path, contents: &[u8]) -> Result<()>;
}

/// [`FileStore`] backed by the local filesystem
#[derive(Clone, Debug, Default)]
pub struct LocalFileStore;

#[async_trait]
impl FileStore for LocalFileStore {
    async fn write(&self, path: &Path, contents: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::store_write(parent.display().to_string(), e))?;
        }
        tokio::fs::write(path, contents)
            .await
            .map_err(|e| Error::store_write(path.display().to_string(), e))
    }
}

/// Durable storage for a cluster's kubeconfig
#[cfg_attr(test, automock)]
#[async_trait]
pub trait AccessConfigStore: Send + Sync {
    /// Store (or overwrite) the kubeconfig of `cluster` owned by `organization_id`
    async fn store(&self, organization_id: u64, cluster: &str, kubeconfig: &[u8]) -> Result<()>;
}

/// Stores kubeconfigs as Kubernetes Secrets, one namespace per organization
pub struct SecretAccessConfigStore {
    client: Client,
    namespace_prefix: String,
}

impl SecretAccessConfigStore {
    /// Key holding the kubeconfig inside the Secret
    pub const KUBECONFIG_KEY: &'static str = "kubeconfig";

    /// Create a store writing to namespaces named `<prefix><organization id>`
    pub fn new(client: Client, namespace_prefix: impl Into<String>) -> Self {
        Self {
            client,
            namespace_prefix: namespace_prefix.into(),
        }
    }

    /// Namespace holding an organization's secrets
    pub fn namespace_for(&self, organization_id: u64) -> String {
        format!("{}{}", self.namespace_prefix, organization_id)
    }

    /// Secret name for a cluster's kubeconfig
    pub fn secret_name(cluster: &str) -> String {
        format!("{cluster}-kubeconfig")
    }
}

#[async_trait]
impl AccessConfigStore for SecretAccessConfigStore {
    async fn store(&self, organization_id: u64, cluster: &str, kubeconfig: &[u8]) -> Result<()> {
        let namespace = self.namespace_for(organization_id);
        let name = Self::secret_name(cluster);
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), &namespace);

        let secret = Secret {
            metadata: ObjectMeta {
                name: Some(name.clone()),
                namespace: Some(namespace.clone()),
                labels: Some(BTreeMap::from([(
                    "posthook.dev/cluster".to_string(),
                    cluster.to_string(),
                )])),
                ..Default::default()
            },
            data: Some(BTreeMap::from([(
                Self::KUBECONFIG_KEY.to_string(),
                ByteString(kubeconfig.to_vec()),
            )])),
            type_: Some("Opaque".to_string()),
            ..Default::default()
        };

        secrets
            .patch(&name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Apply(&secret))
            .await
            .map_err(|e| Error::store_write(format!("secret {namespace}/{name}"), e))?;

        debug!(secret = %name, namespace = %namespace, "Stored kubeconfig");
        Ok(())
    }
}

/// A versioned key/value record in the shared credential store
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CredentialRecord {
    /// Namespace the record lives in
    pub namespace: String,
    /// Record name
    pub name: String,
    /// Key/value contents
    pub data: BTreeMap<String, String>,
    /// Opaque version observed on read; `None` when the record does not exist yet
    pub version: Option<String>,
}

/// Multi-cluster key/value store with compare-and-swap updates
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SharedCredentialStore: Send + Sync {
    /// Read a record; a missing record is returned empty with `version: None`
    async fn get(&self, namespace: &str, name: &str) -> Result<CredentialRecord>;

    /// Write a record back.
    ///
    /// Must fail with [`Error::Conflict`] if the stored version no longer
    /// matches `record.version` (or, for `None`, if the record now exists).
    async fn update(&self, record: &CredentialRecord) -> Result<()>;
}

/// [`SharedCredentialStore`] backed by ConfigMaps
///
/// Uses resourceVersion for compare-and-swap: a replace carrying a stale
/// resourceVersion fails with 409 Conflict.
pub struct ConfigMapCredentialStore {
    client: Client,
}

impl ConfigMapCredentialStore {
    /// Create a store talking to the cluster behind `client`
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<ConfigMap> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn configmap_target(namespace: &str, name: &str) -> String {
    format!("configmap {namespace}/{name}")
}

#[async_trait]
impl SharedCredentialStore for ConfigMapCredentialStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<CredentialRecord> {
        match self.api(namespace).get(name).await {
            Ok(cm) => Ok(CredentialRecord {
                namespace: namespace.to_string(),
                name: name.to_string(),
                data: cm.data.unwrap_or_default(),
                version: cm.metadata.resource_version,
            }),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(CredentialRecord {
                namespace: namespace.to_string(),
                name: name.to_string(),
                ..Default::default()
            }),
            Err(e) => Err(Error::store_write(configmap_target(namespace, name), e)),
        }
    }

    async fn update(&self, record: &CredentialRecord) -> Result<()> {
        let api = self.api(&record.namespace);
        let cm = ConfigMap {
            metadata: ObjectMeta {
                name: Some(record.name.clone()),
                namespace: Some(record.namespace.clone()),
                resource_version: record.version.clone(),
                ..Default::default()
            },
            data: Some(record.data.clone()),
            ..Default::default()
        };

        let result = match record.version {
            Some(_) => api.replace(&record.name, &PostParams::default(), &cm).await,
            None => api.create(&PostParams::default(), &cm).await,
        };

        match result {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 409 => {
                debug!(record = %record.name, "Shared record changed since read");
                Err(Error::Conflict(record.name.clone()))
            }
            Err(e) => Err(Error::store_write(
                configmap_target(&record.namespace, &record.name),
                e,
            )),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// In-memory [`FileStore`] recording every write
    #[derive(Default)]
    pub(crate) struct MemoryFileStore {
        pub(crate) files: Mutex<BTreeMap<PathBuf, Vec<u8>>>,
        pub(crate) fail_on: Option<PathBuf>,
    }

    impl MemoryFileStore {
        pub(crate) fn snapshot(&self) -> BTreeMap<PathBuf, Vec<u8>> {
            self.files.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl FileStore for MemoryFileStore {
        async fn write(&self, path: &Path, contents: &[u8]) -> Result<()> {
            if self.fail_on.as_deref() == Some(path) {
                return Err(Error::store_write(path.display().to_string(), "disk full"));
            }
            self.files
                .lock()
                .unwrap()
                .insert(path.to_path_buf(), contents.to_vec());
            Ok(())
        }
    }

    /// In-memory CAS store; yields after reads so concurrent writers interleave
    #[derive(Default)]
    pub(crate) struct MemoryCredentialStore {
        records: Mutex<BTreeMap<String, (u64, BTreeMap<String, String>)>>,
        pub(crate) conflicts: AtomicUsize,
    }

    impl MemoryCredentialStore {
        pub(crate) fn data(&self, name: &str) -> BTreeMap<String, String> {
            self.records
                .lock()
                .unwrap()
                .get(name)
                .map(|(_, data)| data.clone())
                .unwrap_or_default()
        }
    }

    #[async_trait]
    impl SharedCredentialStore for MemoryCredentialStore {
        async fn get(&self, namespace: &str, name: &str) -> Result<CredentialRecord> {
            let record = {
                let records = self.records.lock().unwrap();
                match records.get(name) {
                    Some((version, data)) => CredentialRecord {
                        namespace: namespace.to_string(),
                        name: name.to_string(),
                        data: data.clone(),
                        version: Some(version.to_string()),
                    },
                    None => CredentialRecord {
                        namespace: namespace.to_string(),
                        name: name.to_string(),
                        ..Default::default()
                    },
                }
            };
            tokio::task::yield_now().await;
            Ok(record)
        }

        async fn update(&self, record: &CredentialRecord) -> Result<()> {
            let mut records = self.records.lock().unwrap();
            let current = records.get(&record.name).map(|(v, _)| v.to_string());
            if current != record.version {
                self.conflicts.fetch_add(1, Ordering::SeqCst);
                return Err(Error::Conflict(record.name.clone()));
            }
            let next = records.get(&record.name).map(|(v, _)| v + 1).unwrap_or(1);
            records.insert(record.name.clone(), (next, record.data.clone()));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_local_file_store_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prod").join("cluster.cfg");

        LocalFileStore.write(&path, b"apiVersion: v1").await.unwrap();
        LocalFileStore.write(&path, b"apiVersion: v2").await.unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"apiVersion: v2");
    }

    #[tokio::test]
    async fn test_local_file_store_reports_target_on_failure() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"file").unwrap();

        let err = LocalFileStore
            .write(&blocker.join("cluster.cfg"), b"x")
            .await
            .unwrap_err();

        assert!(matches!(err, Error::StoreWrite { .. }));
        assert!(err.to_string().contains("not-a-dir"));
    }

    #[tokio::test]
    async fn test_memory_store_rejects_stale_versions() {
        let store = MemoryCredentialStore::default();

        let fresh = store.get("monitoring", "certs").await.unwrap();
        assert!(fresh.version.is_none());
        assert_eq!(fresh.namespace, "monitoring");
        store.update(&fresh).await.unwrap();

        // Same stale read again: the record now exists
        let err = store.update(&fresh).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));

        let current = store.get("monitoring", "certs").await.unwrap();
        assert_eq!(current.version.as_deref(), Some("1"));
        store.update(&current).await.unwrap();
        assert_eq!(store.conflicts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_secret_naming_is_per_cluster_and_organization() {
        assert_eq!(SecretAccessConfigStore::secret_name("prod"), "prod-kubeconfig");
    }
}
