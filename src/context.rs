//! Collaborators shared by every hook invocation

use std::sync::Arc;

use crate::helm::PackageManager;
use crate::organization::OrganizationResolver;
use crate::prometheus::PrometheusConfig;
use crate::settings::{HookSettings, SettingsSource};
use crate::store::{AccessConfigStore, FileStore, SharedCredentialStore};
use crate::Result;

/// Everything a hook needs besides the cluster itself
#[derive(Clone)]
pub struct HookContext {
    /// Configuration, read at every invocation
    pub settings: Arc<dyn SettingsSource>,
    /// Local credential artifacts
    pub files: Arc<dyn FileStore>,
    /// Durable kubeconfig storage
    pub access_configs: Arc<dyn AccessConfigStore>,
    /// Shared certificate mirror; `None` disables mirroring
    pub shared_credentials: Option<Arc<dyn SharedCredentialStore>>,
    /// Package-manager client
    pub package_manager: Arc<dyn PackageManager>,
    /// Tenant resolution
    pub organizations: Arc<dyn OrganizationResolver>,
    /// Monitoring scrape configuration
    pub prometheus: Arc<dyn PrometheusConfig>,
}

impl HookContext {
    /// Fresh settings snapshot
    pub fn settings(&self) -> Result<HookSettings> {
        self.settings.settings()
    }
}
