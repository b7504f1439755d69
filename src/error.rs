//! Error types for post-provisioning hooks

use thiserror::Error;

/// Main error type for hook operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Access configuration could not be retrieved after bounded retries
    #[error("credentials unavailable for {cluster} after {attempts} attempts: {message}")]
    CredentialUnavailable {
        /// Cluster whose kubeconfig was requested
        cluster: String,
        /// Number of attempts made
        attempts: u32,
        /// Last error reported by the cluster
        message: String,
    },

    /// Local or shared persistence failed
    #[error("store write failed for {target}: {message}")]
    StoreWrite {
        /// Path, secret or record that could not be written
        target: String,
        /// Description of what failed
        message: String,
    },

    /// Compare-and-swap update on a shared record lost the race
    #[error("conflicting update on shared record {0}")]
    Conflict(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Package manager rejected or timed out an install
    #[error("install of {chart} failed: {message}")]
    Install {
        /// Chart (or agent image) being installed
        chart: String,
        /// Description of what failed
        message: String,
    },

    /// Package-manager agent is not reachable yet
    #[error("package manager agent unreachable: {0}")]
    AgentUnreachable(String),

    /// Hook name is not registered
    #[error("unknown hook: {0}")]
    UnknownHook(String),

    /// Hook registered twice
    #[error("hook registered twice: {0}")]
    DuplicateHook(String),

    /// Access configuration could not be parsed
    #[error("invalid kubeconfig: {0}")]
    Kubeconfig(String),

    /// Organization lookup failed
    #[error("organization {id} lookup failed: {message}")]
    Organization {
        /// Organization identifier
        id: u64,
        /// Description of what failed
        message: String,
    },

    /// Cloud provider data is missing or invalid
    #[error("provider error [{provider}]: {message}")]
    Provider {
        /// Provider type (aws, azure, ...)
        provider: String,
        /// Description of what failed
        message: String,
    },

    /// Invalid configuration value
    #[error("configuration error: {0}")]
    Config(String),

    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Local I/O error outside of a store write
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a store write error for the given target
    pub fn store_write(target: impl Into<String>, message: impl ToString) -> Self {
        Self::StoreWrite {
            target: target.into(),
            message: message.to_string(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Create an install error for the given chart
    pub fn install(chart: impl Into<String>, message: impl ToString) -> Self {
        Self::Install {
            chart: chart.into(),
            message: message.to_string(),
        }
    }

    /// Create a provider error
    pub fn provider(provider: impl ToString, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.to_string(),
            message: message.into(),
        }
    }

    /// Create a configuration error with the given message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a kubeconfig parsing error with the given message
    pub fn kubeconfig(msg: impl Into<String>) -> Self {
        Self::Kubeconfig(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==========================================================================
    // Story Tests: Error Reporting During Cluster Bootstrap
    // ==========================================================================

    /// Story: a cluster that never hands out credentials reports how hard we tried
    #[test]
    fn story_credential_exhaustion_names_cluster_and_attempts() {
        let err = Error::CredentialUnavailable {
            cluster: "prod-eu".to_string(),
            attempts: 30,
            message: "connection refused".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("prod-eu"));
        assert!(text.contains("30 attempts"));
        assert!(text.contains("connection refused"));
    }

    /// Story: persistence failures name the artifact that could not be written
    #[test]
    fn story_store_failures_identify_target() {
        let err = Error::store_write("/state/prod/client-key-data.pem", "permission denied");
        assert!(err.to_string().contains("client-key-data.pem"));

        match err {
            Error::StoreWrite { target, message } => {
                assert_eq!(target, "/state/prod/client-key-data.pem");
                assert_eq!(message, "permission denied");
            }
            _ => panic!("Expected StoreWrite variant"),
        }
    }

    /// Story: unknown hook names are caller errors, not hook failures
    #[test]
    fn story_unknown_hook_is_its_own_category() {
        let err = Error::UnknownHook("InstallEverything".to_string());
        assert_eq!(err.to_string(), "unknown hook: InstallEverything");
        assert!(!matches!(err, Error::Install { .. }));
    }

    #[test]
    fn test_install_and_provider_errors_carry_context() {
        let err = Error::install("banzaicloud-stable/cluster-autoscaler", "release exists");
        assert!(err.to_string().contains("cluster-autoscaler"));

        let err = Error::provider("azure", "AZURE_TENANT_ID missing from cloud secret");
        assert_eq!(
            err.to_string(),
            "provider error [azure]: AZURE_TENANT_ID missing from cloud secret"
        );
    }
}
