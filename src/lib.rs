//! Posthook - post-provisioning hooks for freshly created Kubernetes clusters
//!
//! After a cluster is provisioned, a caller hands this crate a cluster handle
//! and an ordered list of hook names. Each hook brings the cluster one step
//! closer to operable: store its credentials, persist its client keys,
//! install the package-manager agent, install ingress, autoscaler, monitoring
//! and logging charts, and refresh the monitoring scrape configuration.
//!
//! # Modules
//!
//! - [`hooks`] - Hook registry, runner and the built-in hooks
//! - [`retry`] - Bounded fixed-delay polling
//! - [`credentials`] - Kubeconfig acquisition and key persistence
//! - [`deploy`] - Chart installation on a cluster
//! - [`autoscaler`] - Provider-specific autoscaler values
//! - [`helm`] - Package-manager client
//! - [`store`] - File, access-config and shared credential stores
//! - [`settings`] - Configuration read at every hook invocation
//! - [`descriptor`] - YAML-described clusters for the CLI

#![deny(missing_docs)]

pub mod autoscaler;
pub mod cluster;
pub mod context;
pub mod credentials;
pub mod deploy;
pub mod descriptor;
pub mod error;
pub mod helm;
pub mod hooks;
pub mod kubeconfig;
pub mod metrics;
pub mod organization;
pub mod prometheus;
pub mod retry;
pub mod settings;
pub mod store;
pub mod telemetry;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;
