//! Kubeconfig parsing
//!
//! Extracts the API server endpoint and the PEM material embedded in a
//! kubeconfig's current context. Only the fields the hooks need are modelled.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Deserialize;

use crate::{Error, Result};

/// Kubeconfig structure
#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct Kubeconfig {
    #[serde(default)]
    clusters: Vec<NamedCluster>,
    #[serde(default)]
    users: Vec<NamedUser>,
    #[serde(default)]
    contexts: Vec<NamedContext>,
    #[serde(default)]
    current_context: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NamedCluster {
    name: String,
    cluster: ClusterEntry,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct ClusterEntry {
    #[serde(default)]
    server: Option<String>,
    #[serde(default)]
    certificate_authority_data: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NamedUser {
    name: String,
    #[serde(default)]
    user: UserEntry,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct UserEntry {
    #[serde(default)]
    client_certificate_data: Option<String>,
    #[serde(default)]
    client_key_data: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NamedContext {
    name: String,
    context: ContextEntry,
}

#[derive(Debug, Deserialize)]
struct ContextEntry {
    cluster: String,
    user: String,
}

/// PEM material for client-certificate authentication
///
/// Fields are empty when the kubeconfig does not carry them (token auth,
/// file references).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClientKeys {
    /// Client private key
    pub key: Vec<u8>,
    /// Client certificate
    pub certificate: Vec<u8>,
    /// Cluster CA certificate
    pub ca: Vec<u8>,
}

/// Parsed view of a kubeconfig's active context
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccessConfig {
    /// API server URL, if present
    pub server: Option<String>,
    /// Decoded PEM material
    pub keys: ClientKeys,
}

impl AccessConfig {
    /// Parse raw kubeconfig bytes (YAML or JSON)
    ///
    /// Uses `current-context` when set, otherwise the first context, otherwise
    /// the first cluster and user entries.
    pub fn parse(raw: &[u8]) -> Result<Self> {
        let config: Kubeconfig =
            serde_yaml::from_slice(raw).map_err(|e| Error::kubeconfig(e.to_string()))?;

        let context = match &config.current_context {
            Some(name) if !name.is_empty() => Some(
                config
                    .contexts
                    .iter()
                    .find(|c| &c.name == name)
                    .ok_or_else(|| Error::kubeconfig(format!("context {name} not found")))?,
            ),
            _ => config.contexts.first(),
        };

        let (cluster, user) = match context {
            Some(ctx) => (
                Some(
                    config
                        .clusters
                        .iter()
                        .find(|c| c.name == ctx.context.cluster)
                        .ok_or_else(|| {
                            Error::kubeconfig(format!("cluster {} not found", ctx.context.cluster))
                        })?,
                ),
                config.users.iter().find(|u| u.name == ctx.context.user),
            ),
            None => (config.clusters.first(), config.users.first()),
        };

        let cluster = cluster.ok_or_else(|| Error::kubeconfig("no clusters defined"))?;

        Ok(Self {
            server: cluster.cluster.server.clone(),
            keys: ClientKeys {
                key: decode(user.and_then(|u| u.user.client_key_data.as_deref()), "client-key-data")?,
                certificate: decode(
                    user.and_then(|u| u.user.client_certificate_data.as_deref()),
                    "client-certificate-data",
                )?,
                ca: decode(
                    cluster.cluster.certificate_authority_data.as_deref(),
                    "certificate-authority-data",
                )?,
            },
        })
    }
}

fn decode(data: Option<&str>, field: &str) -> Result<Vec<u8>> {
    match data {
        Some(encoded) => {
            let compact: String = encoded.split_whitespace().collect();
            STANDARD
                .decode(compact)
                .map_err(|e| Error::kubeconfig(format!("{field} is not valid base64: {e}")))
        }
        None => Ok(Vec::new()),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Build a client-certificate kubeconfig for tests
    pub(crate) fn sample_kubeconfig(cluster: &str) -> Vec<u8> {
        format!(
            r#"apiVersion: v1
kind: Config
current-context: {cluster}
clusters:
  - name: {cluster}
    cluster:
      server: https://{cluster}.example.com:6443
      certificate-authority-data: {ca}
users:
  - name: {cluster}-admin
    user:
      client-certificate-data: {cert}
      client-key-data: {key}
contexts:
  - name: {cluster}
    context:
      cluster: {cluster}
      user: {cluster}-admin
"#,
            ca = STANDARD.encode(format!("CA for {cluster}")),
            cert = STANDARD.encode(format!("CERT for {cluster}")),
            key = STANDARD.encode(format!("KEY for {cluster}")),
        )
        .into_bytes()
    }

    #[test]
    fn test_extracts_pem_material_from_current_context() {
        let access = AccessConfig::parse(&sample_kubeconfig("prod")).unwrap();

        assert_eq!(access.server.as_deref(), Some("https://prod.example.com:6443"));
        assert_eq!(access.keys.key, b"KEY for prod");
        assert_eq!(access.keys.certificate, b"CERT for prod");
        assert_eq!(access.keys.ca, b"CA for prod");
    }

    #[test]
    fn test_selects_the_context_named_by_current_context() {
        let raw = format!(
            r#"current-context: second
clusters:
  - name: a
    cluster: {{server: "https://a", certificate-authority-data: {a}}}
  - name: b
    cluster: {{server: "https://b", certificate-authority-data: {b}}}
users:
  - name: u
    user: {{}}
contexts:
  - name: first
    context: {{cluster: a, user: u}}
  - name: second
    context: {{cluster: b, user: u}}
"#,
            a = STANDARD.encode("CA-A"),
            b = STANDARD.encode("CA-B"),
        );

        let access = AccessConfig::parse(raw.as_bytes()).unwrap();
        assert_eq!(access.server.as_deref(), Some("https://b"));
        assert_eq!(access.keys.ca, b"CA-B");
        assert!(access.keys.key.is_empty());
    }

    #[test]
    fn test_missing_context_is_an_error() {
        let raw = b"current-context: nope\nclusters: []\ncontexts: []\n";
        let err = AccessConfig::parse(raw).unwrap_err();
        assert!(err.to_string().contains("context nope not found"));
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(matches!(
            AccessConfig::parse(b"\x00\x01 not: [yaml"),
            Err(Error::Kubeconfig(_))
        ));
    }

    #[test]
    fn test_invalid_base64_names_the_field() {
        let raw = b"clusters:\n  - name: c\n    cluster:\n      certificate-authority-data: '!!!'\n";
        let err = AccessConfig::parse(raw).unwrap_err();
        assert!(err.to_string().contains("certificate-authority-data"));
    }
}
