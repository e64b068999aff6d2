//! Administrator kubeconfig generation.
//!
//! The kubeconfig points at the cluster API endpoint and references the
//! `admin` client identity and the cluster authority by absolute path.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{CairnError, Result};
use crate::pki::{ADMIN_NAME, AUTHORITY_NAME};
use crate::plan::Plan;

/// Kubeconfig file name inside the generated assets directory.
pub const KUBECONFIG_FILE: &str = "kubeconfig";

/// Port the API servers listen on.
pub const API_SERVER_PORT: u16 = 6443;

/// A kubeconfig document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Kubeconfig {
    /// Always `v1`.
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    /// Always `Config`.
    pub kind: String,
    /// Known clusters.
    pub clusters: Vec<NamedCluster>,
    /// Known users.
    pub users: Vec<NamedUser>,
    /// Known contexts.
    pub contexts: Vec<NamedContext>,
    /// Context used by default.
    pub current_context: String,
}

/// A named cluster entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedCluster {
    /// Entry name.
    pub name: String,
    /// Cluster details.
    pub cluster: ClusterEntry,
}

/// Cluster connection details.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ClusterEntry {
    /// API server URL.
    pub server: String,
    /// Path to the cluster authority certificate.
    pub certificate_authority: String,
}

/// A named user entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedUser {
    /// Entry name.
    pub name: String,
    /// User credentials.
    pub user: UserEntry,
}

/// Client certificate credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct UserEntry {
    /// Path to the client certificate.
    pub client_certificate: String,
    /// Path to the client key.
    pub client_key: String,
}

/// A named context entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedContext {
    /// Entry name.
    pub name: String,
    /// Context details.
    pub context: ContextEntry,
}

/// Cluster and user pairing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextEntry {
    /// Cluster entry name.
    pub cluster: String,
    /// User entry name.
    pub user: String,
}

impl Kubeconfig {
    /// Builds the administrator kubeconfig for a plan.
    ///
    /// # Errors
    ///
    /// Returns an error if the plan has no API endpoint.
    pub fn for_plan(plan: &Plan, keys_dir: &Path) -> Result<Self> {
        let endpoint = plan
            .api_endpoint()
            .ok_or_else(|| CairnError::internal("plan has no master node or load-balanced FQDN"))?;

        let keys_dir = std::path::absolute(keys_dir)?;
        let path = |name: String| keys_dir.join(name).display().to_string();

        let cluster = plan.cluster.name.clone();
        let user = format!("{cluster}-{ADMIN_NAME}");

        Ok(Self {
            api_version: String::from("v1"),
            kind: String::from("Config"),
            clusters: vec![NamedCluster {
                name: cluster.clone(),
                cluster: ClusterEntry {
                    server: format!("https://{endpoint}:{API_SERVER_PORT}"),
                    certificate_authority: path(format!("{AUTHORITY_NAME}.pem")),
                },
            }],
            users: vec![NamedUser {
                name: user.clone(),
                user: UserEntry {
                    client_certificate: path(format!("{ADMIN_NAME}.pem")),
                    client_key: path(format!("{ADMIN_NAME}-key.pem")),
                },
            }],
            contexts: vec![NamedContext {
                name: cluster.clone(),
                context: ContextEntry {
                    cluster: cluster.clone(),
                    user,
                },
            }],
            current_context: cluster,
        })
    }
}

/// Writes the administrator kubeconfig into the assets directory.
///
/// An existing file with identical content is left untouched.
///
/// # Errors
///
/// Returns an error if the kubeconfig cannot be built or written.
pub fn generate_kubeconfig(plan: &Plan, assets_dir: &Path) -> Result<PathBuf> {
    let config = Kubeconfig::for_plan(plan, &assets_dir.join("keys"))?;
    let content = serde_yaml::to_string(&config)
        .map_err(|e| CairnError::internal(format!("Failed to serialize kubeconfig: {e}")))?;

    std::fs::create_dir_all(assets_dir)?;
    let path = assets_dir.join(KUBECONFIG_FILE);

    if std::fs::read_to_string(&path).is_ok_and(|existing| existing == content) {
        debug!("Kubeconfig at {} is up to date", path.display());
        return Ok(path);
    }

    let temp_path = path.with_extension("tmp");
    std::fs::write(&temp_path, content)?;
    std::fs::rename(&temp_path, &path)?;

    info!("Wrote kubeconfig to: {}", path.display());
    Ok(path)
}
