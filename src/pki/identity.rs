//! Identity requests derived from a plan.

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use crate::plan::{Plan, PlanHasher};

/// Name of the cluster certificate authority.
pub const AUTHORITY_NAME: &str = "ca";

/// Name of the API server identity.
pub const API_SERVER_NAME: &str = "kube-apiserver";

/// Name of the service-account signing identity.
pub const SERVICE_ACCOUNT_NAME: &str = "service-account";

/// Name of the administrator client identity.
pub const ADMIN_NAME: &str = "admin";

/// In-cluster names of the API service.
const API_SERVICE_NAMES: [&str; 4] = [
    "kubernetes",
    "kubernetes.default",
    "kubernetes.default.svc",
    "kubernetes.default.svc.cluster.local",
];

/// What an identity is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityKind {
    /// The certificate authority itself.
    Authority,
    /// A node's own certificate.
    Node,
    /// The API server serving certificate.
    ApiServer,
    /// Key pair that signs service-account tokens.
    ServiceAccount,
    /// A client certificate.
    Client,
}

/// A request for one piece of identity material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdentityRequest {
    /// File stem of the material in the keys directory.
    pub name: String,
    /// Certificate common name.
    pub common_name: String,
    /// Certificate organization, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
    /// Subject alternative names.
    pub sans: Vec<String>,
    /// Usage of the identity.
    pub kind: IdentityKind,
}

impl IdentityRequest {
    fn new(name: impl Into<String>, common_name: impl Into<String>, kind: IdentityKind) -> Self {
        Self {
            name: name.into(),
            common_name: common_name.into(),
            organization: None,
            sans: Vec::new(),
            kind,
        }
    }

    fn with_sans<I, S>(mut self, sans: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for san in sans {
            let san = san.into();
            if !san.is_empty() && !self.sans.contains(&san) {
                self.sans.push(san);
            }
        }
        self
    }

    /// Returns true if this is the certificate authority.
    #[must_use]
    pub const fn is_authority(&self) -> bool {
        matches!(self.kind, IdentityKind::Authority)
    }

    /// Computes the fingerprint recorded in the identity manifest.
    #[must_use]
    pub fn fingerprint(&self, hasher: &PlanHasher) -> String {
        let subject = format!(
            "{:?}/{}/{}",
            self.kind,
            self.common_name,
            self.organization.as_deref().unwrap_or_default()
        );
        hasher.hash_identity(&subject, &self.sans)
    }

    /// Path of the certificate (or public key) in a keys directory.
    #[must_use]
    pub fn cert_path(&self, keys_dir: &Path) -> PathBuf {
        keys_dir.join(format!("{}.pem", self.name))
    }

    /// Path of the private key in a keys directory.
    #[must_use]
    pub fn key_path(&self, keys_dir: &Path) -> PathBuf {
        keys_dir.join(format!("{}-key.pem", self.name))
    }
}

/// Lists every identity the plan requires, authority first.
#[must_use]
pub fn identity_requests(plan: &Plan) -> Vec<IdentityRequest> {
    let mut requests = vec![IdentityRequest::new(
        AUTHORITY_NAME,
        format!("{}-ca", plan.cluster.name),
        IdentityKind::Authority,
    )];

    for node in plan.all_nodes() {
        requests.push(
            IdentityRequest::new(&node.host, &node.host, IdentityKind::Node).with_sans([
                node.host.as_str(),
                node.ip.as_str(),
                node.internal_address(),
            ]),
        );
    }

    let mut api_server = IdentityRequest::new(API_SERVER_NAME, API_SERVER_NAME, IdentityKind::ApiServer);
    for node in &plan.master.nodes {
        api_server = api_server.with_sans([
            node.host.as_str(),
            node.ip.as_str(),
            node.internal_address(),
        ]);
    }
    api_server = api_server
        .with_sans(plan.master.load_balanced_fqdn.iter().cloned())
        .with_sans(plan.master.load_balanced_short_name.iter().cloned())
        .with_sans(API_SERVICE_NAMES)
        .with_sans(first_service_ip(&plan.cluster.networking.service_cidr_block))
        .with_sans(["127.0.0.1"]);
    requests.push(api_server);

    requests.push(IdentityRequest::new(
        SERVICE_ACCOUNT_NAME,
        "kube-service-account",
        IdentityKind::ServiceAccount,
    ));

    let mut admin = IdentityRequest::new(ADMIN_NAME, ADMIN_NAME, IdentityKind::Client);
    admin.organization = Some(String::from("system:masters"));
    requests.push(admin);

    requests
}

/// Returns the first usable address of an IPv4 service CIDR.
///
/// The API service is always allocated this address.
#[must_use]
pub fn first_service_ip(cidr: &str) -> Option<String> {
    let (address, prefix) = cidr.split_once('/')?;
    let address: Ipv4Addr = address.parse().ok()?;
    let prefix: u32 = prefix.parse().ok()?;
    if prefix >= 31 {
        return None;
    }

    let mask = u32::MAX.checked_shl(32 - prefix).unwrap_or(0);
    let network = u32::from(address) & mask;
    Some(Ipv4Addr::from(network + 1).to_string())
}
