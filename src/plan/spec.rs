//! Plan schema types.
//!
//! This module defines all the structs that map to the plan file
//! (`cairn-cluster.yaml`). A plan fully describes the desired cluster:
//! topology, node roles, feature toggles, and whether the run is a fresh
//! install or an upgrade.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

/// The root plan structure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Plan {
    /// Cluster-wide settings.
    pub cluster: ClusterConfig,
    /// Whether this run installs a new cluster or upgrades an existing one.
    #[serde(default)]
    pub mode: InstallMode,
    /// Optional subsystems.
    #[serde(default)]
    pub features: Features,
    /// Rolling rollout settings.
    #[serde(default)]
    pub rollout: RolloutConfig,
    /// Etcd nodes.
    pub etcd: NodeGroup,
    /// Master nodes.
    pub master: MasterNodeGroup,
    /// Worker nodes.
    pub worker: NodeGroup,
    /// Storage nodes (optional role).
    #[serde(default)]
    pub storage: NodeGroup,
}

/// Cluster-wide settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClusterConfig {
    /// Cluster name, used for the kubeconfig context.
    pub name: String,
    /// Kubernetes version the plays install.
    #[serde(default = "default_cluster_version")]
    pub version: String,
    /// Networking settings.
    #[serde(default)]
    pub networking: NetworkConfig,
    /// Certificate settings.
    #[serde(default)]
    pub certificates: CertificatesConfig,
    /// SSH access to the nodes.
    pub ssh: SshConfig,
}

/// Cluster networking.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NetworkConfig {
    /// CIDR block for pod addresses.
    #[serde(default = "default_pod_cidr")]
    pub pod_cidr_block: String,
    /// CIDR block for service addresses.
    #[serde(default = "default_service_cidr")]
    pub service_cidr_block: String,
}

/// Certificate settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CertificatesConfig {
    /// Validity of issued certificates, e.g. `17520h`.
    #[serde(default = "default_expiry")]
    pub expiry: String,
}

/// SSH access settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SshConfig {
    /// Remote user.
    pub user: String,
    /// Private key used to authenticate.
    pub ssh_key: PathBuf,
    /// SSH port on every node.
    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,
}

/// Install mode.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum InstallMode {
    /// Fresh installation.
    #[default]
    Install,
    /// Upgrade of an existing cluster.
    Upgrade,
}

/// Optional subsystems.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Features {
    /// Cluster package manager (Helm).
    #[serde(default)]
    pub package_manager: FeatureToggle,
    /// Heapster monitoring.
    #[serde(default)]
    pub heapster_monitoring: FeatureToggle,
    /// In-cluster image registry.
    #[serde(default)]
    pub internal_registry: FeatureToggle,
}

/// A boolean feature switch.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct FeatureToggle {
    /// Whether the feature is enabled.
    #[serde(default)]
    pub enabled: bool,
}

/// Rolling rollout settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct RolloutConfig {
    /// Percentage of a role group provisioned per batch. Missing roles use 100.
    #[serde(default)]
    pub serial_percentage: BTreeMap<Role, u8>,
}

/// Node roles.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Etcd member.
    Etcd,
    /// Control-plane node.
    Master,
    /// Workload node.
    Worker,
    /// Storage node.
    Storage,
}

/// An ordered group of nodes sharing a role.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct NodeGroup {
    /// Number of nodes the operator expects in this group.
    #[serde(default)]
    pub expected_count: Option<usize>,
    /// Nodes in provisioning order.
    #[serde(default)]
    pub nodes: Vec<Node>,
}

/// The master group, which also carries the API endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct MasterNodeGroup {
    /// Number of nodes the operator expects in this group.
    #[serde(default)]
    pub expected_count: Option<usize>,
    /// Nodes in provisioning order.
    #[serde(default)]
    pub nodes: Vec<Node>,
    /// Load-balanced FQDN in front of the API servers.
    #[serde(default)]
    pub load_balanced_fqdn: Option<String>,
    /// Load-balanced short name in front of the API servers.
    #[serde(default)]
    pub load_balanced_short_name: Option<String>,
}

/// A single host descriptor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Node {
    /// Host identifier (hostname).
    pub host: String,
    /// Address used to reach the node.
    pub ip: String,
    /// Address used for cluster-internal traffic.
    #[serde(default)]
    pub internal_ip: Option<String>,
}

// Default value functions

fn default_cluster_version() -> String {
    String::from(DEFAULT_CLUSTER_VERSION)
}

fn default_pod_cidr() -> String {
    String::from("172.16.0.0/16")
}

fn default_service_cidr() -> String {
    String::from("172.20.0.0/16")
}

fn default_expiry() -> String {
    String::from("17520h")
}

const fn default_ssh_port() -> u16 {
    22
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            pod_cidr_block: default_pod_cidr(),
            service_cidr_block: default_service_cidr(),
        }
    }
}

impl Default for CertificatesConfig {
    fn default() -> Self {
        Self {
            expiry: default_expiry(),
        }
    }
}

/// Default serial percentage: the whole group in one batch.
pub const DEFAULT_SERIAL_PERCENTAGE: u8 = 100;

/// Kubernetes version installed when the plan does not pin one.
pub const DEFAULT_CLUSTER_VERSION: &str = "v1.10.5";

impl Role {
    /// All roles in provisioning order.
    pub const ALL: [Self; 4] = [Self::Etcd, Self::Master, Self::Worker, Self::Storage];

    /// Returns true if a valid plan may leave this role empty.
    #[must_use]
    pub const fn is_optional(self) -> bool {
        matches!(self, Self::Storage)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Etcd => "etcd",
            Self::Master => "master",
            Self::Worker => "worker",
            Self::Storage => "storage",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for InstallMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Install => write!(f, "install"),
            Self::Upgrade => write!(f, "upgrade"),
        }
    }
}

impl Node {
    /// Returns the address used for cluster-internal traffic.
    #[must_use]
    pub fn internal_address(&self) -> &str {
        self.internal_ip.as_deref().unwrap_or(&self.ip)
    }
}

impl Plan {
    /// Returns the plan `cairn init` writes: one node per required role
    /// on placeholder addresses, to be edited before the first run.
    #[must_use]
    pub fn starter() -> Self {
        let node = |host: &str, ip: &str| Node {
            host: host.to_string(),
            ip: ip.to_string(),
            internal_ip: None,
        };
        Self {
            cluster: ClusterConfig {
                name: String::from("cairn-cluster"),
                version: default_cluster_version(),
                networking: NetworkConfig::default(),
                certificates: CertificatesConfig::default(),
                ssh: SshConfig {
                    user: String::from("root"),
                    ssh_key: PathBuf::from("cairn.pem"),
                    ssh_port: default_ssh_port(),
                },
            },
            mode: InstallMode::Install,
            features: Features::default(),
            rollout: RolloutConfig::default(),
            etcd: NodeGroup {
                expected_count: Some(1),
                nodes: vec![node("etcd01", "10.0.1.10")],
            },
            master: MasterNodeGroup {
                expected_count: Some(1),
                nodes: vec![node("master01", "10.0.1.20")],
                load_balanced_fqdn: None,
                load_balanced_short_name: None,
            },
            worker: NodeGroup {
                expected_count: Some(1),
                nodes: vec![node("worker01", "10.0.1.30")],
            },
            storage: NodeGroup::default(),
        }
    }

    /// Returns the nodes of a role group in plan order.
    #[must_use]
    pub fn group(&self, role: Role) -> &[Node] {
        match role {
            Role::Etcd => &self.etcd.nodes,
            Role::Master => &self.master.nodes,
            Role::Worker => &self.worker.nodes,
            Role::Storage => &self.storage.nodes,
        }
    }

    /// Returns the expected node count of a role group, if declared.
    #[must_use]
    pub const fn expected_count(&self, role: Role) -> Option<usize> {
        match role {
            Role::Etcd => self.etcd.expected_count,
            Role::Master => self.master.expected_count,
            Role::Worker => self.worker.expected_count,
            Role::Storage => self.storage.expected_count,
        }
    }

    /// Returns every distinct node, first occurrence wins, in role order.
    #[must_use]
    pub fn all_nodes(&self) -> Vec<&Node> {
        let mut seen = HashSet::new();
        Role::ALL
            .iter()
            .flat_map(|role| self.group(*role))
            .filter(|node| seen.insert(node.host.as_str()))
            .collect()
    }

    /// Returns the roles a host belongs to.
    #[must_use]
    pub fn roles_of(&self, host: &str) -> Vec<Role> {
        Role::ALL
            .iter()
            .copied()
            .filter(|role| self.group(*role).iter().any(|n| n.host == host))
            .collect()
    }

    /// Returns the serial percentage configured for a role group.
    #[must_use]
    pub fn serial_percentage(&self, role: Role) -> u8 {
        self.rollout
            .serial_percentage
            .get(&role)
            .copied()
            .unwrap_or(DEFAULT_SERIAL_PERCENTAGE)
    }

    /// Returns true if this run upgrades an existing cluster.
    #[must_use]
    pub const fn is_upgrade(&self) -> bool {
        matches!(self.mode, InstallMode::Upgrade)
    }

    /// Returns the address clients use to reach the API servers.
    #[must_use]
    pub fn api_endpoint(&self) -> Option<&str> {
        self.master
            .load_balanced_fqdn
            .as_deref()
            .filter(|fqdn| !fqdn.is_empty())
            .or_else(|| self.master.nodes.first().map(|n| n.ip.as_str()))
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::{node, plan_with_workers};
    use super::*;

    #[test]
    fn test_serial_percentage_defaults_to_whole_group() {
        let mut plan = plan_with_workers(4);
        assert_eq!(plan.serial_percentage(Role::Worker), 100);

        plan.rollout.serial_percentage.insert(Role::Worker, 25);
        assert_eq!(plan.serial_percentage(Role::Worker), 25);
        assert_eq!(plan.serial_percentage(Role::Etcd), 100);
    }

    #[test]
    fn test_all_nodes_collapses_colocated_roles() {
        let mut plan = plan_with_workers(1);
        plan.master.nodes.push(node("etcd-1", 10));

        let hosts: Vec<&str> = plan.all_nodes().iter().map(|n| n.host.as_str()).collect();
        assert_eq!(hosts, vec!["etcd-1", "master-1", "worker-1"]);
        assert_eq!(plan.roles_of("etcd-1"), vec![Role::Etcd, Role::Master]);
    }

    #[test]
    fn test_api_endpoint_prefers_load_balancer() {
        let mut plan = plan_with_workers(1);
        assert_eq!(plan.api_endpoint(), Some("10.0.0.20"));

        plan.master.load_balanced_fqdn = Some(String::from("api.example.com"));
        assert_eq!(plan.api_endpoint(), Some("api.example.com"));
    }

    #[test]
    fn test_starter_plan_covers_required_roles() {
        let plan = Plan::starter();
        assert_eq!(plan.all_nodes().len(), 3);
        assert_eq!(plan.roles_of("master01"), vec![Role::Master]);
        assert_eq!(plan.cluster.version, DEFAULT_CLUSTER_VERSION);
    }

    #[test]
    fn test_role_display() {
        assert_eq!(Role::Etcd.to_string(), "etcd");
        assert_eq!(Role::Storage.to_string(), "storage");
        assert!(Role::Storage.is_optional());
        assert!(!Role::Worker.is_optional());
    }
}
