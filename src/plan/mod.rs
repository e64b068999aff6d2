//! Plan module.
//!
//! This module handles everything about the declarative cluster plan:
//! - The plan schema (`cairn-cluster.yaml`)
//! - Loading and persisting plans
//! - Schema-level validation
//! - Fingerprints for change detection

mod spec;
mod planner;
mod schema;
mod hash;

#[cfg(test)]
pub(crate) use spec::fixtures;

pub use spec::{
    CertificatesConfig, ClusterConfig, DEFAULT_CLUSTER_VERSION, DEFAULT_SERIAL_PERCENTAGE,
    FeatureToggle, Features, InstallMode, MasterNodeGroup, NetworkConfig, Node, NodeGroup, Plan,
    Role, RolloutConfig, SshConfig,
};
pub use planner::{DEFAULT_PLAN_FILE, FilePlanner, Planner};
pub use schema::{PlanValidator, ValidationError, ValidationResult, parse_expiry_hours};
pub use hash::PlanHasher;
