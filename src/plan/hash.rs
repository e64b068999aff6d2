//! Deterministic fingerprints of plan content.
//!
//! Fingerprints let a re-run tell "nothing changed" apart from "the plan
//! moved underneath an already-issued artifact".

use sha2::{Digest, Sha256};

use super::spec::{Plan, Role};

/// Hasher for computing plan fingerprints.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlanHasher;

impl PlanHasher {
    /// Creates a new plan hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes a fingerprint of the cluster topology.
    ///
    /// Feature toggles and rollout settings are excluded: they change what
    /// runs, not what the cluster is.
    #[must_use]
    pub fn hash_topology(&self, plan: &Plan) -> String {
        let mut hasher = Sha256::new();

        hasher.update(plan.cluster.name.as_bytes());
        hasher.update(plan.cluster.networking.pod_cidr_block.as_bytes());
        hasher.update(plan.cluster.networking.service_cidr_block.as_bytes());

        for role in Role::ALL {
            hasher.update(role.to_string().as_bytes());
            for node in plan.group(role) {
                hasher.update(node.host.as_bytes());
                hasher.update(node.ip.as_bytes());
                hasher.update(node.internal_address().as_bytes());
            }
        }

        if let Some(fqdn) = &plan.master.load_balanced_fqdn {
            hasher.update(fqdn.as_bytes());
        }

        hex::encode(hasher.finalize())
    }

    /// Computes a fingerprint of an identity request.
    ///
    /// Subject alternative names are sorted so declaration order does not matter.
    #[must_use]
    pub fn hash_identity(&self, common_name: &str, sans: &[String]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(common_name.as_bytes());

        let mut sorted: Vec<&String> = sans.iter().collect();
        sorted.sort_unstable();
        sorted.dedup();
        for san in sorted {
            hasher.update([0u8]);
            hasher.update(san.as_bytes());
        }

        hex::encode(hasher.finalize())
    }

    /// Computes a short hash (first 8 characters) for display purposes.
    #[must_use]
    pub fn short_hash(&self, hash: &str) -> String {
        hash.chars().take(8).collect()
    }
}
