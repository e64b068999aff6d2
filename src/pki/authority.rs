//! Certificate authority bookkeeping.
//!
//! Key material is produced by the automation backend. This module decides
//! what must be produced: it keeps a manifest of every issued identity with
//! the fingerprint of its request, so a re-run with an unchanged plan issues
//! nothing and a changed request is re-issued explicitly with a new
//! generation number.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::backend::{IssuanceBatch, PlayRunner};
use crate::error::{CertificateError, Result};
use crate::plan::{Plan, PlanHasher, parse_expiry_hours};

use super::identity::{IdentityRequest, identity_requests};

/// Manifest file name inside the keys directory.
pub const MANIFEST_FILE: &str = "manifest.json";

/// Record of issued identities.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityManifest {
    /// Entries keyed by identity name.
    #[serde(default)]
    pub entries: BTreeMap<String, ManifestEntry>,
}

/// One issued identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Fingerprint of the request the material was issued for.
    pub fingerprint: String,
    /// Issue count, starting at 1.
    pub generation: u32,
    /// When the material was issued.
    pub issued_at: DateTime<Utc>,
}

/// What to do with one identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssuanceDecision {
    /// Issue material for the first time.
    Issue,
    /// Replace existing material.
    Reissue {
        /// Generation the new material gets.
        generation: u32,
    },
    /// Existing material matches the request.
    Unchanged,
}

/// Decisions for every identity of a plan, in request order.
#[derive(Debug, Clone, Default)]
pub struct IssuancePlan {
    /// Request and decision pairs.
    pub decisions: Vec<(IdentityRequest, IssuanceDecision)>,
}

/// Outcome of [`CertificateAuthority::ensure_identities`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IssuanceSummary {
    /// Identities issued for the first time.
    pub issued: Vec<String>,
    /// Identities re-issued, with their new generation.
    pub reissued: Vec<(String, u32)>,
    /// Identities left untouched.
    pub unchanged: usize,
}

/// Decides and records identity issuance for a keys directory.
#[derive(Debug, Clone)]
pub struct CertificateAuthority {
    /// Directory holding the material and the manifest.
    keys_dir: PathBuf,
    /// Fingerprint hasher.
    hasher: PlanHasher,
}

impl IdentityManifest {
    /// Loads a manifest. A missing file yields an empty manifest.
    ///
    /// # Errors
    ///
    /// Returns [`CertificateError::ManifestCorrupted`] if the file exists but
    /// cannot be parsed.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No identity manifest at {}", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| {
            CertificateError::ManifestCorrupted {
                message: format!("{}: {e}", path.display()),
            }
            .into()
        })
    }

    /// Saves the manifest atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self).map_err(|e| {
            CertificateError::ManifestCorrupted {
                message: e.to_string(),
            }
        })?;

        let temp_path = path.with_extension("json.tmp");
        std::fs::write(&temp_path, content)?;
        std::fs::rename(&temp_path, path)?;
        Ok(())
    }

    /// Records that an identity was issued.
    pub fn record(&mut self, name: &str, fingerprint: String, generation: u32, at: DateTime<Utc>) {
        self.entries.insert(
            name.to_string(),
            ManifestEntry {
                fingerprint,
                generation,
                issued_at: at,
            },
        );
    }
}

impl IssuancePlan {
    /// Returns the requests that need material from the backend.
    #[must_use]
    pub fn pending(&self) -> Vec<IdentityRequest> {
        self.decisions
            .iter()
            .filter(|(_, d)| *d != IssuanceDecision::Unchanged)
            .map(|(r, _)| r.clone())
            .collect()
    }

    /// Returns true if nothing needs to be issued.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.decisions
            .iter()
            .all(|(_, d)| *d == IssuanceDecision::Unchanged)
    }

    /// Returns the decision for an identity.
    #[must_use]
    pub fn decision(&self, name: &str) -> Option<IssuanceDecision> {
        self.decisions
            .iter()
            .find(|(r, _)| r.name == name)
            .map(|(_, d)| *d)
    }
}

/// Decides what to issue.
///
/// The authority is only ever issued when its material is missing, and a
/// new authority forces every other identity to be issued again. Any other
/// identity is re-issued when its material is missing or its request no
/// longer matches the manifest.
#[must_use]
pub fn plan_issuance<F>(
    requests: &[IdentityRequest],
    manifest: &IdentityManifest,
    hasher: &PlanHasher,
    has_material: F,
) -> IssuancePlan
where
    F: Fn(&IdentityRequest) -> bool,
{
    let next_generation =
        |name: &str| manifest.entries.get(name).map_or(1, |e| e.generation + 1);
    let fresh = |name: &str| {
        if manifest.entries.contains_key(name) {
            IssuanceDecision::Reissue {
                generation: next_generation(name),
            }
        } else {
            IssuanceDecision::Issue
        }
    };

    let new_authority = requests
        .iter()
        .any(|r| r.is_authority() && !has_material(r));

    let decisions = requests
        .iter()
        .map(|request| {
            let decision = if request.is_authority() {
                if new_authority {
                    fresh(&request.name)
                } else {
                    IssuanceDecision::Unchanged
                }
            } else if new_authority || !has_material(request) {
                fresh(&request.name)
            } else {
                match manifest.entries.get(&request.name) {
                    Some(entry) if entry.fingerprint == request.fingerprint(hasher) => {
                        IssuanceDecision::Unchanged
                    }
                    _ => IssuanceDecision::Reissue {
                        generation: next_generation(&request.name),
                    },
                }
            };
            (request.clone(), decision)
        })
        .collect();

    IssuancePlan { decisions }
}

impl CertificateAuthority {
    /// Creates an authority for a keys directory.
    #[must_use]
    pub fn new(keys_dir: impl Into<PathBuf>) -> Self {
        Self {
            keys_dir: keys_dir.into(),
            hasher: PlanHasher::new(),
        }
    }

    /// Returns the keys directory.
    #[must_use]
    pub fn keys_dir(&self) -> &Path {
        &self.keys_dir
    }

    /// Returns the manifest path.
    #[must_use]
    pub fn manifest_path(&self) -> PathBuf {
        self.keys_dir.join(MANIFEST_FILE)
    }

    /// Returns true if both halves of an identity exist on disk.
    #[must_use]
    pub fn has_material(&self, request: &IdentityRequest) -> bool {
        request.cert_path(&self.keys_dir).is_file() && request.key_path(&self.keys_dir).is_file()
    }

    /// Computes the issuance plan for a cluster plan against a manifest.
    #[must_use]
    pub fn plan(&self, plan: &Plan, manifest: &IdentityManifest) -> IssuancePlan {
        let requests = identity_requests(plan);
        plan_issuance(&requests, manifest, &self.hasher, |r| self.has_material(r))
    }

    /// Makes sure every identity the plan needs exists and matches it.
    ///
    /// # Errors
    ///
    /// Returns an error if the manifest is unreadable, the backend fails to
    /// issue material, or the manifest cannot be saved.
    pub async fn ensure_identities<R>(&self, plan: &Plan, runner: &R) -> Result<IssuanceSummary>
    where
        R: PlayRunner + ?Sized,
    {
        let manifest_path = self.manifest_path();
        let mut manifest = IdentityManifest::load(&manifest_path)?;
        let issuance = self.plan(plan, &manifest);

        let mut summary = IssuanceSummary::default();
        for (request, decision) in &issuance.decisions {
            match decision {
                IssuanceDecision::Issue => summary.issued.push(request.name.clone()),
                IssuanceDecision::Reissue { generation } => {
                    warn!(
                        "Re-issuing {} (generation {})",
                        request.name, generation
                    );
                    summary.reissued.push((request.name.clone(), *generation));
                }
                IssuanceDecision::Unchanged => summary.unchanged += 1,
            }
        }

        if issuance.is_noop() {
            info!("All {} identities are up to date", summary.unchanged);
            return Ok(summary);
        }

        let validity_hours = parse_expiry_hours(&plan.cluster.certificates.expiry).ok_or_else(
            || {
                CertificateError::generation(format!(
                    "invalid certificate expiry: {}",
                    plan.cluster.certificates.expiry
                ))
            },
        )?;

        std::fs::create_dir_all(&self.keys_dir)?;
        runner
            .issue_identities(&IssuanceBatch {
                identities: issuance.pending(),
                keys_dir: self.keys_dir.clone(),
                validity_hours,
            })
            .await?;

        let now = Utc::now();
        for (request, decision) in &issuance.decisions {
            let generation = match decision {
                IssuanceDecision::Issue => 1,
                IssuanceDecision::Reissue { generation } => *generation,
                IssuanceDecision::Unchanged => continue,
            };
            manifest.record(
                &request.name,
                request.fingerprint(&self.hasher),
                generation,
                now,
            );
        }
        manifest.save(&manifest_path)?;

        info!(
            "Issued {} and re-issued {} identities",
            summary.issued.len(),
            summary.reissued.len()
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockPlayRunner;
    use crate::plan::fixtures::plan_with_workers;
    use tempfile::TempDir;

    /// Writes material for every pending identity, like the real backend.
    fn issue_into_dir(batch: &IssuanceBatch) {
        for identity in &batch.identities {
            std::fs::write(identity.cert_path(&batch.keys_dir), "cert").unwrap();
            std::fs::write(identity.key_path(&batch.keys_dir), "key").unwrap();
        }
    }

    fn manifest_for(requests: &[IdentityRequest], hasher: &PlanHasher) -> IdentityManifest {
        let mut manifest = IdentityManifest::default();
        for request in requests {
            manifest.record(&request.name, request.fingerprint(hasher), 1, Utc::now());
        }
        manifest
    }

    #[test]
    fn test_first_run_issues_everything() {
        let requests = identity_requests(&plan_with_workers(2));
        let plan = plan_issuance(
            &requests,
            &IdentityManifest::default(),
            &PlanHasher::new(),
            |_| false,
        );

        assert_eq!(plan.pending().len(), requests.len());
        assert_eq!(plan.decision("ca"), Some(IssuanceDecision::Issue));
    }

    #[test]
    fn test_unchanged_requests_are_noop() {
        let hasher = PlanHasher::new();
        let requests = identity_requests(&plan_with_workers(2));
        let manifest = manifest_for(&requests, &hasher);

        let plan = plan_issuance(&requests, &manifest, &hasher, |_| true);
        assert!(plan.is_noop());
    }

    #[test]
    fn test_changed_sans_reissue_with_next_generation() {
        let hasher = PlanHasher::new();
        let cluster = plan_with_workers(2);
        let manifest = manifest_for(&identity_requests(&cluster), &hasher);

        let mut moved = cluster.clone();
        moved.worker.nodes[1].ip = String::from("10.0.0.250");
        let plan = plan_issuance(&identity_requests(&moved), &manifest, &hasher, |_| true);

        assert_eq!(
            plan.decision("worker-2"),
            Some(IssuanceDecision::Reissue { generation: 2 })
        );
        assert_eq!(plan.decision("worker-1"), Some(IssuanceDecision::Unchanged));
        assert_eq!(plan.decision("ca"), Some(IssuanceDecision::Unchanged));
    }

    #[test]
    fn test_missing_authority_reissues_all_leaves() {
        let hasher = PlanHasher::new();
        let requests = identity_requests(&plan_with_workers(1));
        let manifest = manifest_for(&requests, &hasher);

        let plan = plan_issuance(&requests, &manifest, &hasher, |r| !r.is_authority());

        assert!(
            plan.decisions
                .iter()
                .all(|(_, d)| *d == IssuanceDecision::Reissue { generation: 2 })
        );
    }

    #[tokio::test]
    async fn test_second_run_does_not_call_backend() {
        let temp = TempDir::new().unwrap();
        let ca = CertificateAuthority::new(temp.path().join("keys"));
        let plan = plan_with_workers(2);

        let mut runner = MockPlayRunner::new();
        runner.expect_issue_identities().times(1).returning(|batch| {
            issue_into_dir(batch);
            Ok(())
        });

        let first = ca.ensure_identities(&plan, &runner).await.unwrap();
        assert_eq!(first.issued.len(), 8);

        let second = ca.ensure_identities(&plan, &runner).await.unwrap();
        assert!(second.issued.is_empty());
        assert!(second.reissued.is_empty());
        assert_eq!(second.unchanged, 8);

        let manifest = IdentityManifest::load(&ca.manifest_path()).unwrap();
        assert_eq!(manifest.entries["worker-1"].generation, 1);
    }

    #[tokio::test]
    async fn test_reissue_is_recorded() {
        let temp = TempDir::new().unwrap();
        let ca = CertificateAuthority::new(temp.path().join("keys"));
        let plan = plan_with_workers(1);

        let mut runner = MockPlayRunner::new();
        runner.expect_issue_identities().times(2).returning(|batch| {
            issue_into_dir(batch);
            Ok(())
        });

        ca.ensure_identities(&plan, &runner).await.unwrap();

        let mut moved = plan.clone();
        moved.worker.nodes[0].internal_ip = Some(String::from("192.168.1.5"));
        let summary = ca.ensure_identities(&moved, &runner).await.unwrap();

        assert_eq!(summary.reissued, vec![(String::from("worker-1"), 2)]);
        let manifest = IdentityManifest::load(&ca.manifest_path()).unwrap();
        assert_eq!(manifest.entries["worker-1"].generation, 2);
    }

    #[test]
    fn test_corrupted_manifest() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(MANIFEST_FILE);
        std::fs::write(&path, "{not json").unwrap();

        let err = IdentityManifest::load(&path).unwrap_err();
        assert!(err.to_string().contains("corrupted"));
    }
}
