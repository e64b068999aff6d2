//! Plan loading and persistence.
//!
//! A [`Planner`] reads the plan once per run. [`FilePlanner`] is the
//! file-backed implementation used by the CLI.

use crate::error::{CairnError, PlanError, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::spec::Plan;

/// Default plan file name.
pub const DEFAULT_PLAN_FILE: &str = "cairn-cluster.yaml";

/// Source of a [`Plan`].
pub trait Planner {
    /// Reads the plan.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::NotFound`] if the source is missing and
    /// [`PlanError::Malformed`] if it does not match the plan schema.
    fn read(&self) -> Result<Plan>;

    /// Persists the plan.
    ///
    /// # Errors
    ///
    /// Returns an error if the plan cannot be serialized or written.
    fn write(&self, plan: &Plan) -> Result<()>;

    /// Returns true if the plan source exists.
    fn exists(&self) -> bool;
}

/// Planner backed by a YAML file.
#[derive(Debug, Clone)]
pub struct FilePlanner {
    /// Path to the plan file.
    file: PathBuf,
}

impl FilePlanner {
    /// Creates a planner for the given file.
    #[must_use]
    pub fn new(file: impl Into<PathBuf>) -> Self {
        Self { file: file.into() }
    }

    /// Returns the plan file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.file
    }

    /// Parses a plan from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::Malformed`] if the YAML is invalid.
    pub fn parse_yaml(content: &str, source: Option<&Path>) -> Result<Plan> {
        debug!("Parsing plan YAML");

        let plan: Plan = serde_yaml::from_str(content).map_err(|e| {
            CairnError::Plan(PlanError::Malformed {
                message: format!("YAML parse error: {e}"),
                location: source.map(|p| p.display().to_string()),
            })
        })?;

        debug!("Parsed plan for cluster: {}", plan.cluster.name);
        Ok(plan)
    }

    /// Loads the `.env` file next to the plan, if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the `.env` file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self
            .file
            .parent()
            .map_or_else(|| PathBuf::from(".env"), |p| p.join(".env"));

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| {
                CairnError::Plan(PlanError::Malformed {
                    message: format!("Failed to load .env file: {e}"),
                    location: Some(env_path.display().to_string()),
                })
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }
}

impl Default for FilePlanner {
    fn default() -> Self {
        Self::new(DEFAULT_PLAN_FILE)
    }
}

impl Planner for FilePlanner {
    fn read(&self) -> Result<Plan> {
        info!("Reading plan from: {}", self.file.display());

        if !self.file.exists() {
            return Err(CairnError::Plan(PlanError::NotFound {
                path: self.file.clone(),
            }));
        }

        let content = std::fs::read_to_string(&self.file).map_err(|e| {
            CairnError::Plan(PlanError::Malformed {
                message: format!("Failed to read file: {e}"),
                location: Some(self.file.display().to_string()),
            })
        })?;

        Self::parse_yaml(&content, Some(&self.file))
    }

    fn write(&self, plan: &Plan) -> Result<()> {
        let content = serde_yaml::to_string(plan)
            .map_err(|e| CairnError::internal(format!("Failed to serialize plan: {e}")))?;

        if let Some(parent) = self.file.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let temp_path = self.file.with_extension("yaml.tmp");
        std::fs::write(&temp_path, content)?;
        std::fs::rename(&temp_path, &self.file)?;

        info!("Wrote plan to: {}", self.file.display());
        Ok(())
    }

    fn exists(&self) -> bool {
        self.file.exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::spec::fixtures::plan_with_workers;
    use crate::plan::spec::{InstallMode, Role};
    use tempfile::TempDir;

    const MINIMAL_PLAN: &str = r"
cluster:
  name: lab
  ssh:
    user: ops
    ssh_key: /home/ops/.ssh/id_rsa
etcd:
  nodes:
    - host: etcd-1
      ip: 10.0.0.10
master:
  nodes:
    - host: master-1
      ip: 10.0.0.20
worker:
  nodes:
    - host: worker-1
      ip: 10.0.0.30
";

    #[test]
    fn test_parse_minimal_plan() {
        let plan = FilePlanner::parse_yaml(MINIMAL_PLAN, None).unwrap();

        assert_eq!(plan.cluster.name, "lab");
        assert_eq!(plan.cluster.ssh.ssh_port, 22);
        assert_eq!(plan.cluster.version, crate::plan::DEFAULT_CLUSTER_VERSION);
        assert_eq!(plan.mode, InstallMode::Install);
        assert!(!plan.features.package_manager.enabled);
        assert!(plan.storage.nodes.is_empty());
        assert_eq!(plan.serial_percentage(Role::Worker), 100);
    }

    #[test]
    fn test_parse_full_plan() {
        let yaml = r"
cluster:
  name: prod
  networking:
    pod_cidr_block: 10.244.0.0/16
    service_cidr_block: 10.96.0.0/12
  ssh:
    user: ops
    ssh_key: /home/ops/.ssh/id_rsa
    ssh_port: 2222
mode: upgrade
features:
  package_manager:
    enabled: true
  heapster_monitoring:
    enabled: true
rollout:
  serial_percentage:
    worker: 25
etcd:
  expected_count: 1
  nodes:
    - host: etcd-1
      ip: 10.0.0.10
master:
  load_balanced_fqdn: api.prod.example.com
  nodes:
    - host: master-1
      ip: 10.0.0.20
      internal_ip: 192.168.0.20
worker:
  nodes:
    - host: worker-1
      ip: 10.0.0.30
storage:
  nodes:
    - host: storage-1
      ip: 10.0.0.40
";
        let plan = FilePlanner::parse_yaml(yaml, None).unwrap();

        assert!(plan.is_upgrade());
        assert!(plan.features.package_manager.enabled);
        assert!(plan.features.heapster_monitoring.enabled);
        assert!(!plan.features.internal_registry.enabled);
        assert_eq!(plan.serial_percentage(Role::Worker), 25);
        assert_eq!(plan.cluster.ssh.ssh_port, 2222);
        assert_eq!(plan.master.nodes[0].internal_address(), "192.168.0.20");
        assert_eq!(plan.api_endpoint(), Some("api.prod.example.com"));
        assert_eq!(plan.storage.nodes.len(), 1);
    }

    #[test]
    fn test_read_missing_plan() {
        let temp = TempDir::new().unwrap();
        let planner = FilePlanner::new(temp.path().join("missing.yaml"));

        let err = planner.read().unwrap_err();
        assert!(matches!(err, CairnError::Plan(PlanError::NotFound { .. })));
        assert!(!planner.exists());
    }

    #[test]
    fn test_read_malformed_plan() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("plan.yaml");
        std::fs::write(&path, "cluster: [not, a, map]\n").unwrap();

        let err = FilePlanner::new(&path).read().unwrap_err();
        assert!(matches!(err, CairnError::Plan(PlanError::Malformed { .. })));
    }

    #[test]
    fn test_write_then_read() {
        let temp = TempDir::new().unwrap();
        let planner = FilePlanner::new(temp.path().join("nested").join("plan.yaml"));
        let plan = plan_with_workers(2);

        planner.write(&plan).unwrap();
        assert!(planner.exists());
        assert_eq!(planner.read().unwrap(), plan);
    }

    #[test]
    fn test_write_replaces_existing_plan_atomically() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("plan.yaml");
        std::fs::write(&path, "old content").unwrap();
        let planner = FilePlanner::new(&path);

        planner.write(&plan_with_workers(1)).unwrap();

        let entries: Vec<String> = std::fs::read_dir(temp.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(entries, vec!["plan.yaml"]);
        assert_eq!(planner.read().unwrap(), plan_with_workers(1));
    }
}
