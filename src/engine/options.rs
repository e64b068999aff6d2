//! Run options and the per-run mode snapshot.

use clap::ValueEnum;
use std::path::{Path, PathBuf};

use crate::plan::Plan;

/// Default directory for generated assets.
pub const DEFAULT_ASSETS_DIR: &str = "generated";

/// Default directory holding the play files.
pub const DEFAULT_PLAYBOOK_DIR: &str = "ansible";

/// Operator-facing output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Concise progress with status markers.
    #[default]
    Simple,
    /// Plain lines plus the backend's own output.
    Raw,
}

/// Options shared by every stage of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorOptions {
    /// Where generated assets (keys, inventory, kubeconfig) are written.
    pub generated_assets_dir: PathBuf,
    /// Directory holding the play files.
    pub playbook_dir: PathBuf,
    /// Restart services even when they are already running.
    pub restart_services: bool,
    /// Verbose backend output.
    pub verbose: bool,
    /// Output format.
    pub output_format: OutputFormat,
    /// Skip preflight checks.
    pub skip_preflight: bool,
}

/// Immutable view of the run mode, taken once before any phase runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModeFlags {
    /// The plan upgrades an existing cluster.
    pub upgrading: bool,
    /// Services must be restarted even if already running.
    pub restart_services: bool,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            generated_assets_dir: PathBuf::from(DEFAULT_ASSETS_DIR),
            playbook_dir: PathBuf::from(DEFAULT_PLAYBOOK_DIR),
            restart_services: false,
            verbose: false,
            output_format: OutputFormat::default(),
            skip_preflight: false,
        }
    }
}

impl ExecutorOptions {
    /// Returns the generated assets directory.
    #[must_use]
    pub fn assets_dir(&self) -> &Path {
        &self.generated_assets_dir
    }

    /// Returns the directory holding identity material.
    #[must_use]
    pub fn keys_dir(&self) -> PathBuf {
        self.generated_assets_dir.join("keys")
    }
}

impl ModeFlags {
    /// Takes the snapshot for a run.
    #[must_use]
    pub const fn snapshot(plan: &Plan, options: &ExecutorOptions) -> Self {
        Self {
            upgrading: plan.is_upgrade(),
            restart_services: options.restart_services,
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Simple => write!(f, "simple"),
            Self::Raw => write!(f, "raw"),
        }
    }
}
