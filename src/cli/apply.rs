//! The `apply` and `validate` flows.
//!
//! [`ApplyCommand`] sequences one run: read the plan, validate it, issue
//! identities, write the kubeconfig, install the core cluster, run the
//! optional plays whose predicates hold, smoke test, then print next steps.
//! Every stage error is prefixed with the stage it came from.

use chrono::Local;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

use crate::backup::{backup_directory, backup_path};
use crate::engine::{Executor, ExecutorOptions, FeaturePlay, ModeFlags, selected_feature_plays};
use crate::error::{CairnError, Result, StageContext};
use crate::kubeconfig::generate_kubeconfig;
use crate::plan::{Plan, Planner};
use crate::preflight::{ValidationReport, Validator};

use super::output::Reporter;

/// Stage prefix for plan loading errors.
const READ_STAGE: &str = "error reading plan file";
/// Stage prefix for validation errors.
const VALIDATE_STAGE: &str = "error validating plan";
/// Stage prefix for identity and core install errors.
const INSTALL_STAGE: &str = "error installing";
/// Stage prefix for kubeconfig errors.
const KUBECONFIG_STAGE: &str = "error generating kubeconfig file";
/// Stage prefix for smoke test errors.
const SMOKE_TEST_STAGE: &str = "error running smoke test";

/// Drives one `cairn apply` or `cairn validate` invocation.
pub struct ApplyCommand<'a, P: ?Sized, E: ?Sized> {
    /// Plan source.
    planner: &'a P,
    /// Execution engine.
    executor: &'a E,
    /// Plan and environment validator.
    validator: &'a Validator,
    /// Operator output.
    reporter: Arc<Reporter>,
    /// Run options.
    options: ExecutorOptions,
    /// Operator home directory holding client configuration.
    home_dir: Option<PathBuf>,
}

impl<'a, P, E> ApplyCommand<'a, P, E>
where
    P: Planner + ?Sized,
    E: Executor + ?Sized,
{
    /// Creates a command using the current user's home directory.
    #[must_use]
    pub fn new(
        planner: &'a P,
        executor: &'a E,
        validator: &'a Validator,
        reporter: Arc<Reporter>,
        options: ExecutorOptions,
    ) -> Self {
        Self {
            planner,
            executor,
            validator,
            reporter,
            options,
            home_dir: dirs::home_dir(),
        }
    }

    /// Overrides the home directory used for client configuration backups.
    #[must_use]
    pub fn with_home_dir(mut self, home: impl Into<PathBuf>) -> Self {
        self.home_dir = Some(home.into());
        self
    }

    /// Runs the full apply flow.
    ///
    /// # Errors
    ///
    /// Returns the first stage error, prefixed with the stage name.
    pub async fn apply(&self) -> Result<()> {
        let plan = self.planner.read().stage(READ_STAGE)?;
        self.check(&plan).await.stage(VALIDATE_STAGE)?;

        self.executor
            .generate_certificates(&plan)
            .await
            .stage(INSTALL_STAGE)?;

        self.reporter.header("Generating Kubeconfig File");
        let kubeconfig = generate_kubeconfig(&plan, self.options.assets_dir()).stage(KUBECONFIG_STAGE)?;
        self.reporter
            .ok(&format!("Generated kubeconfig file in {}", kubeconfig.display()));

        self.executor.install(&plan).await.stage(INSTALL_STAGE)?;

        let flags = ModeFlags::snapshot(&plan, &self.options);
        for play in selected_feature_plays(&plan.features, &flags) {
            self.run_feature_play(play, &plan).await?;
        }

        self.executor
            .run_smoke_test(&plan)
            .await
            .stage(SMOKE_TEST_STAGE)?;

        self.reporter.success_hints(&plan, self.options.assets_dir());
        info!("Apply of {} completed", plan.cluster.name);
        Ok(())
    }

    /// Reads and validates the plan without touching any node.
    ///
    /// # Errors
    ///
    /// Returns the plan loading or validation error, prefixed with its stage.
    pub async fn validate(&self) -> Result<ValidationReport> {
        let plan = self.planner.read().stage(READ_STAGE)?;
        let report = self.check(&plan).await.stage(VALIDATE_STAGE)?;

        if report.preflight_skipped {
            self.reporter.warn("Preflight checks skipped");
        }
        self.reporter.ok(&format!(
            "Plan {} is valid ({} preflight checks)",
            plan.cluster.name,
            report.checks_run.len()
        ));
        Ok(report)
    }

    /// Validates the plan and prints every warning found.
    async fn check(&self, plan: &Plan) -> Result<ValidationReport> {
        self.reporter.header("Validating");

        match self.validator.validate(plan, &self.options).await {
            Ok(report) => {
                for warning in &report.warnings {
                    self.reporter.warn(warning);
                }
                Ok(report)
            }
            Err(e) => {
                for warning in e.preflight_warnings() {
                    self.reporter.warn(warning);
                }
                self.reporter.fail(&e.to_string());
                if e.is_preflight() {
                    self.reporter
                        .warn("Re-run with --skip-preflight to bypass the environment checks");
                }
                Err(e)
            }
        }
    }

    /// Runs one optional play, backing up its client directory first.
    async fn run_feature_play(&self, play: &FeaturePlay, plan: &Plan) -> Result<()> {
        self.reporter.header(play.title);

        if let Some(dir) = play.client_dir {
            self.backup_client_dir(dir).stage(play.failure_context)?;
        }

        debug!("Running optional play {}", play.name);
        self.executor
            .run_play(play.name, plan)
            .await
            .stage(play.failure_context)
    }

    fn backup_client_dir(&self, dir: &str) -> Result<()> {
        let home = self
            .home_dir
            .as_ref()
            .ok_or_else(|| CairnError::internal("cannot determine the home directory"))?;

        let src = home.join(dir);
        let dest = backup_path(&src, Local::now());
        if backup_directory(&src, &dest)? {
            self.reporter.ok(&format!(
                "Backed up {} directory to {}",
                src.display(),
                dest.display()
            ));
        }
        Ok(())
    }
}

impl<P: ?Sized, E: ?Sized> std::fmt::Debug for ApplyCommand<'_, P, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApplyCommand")
            .field("options", &self.options)
            .field("home_dir", &self.home_dir)
            .finish_non_exhaustive()
    }
}
