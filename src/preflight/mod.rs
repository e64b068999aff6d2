//! Plan and environment validation.
//!
//! The [`Validator`] always runs the schema checks. Unless preflight is
//! skipped, it then runs the environment checks in a fixed order, collects
//! their warnings, and stops at the first fatal finding. Checks that only
//! warn run first so their findings reach the operator even when a later
//! check fails. No check mutates remote state.

mod checks;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::engine::ExecutorOptions;
use crate::error::{PreflightError, Result};
use crate::plan::{Plan, PlanValidator};

pub use checks::{
    AssetsDirectoryCheck, ConnectivityCheck, DEFAULT_CONNECT_TIMEOUT, MIN_DISK_FREE_MB,
    PrerequisiteCheck, RemoteResourceCheck, SshKeyCheck, TopologyCheck,
};

/// Result of a single preflight check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    /// Nothing to report.
    Passed,
    /// Non-fatal findings.
    Warnings(Vec<String>),
    /// The run cannot proceed.
    Fatal {
        /// Description of the failure.
        message: String,
        /// Non-fatal findings made before the failure.
        warnings: Vec<String>,
    },
}

/// An environment check run before any host is touched.
#[async_trait]
pub trait PreflightCheck: Send + Sync {
    /// Short check name used in reports.
    fn name(&self) -> &'static str;

    /// Runs the check.
    async fn run(&self, plan: &Plan, options: &ExecutorOptions) -> CheckOutcome;
}

/// Findings of a successful validation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    /// Non-fatal findings from the schema and preflight checks.
    pub warnings: Vec<String>,
    /// Preflight checks that ran, in order.
    pub checks_run: Vec<&'static str>,
    /// Preflight was skipped on request.
    pub preflight_skipped: bool,
}

/// Validates a plan and the environment it will run in.
pub struct Validator {
    /// Schema checks.
    schema: PlanValidator,
    /// Preflight checks in execution order.
    checks: Vec<Box<dyn PreflightCheck>>,
}

impl CheckOutcome {
    /// Creates a fatal outcome without warnings.
    #[must_use]
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal {
            message: message.into(),
            warnings: Vec::new(),
        }
    }

    /// Returns true if the outcome stops the run.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal { .. })
    }
}

impl Validator {
    /// Creates a validator with the built-in checks.
    #[must_use]
    pub fn new() -> Self {
        Self::with_checks(vec![
            Box::new(TopologyCheck),
            Box::new(AssetsDirectoryCheck),
            Box::new(SshKeyCheck),
            Box::new(PrerequisiteCheck::default()),
            Box::new(ConnectivityCheck::default()),
        ])
    }

    /// Appends a check after the existing ones.
    #[must_use]
    pub fn with_check(mut self, check: Box<dyn PreflightCheck>) -> Self {
        self.checks.push(check);
        self
    }

    /// Creates a validator with custom preflight checks.
    #[must_use]
    pub fn with_checks(checks: Vec<Box<dyn PreflightCheck>>) -> Self {
        Self {
            schema: PlanValidator::new(),
            checks,
        }
    }

    /// Validates a plan.
    ///
    /// # Errors
    ///
    /// Returns a plan error if the schema checks fail, even when preflight
    /// is skipped, and [`PreflightError::Failed`] for the first fatal
    /// preflight finding.
    pub async fn validate(&self, plan: &Plan, options: &ExecutorOptions) -> Result<ValidationReport> {
        let schema = self.schema.validate(plan)?;
        let mut report = ValidationReport {
            warnings: schema.warnings,
            ..ValidationReport::default()
        };

        if options.skip_preflight {
            info!("Skipping preflight checks");
            report.preflight_skipped = true;
            return Ok(report);
        }

        for check in &self.checks {
            debug!("Running preflight check: {}", check.name());
            report.checks_run.push(check.name());

            match check.run(plan, options).await {
                CheckOutcome::Passed => {}
                CheckOutcome::Warnings(warnings) => {
                    for warning in &warnings {
                        warn!("{}: {}", check.name(), warning);
                    }
                    report.warnings.extend(warnings);
                }
                CheckOutcome::Fatal { message, warnings } => {
                    report.warnings.extend(warnings);
                    return Err(PreflightError::Failed {
                        check: check.name().to_string(),
                        message,
                        warnings: report.warnings,
                    }
                    .into());
                }
            }
        }

        info!("Preflight checks passed ({} warnings)", report.warnings.len());
        Ok(report)
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Validator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.checks.iter().map(|c| c.name()).collect();
        f.debug_struct("Validator").field("checks", &names).finish()
    }
}
