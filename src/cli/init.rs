//! The `init` flow: write a starter plan to edit.

use tracing::info;

use crate::error::{Result, StageContext};
use crate::plan::{Plan, Planner};

use super::output::Reporter;

/// Stage prefix for plan writing errors.
const WRITE_STAGE: &str = "error writing plan file";

/// Writes [`Plan::starter`] through `planner`.
///
/// An existing plan is left alone unless `force` is set. Returns true if a
/// plan was written.
///
/// # Errors
///
/// Returns the write error, prefixed with its stage.
pub fn init_plan<P>(planner: &P, reporter: &Reporter, force: bool) -> Result<bool>
where
    P: Planner + ?Sized,
{
    if planner.exists() && !force {
        reporter.warn("A plan file already exists. Re-run with --force to overwrite it");
        return Ok(false);
    }

    let plan = Plan::starter();
    planner.write(&plan).stage(WRITE_STAGE)?;
    info!("Wrote starter plan for {}", plan.cluster.name);
    reporter.ok("Wrote a starter plan. Edit the node addresses and SSH settings before applying.");
    Ok(true)
}
