//! Execution engine module.
//!
//! This module sequences a run:
//! - The static phase catalog and its inclusion predicates
//! - Rolling batch arithmetic
//! - Check-then-act reconciliation of service units
//! - The [`Executor`] that drives the automation backend

mod options;
mod phase;
mod batch;
mod reconcile;
mod result;
mod executor;

pub use options::{DEFAULT_ASSETS_DIR, DEFAULT_PLAYBOOK_DIR, ExecutorOptions, ModeFlags, OutputFormat};
pub use phase::{
    CORE_PHASES, DesiredState, FEATURE_PLAYS, FeaturePlay, Phase, Predicate, SMOKE_TEST_PLAY,
    Target, selected_feature_plays,
};
pub use batch::{batch_size, rollout_batches};
pub use reconcile::{ServiceState, Step, UnitStatus, reconcile};
pub use result::{PhaseResult, PhaseState, RunReport, RunState};
pub use executor::{ClusterExecutor, Executor};
