//! CLI command definitions.
//!
//! This module defines all CLI commands and their arguments using clap.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::engine::{DEFAULT_ASSETS_DIR, DEFAULT_PLAYBOOK_DIR, ExecutorOptions, OutputFormat};
use crate::plan::DEFAULT_PLAN_FILE;

/// Cairn - Declarative cluster installer.
#[derive(Parser, Debug)]
#[command(name = "cairn")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the plan file.
    #[arg(long, global = true, env = "CAIRN_PLAN_FILE", default_value = DEFAULT_PLAN_FILE)]
    pub plan_file: PathBuf,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write a starter plan file to edit.
    Init(InitArgs),

    /// Install or upgrade the cluster described by the plan.
    Apply(ApplyArgs),

    /// Validate the plan and the environment without touching any node.
    Validate(RunArgs),
}

/// Arguments of `cairn init`.
#[derive(Args, Debug, Clone)]
pub struct InitArgs {
    /// Overwrite an existing plan file.
    #[arg(long)]
    pub force: bool,
}

/// Arguments shared by every command that reads a plan.
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Directory where generated assets are written.
    #[arg(long, default_value = DEFAULT_ASSETS_DIR)]
    pub generated_assets_dir: PathBuf,

    /// Directory holding the play files.
    #[arg(long, env = "CAIRN_PLAYBOOK_DIR", default_value = DEFAULT_PLAYBOOK_DIR)]
    pub playbook_dir: PathBuf,

    /// Enable verbose output.
    #[arg(short, long)]
    pub verbose: bool,

    /// Output format.
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Simple)]
    pub output: OutputFormat,

    /// Skip environment checks. Plan schema checks always run.
    #[arg(long)]
    pub skip_preflight: bool,
}

/// Arguments of `cairn apply`.
#[derive(Args, Debug, Clone)]
pub struct ApplyArgs {
    /// Shared arguments.
    #[command(flatten)]
    pub run: RunArgs,

    /// Restart services even when they are already running.
    #[arg(long)]
    pub restart_services: bool,
}

impl Commands {
    /// Returns true if verbose output was requested.
    #[must_use]
    pub const fn verbose(&self) -> bool {
        match self {
            Self::Init(_) => false,
            Self::Apply(args) => args.run.verbose,
            Self::Validate(args) => args.verbose,
        }
    }
}

impl From<&RunArgs> for ExecutorOptions {
    fn from(args: &RunArgs) -> Self {
        Self {
            generated_assets_dir: args.generated_assets_dir.clone(),
            playbook_dir: args.playbook_dir.clone(),
            restart_services: false,
            verbose: args.verbose,
            output_format: args.output,
            skip_preflight: args.skip_preflight,
        }
    }
}

impl From<&ApplyArgs> for ExecutorOptions {
    fn from(args: &ApplyArgs) -> Self {
        Self {
            restart_services: args.restart_services,
            ..Self::from(&args.run)
        }
    }
}
