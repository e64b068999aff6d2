//! Cairn CLI entrypoint.
//!
//! This is the main entrypoint for the cairn command-line tool.

use std::process::ExitCode;
use std::sync::Arc;

use cairn_cluster::backend::AnsibleRunner;
use cairn_cluster::cli::{ApplyCommand, Cli, Commands, Reporter, init_plan};
use cairn_cluster::engine::{ClusterExecutor, ExecutorOptions, OutputFormat};
use cairn_cluster::error::Result;
use cairn_cluster::plan::FilePlanner;
use cairn_cluster::preflight::{RemoteResourceCheck, Validator};

use clap::Parser;
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.command.verbose());

    // Run async runtime
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system.
///
/// Logs go to stderr; stdout belongs to the run output.
fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Main async entry point.
async fn run(cli: Cli) -> Result<()> {
    let planner = FilePlanner::new(&cli.plan_file);
    planner.load_dotenv()?;
    debug!("Using plan file: {}", planner.path().display());

    let options = match &cli.command {
        Commands::Init(args) => {
            let reporter = Reporter::stdout(OutputFormat::Simple);
            return init_plan(&planner, &reporter, args.force).map(|_| ());
        }
        Commands::Apply(args) => ExecutorOptions::from(args),
        Commands::Validate(args) => ExecutorOptions::from(args),
    };

    let reporter = Arc::new(Reporter::stdout(options.output_format));
    let runner = AnsibleRunner::new(&options.playbook_dir, Arc::clone(&reporter))
        .with_verbose(options.verbose);
    let validator =
        Validator::new().with_check(Box::new(RemoteResourceCheck::new(runner.clone())));
    let executor = ClusterExecutor::new(runner, options.clone(), Arc::clone(&reporter));

    let command = ApplyCommand::new(&planner, &executor, &validator, reporter, options);

    if matches!(cli.command, Commands::Validate(_)) {
        command.validate().await.map(|_| ())
    } else {
        command.apply().await
    }
}
