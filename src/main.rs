use std::process::ExitCode;

use clap::Parser;
use db_backup_lib::cli::Cli;
use db_backup_lib::orchestrator::Orchestrator;

fn main() -> ExitCode {
    let cli = Cli::parse();

    // init logger
    let mut env_logger = env_logger::builder();
    if let Some(level) = cli.verbose {
        env_logger.filter_level(level);
    }
    if let Err(e) = env_logger.try_init() {
        eprintln!("Logger initialization failed: {e}");
    }

    let orchestrator = Orchestrator::new(&cli.config, cli.run_options());
    match orchestrator.run() {
        Ok(summary) => {
            log::info!(
                "Finished {} groups: {} completed, {} failed, {} skipped",
                summary.groups.len(),
                summary.completed(),
                summary.failed(),
                summary.skipped()
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("Reading the config file failed: {e}");
            ExitCode::FAILURE
        }
    }
}
