use std::path::PathBuf;

use clap::Parser;
use log::LevelFilter;

use crate::exec::ExecutionMethod;
use crate::orchestrator::RunOptions;
use crate::runlog::LineEnd;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Root configuration file.
    #[arg(default_value = ".env")]
    pub config: PathBuf,

    /// Verbosity of the command output.
    #[arg(long)]
    pub verbose: Option<LevelFilter>,

    /// Terminate echoed lines with `<BR/>` for display in a browser.
    #[arg(long)]
    pub web: bool,

    /// Name of the run, part of the summary log file name.
    #[arg(long, default_value = "bkp")]
    pub process_name: String,

    /// Overrides EXECUTION_METHOD of every group.
    #[arg(long)]
    pub execution_method: Option<ExecutionMethod>,

    /// Don't echo the run summary to stdout.
    #[arg(long)]
    pub quiet: bool,
}

impl Cli {
    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            process_name: self.process_name.clone(),
            line_end: if self.web { LineEnd::Html } else { LineEnd::Newline },
            execution_method: self.execution_method,
            echo_summary: !self.quiet,
        }
    }
}
