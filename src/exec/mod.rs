//! Strategies to run external commands.
//!
//! The [ExecutionMethod] of a group decides how dumps are produced and how
//! commands are run:
//!
//! - [Native](ExecutionMethod::Native): dumps are written in-process, other
//!   commands fall back to [BufferedCapture].
//! - [BufferedCapture]: combined output and exit code are captured.
//! - [ArrayCapture]: output is captured line by line.
//! - [InheritedStreams]: output goes to the process' own stdout/stderr, only
//!   the exit code is known.
//!
//! Commands block until the child exits, there is no timeout.

pub mod mask;

use std::fmt;
use std::io;
use std::process::{Command, Output, Stdio};
use std::str::FromStr;

use chrono::Local;
use clap::ValueEnum;
use derive_more::{Display, Error};

use crate::runlog::LogSink;
pub use mask::MASK;

/// Mechanism used to produce dumps and run commands.
#[derive(Copy, Clone, ValueEnum, Debug, Display, Default, PartialEq, Eq)]
pub enum ExecutionMethod {
    /// Dump in-process, no external programs needed.
    #[default]
    #[display("native")]
    Native,
    /// Capture the combined output of the command.
    #[display("buffered-capture")]
    BufferedCapture,
    /// Capture the output of the command line by line.
    #[display("array-capture")]
    ArrayCapture,
    /// Let the command write to the inherited stdout/stderr.
    #[display("inherited-streams")]
    InheritedStreams,
}

/// Execution method is unknown.
#[derive(Debug, Display, Error)]
#[display("Execution method is unknown: {_0}")]
pub struct UnknownExecutionMethod(#[error(ignore)] String);

impl FromStr for ExecutionMethod {
    type Err = UnknownExecutionMethod;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "native" | "include" => Ok(Self::Native),
            "buffered-capture" | "shell_exec" => Ok(Self::BufferedCapture),
            "array-capture" | "exec" => Ok(Self::ArrayCapture),
            "inherited-streams" | "system" => Ok(Self::InheritedStreams),
            other => Err(UnknownExecutionMethod(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Arg {
    Plain(String),
    /// Never shown unmasked, `prefix` is shown as is.
    Secret { prefix: String, secret: String },
}

/// An external command whose [Display](fmt::Display) form masks credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    program: String,
    args: Vec<Arg>,
}

impl CommandLine {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Splits a free-form command on whitespace.
    pub fn parse(line: &str) -> Option<Self> {
        let mut words = line.split_whitespace();
        let mut command = Self::new(words.next()?);
        for word in words {
            command = command.arg(word);
        }
        Some(command)
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(Arg::Plain(arg.into()));
        self
    }

    /// Adds the argument `{prefix}{secret}` which is logged as `{prefix}********`.
    pub fn secret(mut self, prefix: impl Into<String>, secret: impl Into<String>) -> Self {
        self.args.push(Arg::Secret {
            prefix: prefix.into(),
            secret: secret.into(),
        });
        self
    }

    fn secrets(&self) -> impl Iterator<Item = &str> {
        self.args.iter().filter_map(|arg| match arg {
            Arg::Secret { secret, .. } => Some(secret.as_str()),
            Arg::Plain(_) => None,
        })
    }

    /// Masks the secrets of this command in text produced by it.
    pub fn mask(&self, text: &str) -> String {
        mask::mask_secrets(text, self.secrets())
    }

    fn to_command(&self) -> Command {
        let mut command = Command::new(&self.program);
        for arg in &self.args {
            match arg {
                Arg::Plain(arg) => command.arg(arg),
                Arg::Secret { prefix, secret } => command.arg(format!("{prefix}{secret}")),
            };
        }
        command
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            match arg {
                Arg::Plain(arg) => line.push_str(arg),
                Arg::Secret { prefix, .. } => {
                    line.push_str(prefix);
                    line.push_str(MASK);
                }
            }
        }
        let line = self.mask(&line);
        f.write_str(&mask::mask_password_args(&line))
    }
}

/// Output of a command as captured by the [ExecutionStrategy].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Captured {
    Text(String),
    Lines(Vec<String>),
    /// Output went to the inherited streams.
    Inherited,
}

impl Captured {
    pub fn lines(&self) -> Vec<&str> {
        match self {
            Captured::Text(text) => text.lines().collect(),
            Captured::Lines(lines) => lines.iter().map(String::as_str).collect(),
            Captured::Inherited => Vec::new(),
        }
    }
}

/// Result of running a command to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutcome {
    /// Exit code, [None] if the child was terminated by a signal.
    pub code: Option<i32>,
    pub output: Captured,
    /// Standard error if it was captured separately.
    pub stderr: String,
}

impl ExecOutcome {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

#[derive(Debug, Display, Error)]
/// Errors on running an external command.
pub enum ExecError {
    /// The command couldn't be started.
    #[display("Running '{command}' failed: {source}")]
    Spawn { command: String, source: io::Error },
    /// The command exited unsuccessfully.
    #[display("'{command}' failed with result code {}", result_code(code))]
    Failed {
        command: String,
        code: Option<i32>,
    },
}

fn result_code(code: &Option<i32>) -> String {
    code.map_or_else(|| "none".to_string(), |c| c.to_string())
}

/// How a [CommandLine] is run.
pub trait ExecutionStrategy {
    fn method(&self) -> ExecutionMethod;

    /// Runs the command and waits for it to exit.
    fn execute(&self, command: &CommandLine) -> Result<ExecOutcome, ExecError>;
}

fn spawn_error(command: &CommandLine) -> impl FnOnce(io::Error) -> ExecError + '_ {
    move |source| ExecError::Spawn {
        command: command.to_string(),
        source,
    }
}

fn run_captured(command: &CommandLine) -> Result<Output, ExecError> {
    command
        .to_command()
        .stdin(Stdio::null())
        .output()
        .map_err(spawn_error(command))
}

/// Captures stdout and stderr as one text.
#[derive(Debug, Default, Clone, Copy)]
pub struct BufferedCapture;

impl ExecutionStrategy for BufferedCapture {
    fn method(&self) -> ExecutionMethod {
        ExecutionMethod::BufferedCapture
    }

    fn execute(&self, command: &CommandLine) -> Result<ExecOutcome, ExecError> {
        let output = run_captured(command)?;

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));

        Ok(ExecOutcome {
            code: output.status.code(),
            output: Captured::Text(text.trim_end().to_string()),
            stderr: String::new(),
        })
    }
}

/// Captures stdout line by line, stderr separately.
#[derive(Debug, Default, Clone, Copy)]
pub struct ArrayCapture;

impl ExecutionStrategy for ArrayCapture {
    fn method(&self) -> ExecutionMethod {
        ExecutionMethod::ArrayCapture
    }

    fn execute(&self, command: &CommandLine) -> Result<ExecOutcome, ExecError> {
        let output = run_captured(command)?;

        let lines = String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::to_string)
            .collect();

        Ok(ExecOutcome {
            code: output.status.code(),
            output: Captured::Lines(lines),
            stderr: String::from_utf8_lossy(&output.stderr).trim_end().to_string(),
        })
    }
}

/// Leaves stdout and stderr attached to the current process.
#[derive(Debug, Default, Clone, Copy)]
pub struct InheritedStreams;

impl ExecutionStrategy for InheritedStreams {
    fn method(&self) -> ExecutionMethod {
        ExecutionMethod::InheritedStreams
    }

    fn execute(&self, command: &CommandLine) -> Result<ExecOutcome, ExecError> {
        let status = command
            .to_command()
            .stdin(Stdio::null())
            .status()
            .map_err(spawn_error(command))?;

        Ok(ExecOutcome {
            code: status.code(),
            output: Captured::Inherited,
            stderr: String::new(),
        })
    }
}

/// Strategy used to run commands for `method`.
pub fn strategy(method: ExecutionMethod) -> Box<dyn ExecutionStrategy> {
    match method {
        ExecutionMethod::Native | ExecutionMethod::BufferedCapture => Box::new(BufferedCapture),
        ExecutionMethod::ArrayCapture => Box::new(ArrayCapture),
        ExecutionMethod::InheritedStreams => Box::new(InheritedStreams),
    }
}

fn timestamp() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Runs `command` and reports the masked command line, its output and the
/// result to `log`.
///
/// Unsuccessful exit codes are turned into [ExecError::Failed].
pub fn execute_and_report(
    strategy: &dyn ExecutionStrategy,
    command: &CommandLine,
    log: &mut dyn LogSink,
) -> Result<ExecOutcome, ExecError> {
    log.append(&format!("[{}] {command}", strategy.method()));
    log::debug!(target: "exec", "Running: {command}");

    let outcome = strategy.execute(command).inspect_err(|e| {
        log.append(&format!("ERROR: on command execution... {e}"));
    })?;

    let lines = outcome.output.lines();
    if !lines.is_empty() {
        log.append(&command.mask(&lines.join("\n")));
    }
    for line in outcome.stderr.lines() {
        log.append(&format!("WARNING: {}", command.mask(line)));
    }

    if outcome.success() {
        log.append(&format!("Execution successfully finished at {}", timestamp()));
        Ok(outcome)
    } else {
        let err = ExecError::Failed {
            command: command.to_string(),
            code: outcome.code,
        };
        log.append(&format!("Execution ERROR at {}: {err}", timestamp()));
        Err(err)
    }
}
