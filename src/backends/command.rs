//! Implements running a free-form command using [CommandBackup].

use percent_encoding::percent_decode_str;

use super::{now_formatted, require, Backup, BackupError, RunContext, ValidationError};
use crate::config::Parameters;
use crate::exec::{self, CommandLine};
use crate::runlog::LogSink;

/// The [CommandBackup] backend runs a configured command, e.g. another
/// backup tool, and logs its output.
#[derive(Debug, Clone)]
pub struct CommandBackup {
    /// `NAME` option, defaults to the group name.
    pub name: String,
    pub command: CommandLine,
}

/// Turns a `COMMAND` value like `"php%20./backup.php%20.env"` into a [CommandLine].
pub fn parse_command(value: &str) -> Option<CommandLine> {
    let value = value.trim().trim_matches('"');
    CommandLine::parse(&percent_decode_str(value).decode_utf8_lossy())
}

impl CommandBackup {
    pub(crate) fn from_parameters(
        group: &str,
        params: &Parameters,
        errors: &mut Vec<ValidationError>,
    ) -> Option<Self> {
        let raw = require(&params.command, "COMMAND", errors)?;
        let Some(command) = parse_command(&raw) else {
            errors.push(ValidationError::Missing("COMMAND"));
            return None;
        };

        Some(Self {
            name: params.name.clone().unwrap_or_else(|| group.to_string()),
            command,
        })
    }
}

impl Backup for CommandBackup {
    type Error = BackupError;

    fn backup(&self, ctx: &RunContext<'_>, log: &mut dyn LogSink) -> Result<(), Self::Error> {
        log.append(&format!("Command processing started | {}", now_formatted()));
        log.append(&format!("Executing: {}", self.name));

        let strategy = exec::strategy(ctx.method);
        exec::execute_and_report(strategy.as_ref(), &self.command, log)
            .map_err(BackupError::ExecutionFailed)?;

        log.append("Command processing completed");
        Ok(())
    }
}
