//! Backend modules performing the backup of one group.
//!
//! Currently the following backends are implemented:
//!
//! - [Database]: Compressed dump of a MySQL database.
//! - [Application]: Compressed archive of an application directory.
//! - [Recycle]: Age based deletion of old backups and logs.
//! - [CommandBackup]: A free-form command run through an [ExecutionStrategy].
//!
//! [ExecutionStrategy]: crate::exec::ExecutionStrategy

pub mod application;
pub mod command;
pub mod database;
pub mod recycle;

pub use application::Application;
pub use command::CommandBackup;
pub use database::Database;
pub use recycle::Recycle;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Local};
use derive_more::{Display, Error};

use crate::archive::ArchiveError;
use crate::config::{BackupType, ParameterError, Parameters};
use crate::exec::{ExecError, ExecutionMethod};
use crate::runlog::LogSink;
use database::{DumpConnector, DumpError};

/// Timestamp format used in artifact names.
pub const FILE_TIMESTAMP: &str = "%Y%m%d_%H%M%S";
/// Timestamp format used in log lines.
pub const LOG_TIMESTAMP: &str = "%Y-%m-%d %H:%M:%S";

pub(crate) fn now_formatted() -> String {
    Local::now().format(LOG_TIMESTAMP).to_string()
}

/// Environment a [Backup] runs in.
pub struct RunContext<'a> {
    pub artifacts: ArtifactName,
    pub method: ExecutionMethod,
    pub connector: &'a dyn DumpConnector,
    pub now: SystemTime,
}

/// Generic backup backend.
pub trait Backup {
    /// Error that may happen on backup.
    type Error;

    /// Performs the backup, reporting every step to `log`.
    fn backup(&self, ctx: &RunContext<'_>, log: &mut dyn LogSink) -> Result<(), Self::Error>;
}

#[derive(Debug, Display, PartialEq, Eq)]
/// A required option is missing or invalid.
pub enum ValidationError {
    #[display("{_0} must be specified")]
    Missing(&'static str),
    #[display("MYSQL_PASSWORD must be specified when MYSQL_USER is not empty")]
    PasswordRequired,
    #[display("{_0} must not be zero")]
    Zero(&'static str),
    #[display("{key} is not a number of days: {value}")]
    NotANumber { key: &'static str, value: String },
    #[display("{key} is not a directory: {}", path.display())]
    NotADirectory { key: &'static str, path: PathBuf },
    #[display("{_0}")]
    Invalid(String),
}

impl std::error::Error for ValidationError {}

impl From<ParameterError> for ValidationError {
    fn from(e: ParameterError) -> Self {
        ValidationError::Invalid(e.to_string())
    }
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Display, Error)]
/// Errors on the backup of one group.
pub enum BackupError {
    /// Required options are missing or invalid.
    #[display("Validation failed: {}", join_errors(_0))]
    ValidationFailed(#[error(ignore)] Vec<ValidationError>),
    /// An output directory can't be created.
    #[display("Directory {} could not be created: {source}", path.display())]
    DirectoryCreateFailed { path: PathBuf, source: io::Error },
    /// An external command failed.
    #[display("Execution failed: {_0}")]
    ExecutionFailed(ExecError),
    /// The in-process dump failed.
    #[display("Dump failed: {_0}")]
    DumpFailed(DumpError),
    /// The archive couldn't be written.
    #[display("Compression failed: {_0}")]
    CompressionFailed(ArchiveError),
    /// The uncompressed dump couldn't be removed after a successful backup.
    #[display("Dump file {} could not be deleted: {source}", path.display())]
    CleanupFailed { path: PathBuf, source: io::Error },
    /// At least one aged file couldn't be deleted.
    #[display("Recycling of {} could not delete every aged file", _0.display())]
    RetentionDeleteFailed(#[error(ignore)] PathBuf),
}

/// Deterministic names of the files produced by one run:
/// `bkp-<type>-<target>[-<suffix>]-<YYYYMMDD_HHMMSS>.<ext>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactName {
    kind: String,
    target: String,
    suffix: String,
    timestamp: String,
}

impl ArtifactName {
    pub fn new(kind: BackupType, target: &str, suffix: &str, time: &DateTime<Local>) -> Self {
        Self::with_label(&kind.to_string(), target, suffix, time)
    }

    /// Name of the summary log of a whole run: `bkp-run-<process>...`.
    pub fn summary(process: &str, suffix: &str, time: &DateTime<Local>) -> Self {
        Self::with_label("run", process, suffix, time)
    }

    fn with_label(kind: &str, target: &str, suffix: &str, time: &DateTime<Local>) -> Self {
        Self {
            kind: kind.to_string(),
            target: target.to_string(),
            suffix: suffix.to_string(),
            timestamp: time.format(FILE_TIMESTAMP).to_string(),
        }
    }

    pub fn file_name(&self, extension: &str) -> String {
        let suffix = if self.suffix.is_empty() {
            String::new()
        } else {
            format!("-{}", self.suffix)
        };
        format!(
            "bkp-{}-{}{suffix}-{}.{extension}",
            self.kind, self.target, self.timestamp
        )
    }

    pub fn path(&self, dir: &Path, extension: &str) -> PathBuf {
        dir.join(self.file_name(extension))
    }
}

/// Creates `dir` if missing.
pub(crate) fn prepare_dir(dir: &Path, log: &mut dyn LogSink) -> Result<(), BackupError> {
    if !dir.exists() {
        log.append(&format!("Creating directory: {}", dir.display()));
    }
    crate::util::ensure_dir(dir).map_err(|source| {
        let err = BackupError::DirectoryCreateFailed {
            path: dir.to_path_buf(),
            source,
        };
        log.append(&format!("ERROR: {err}"));
        err
    })
}

/// Logs location and size of a finished archive.
pub(crate) fn report_archive(path: &Path, log: &mut dyn LogSink) {
    log.append("Backup Completed");
    match fs::metadata(path) {
        Ok(meta) => log.append(&format!(
            "The backup is in: {} ({} bytes)",
            path.display(),
            meta.len()
        )),
        Err(e) => log.append(&format!(
            "WARNING: The backup {} can't be listed: {e}",
            path.display()
        )),
    }
}

/// A validated backup of one group.
pub enum Job {
    Database(Database),
    Application(Application),
    Recycle(Recycle),
    Command(CommandBackup),
}

impl Job {
    /// Checks the options required by the backup type and builds the job.
    ///
    /// Every problem is reported, not only the first one.
    pub fn from_parameters(group: &str, params: &Parameters) -> Result<Self, Vec<ValidationError>> {
        let mut errors = Vec::new();
        if params.log_file_path.is_none() {
            errors.push(ValidationError::Missing("LOG_FILE_PATH"));
        }

        let job = match params.backup_type {
            BackupType::Db => Database::from_parameters(params, &mut errors).map(Job::Database),
            BackupType::App => {
                Application::from_parameters(params, &mut errors).map(Job::Application)
            }
            BackupType::Recycle => {
                Recycle::from_parameters(group, params, &mut errors).map(Job::Recycle)
            }
            BackupType::Command => {
                CommandBackup::from_parameters(group, params, &mut errors).map(Job::Command)
            }
        };

        match job {
            Some(job) if errors.is_empty() => Ok(job),
            _ => Err(errors),
        }
    }

    pub fn kind(&self) -> BackupType {
        match self {
            Job::Database(_) => BackupType::Db,
            Job::Application(_) => BackupType::App,
            Job::Recycle(_) => BackupType::Recycle,
            Job::Command(_) => BackupType::Command,
        }
    }

    /// Name of the backup target used in file names.
    pub fn target(&self) -> &str {
        match self {
            Job::Database(db) => &db.connection.database,
            Job::Application(app) => &app.name,
            Job::Recycle(recycle) => &recycle.name,
            Job::Command(command) => &command.name,
        }
    }

    pub fn run(&self, ctx: &RunContext<'_>, log: &mut dyn LogSink) -> Result<(), BackupError> {
        match self {
            Job::Database(db) => db.backup(ctx, log),
            Job::Application(app) => app.backup(ctx, log),
            Job::Recycle(recycle) => recycle.backup(ctx, log),
            Job::Command(command) => command.backup(ctx, log),
        }
    }
}

/// Takes a required option, recording it as missing otherwise.
pub(crate) fn require<T: Clone>(
    value: &Option<T>,
    key: &'static str,
    errors: &mut Vec<ValidationError>,
) -> Option<T> {
    if value.is_none() {
        errors.push(ValidationError::Missing(key));
    }
    value.clone()
}
