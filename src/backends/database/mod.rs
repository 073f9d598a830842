//! Implements backup of a MySQL database using [Database].

pub mod dump;
pub mod server;

use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};

pub use dump::{ConnectionParams, DumpConnector, DumpError, DumpSource, DumpStats, SqlValue};
pub use server::MySqlConnector;

use super::{
    now_formatted, prepare_dir, report_archive, require, Backup, BackupError, RunContext,
    ValidationError,
};
use crate::archive::{ArchiveWriter, ZipArchiveWriter};
use crate::config::Parameters;
use crate::exec::{self, CommandLine, ExecutionMethod};
use crate::runlog::LogSink;

/// The [Database] backend dumps a MySQL database and compresses the dump.
///
/// With [ExecutionMethod::Native] the dump is written in-process, every other
/// method runs `mysqldump`.
#[derive(Debug, Clone)]
pub struct Database {
    pub connection: ConnectionParams,
    pub backup_path: PathBuf,
    pub name_suffix: String,
    pub mysqldump_bin: String,
}

impl Database {
    pub(crate) fn from_parameters(
        params: &Parameters,
        errors: &mut Vec<ValidationError>,
    ) -> Option<Self> {
        let database = require(&params.mysql_database, "MYSQL_DATABASE", errors);
        let host = require(&params.mysql_server, "MYSQL_SERVER", errors);
        if params.mysql_user.is_some() && params.mysql_password.is_none() {
            errors.push(ValidationError::PasswordRequired);
        }
        let backup_path = require(&params.backup_path, "BACKUP_PATH", errors);

        Some(Self {
            connection: ConnectionParams {
                host: host?,
                port: params.mysql_port,
                database: database?,
                user: params.mysql_user.clone(),
                password: params.mysql_password.clone(),
            },
            backup_path: backup_path?,
            name_suffix: params.name_suffix.clone(),
            mysqldump_bin: params.mysqldump_bin.clone(),
        })
    }

    /// Directory the dumps of this database are stored in.
    pub fn output_dir(&self) -> PathBuf {
        self.backup_path.join(&self.connection.database)
    }

    /// `mysqldump` invocation writing the dump to `dump_file`.
    pub fn dump_command(&self, dump_file: &Path) -> CommandLine {
        let ConnectionParams {
            host,
            port,
            database,
            user,
            password,
        } = &self.connection;

        let mut command = CommandLine::new(&self.mysqldump_bin)
            .arg(format!("--host={host}"))
            .arg(format!("--port={port}"));
        if let Some(user) = user {
            command = command.arg(format!("--user={user}"));
        }
        if let Some(password) = password {
            command = command.secret("--password=", password);
        }
        command
            .arg(format!("--result-file={}", dump_file.display()))
            .arg(database)
    }

    fn dump_native(
        &self,
        ctx: &RunContext<'_>,
        dump_file: &Path,
        log: &mut dyn LogSink,
    ) -> Result<(), BackupError> {
        let mut source = ctx.connector.connect(&self.connection).map_err(BackupError::DumpFailed)?;

        let file = File::create_new(dump_file).map_err(|e| BackupError::DumpFailed(e.into()))?;
        let mut out = BufWriter::new(file);
        let stats = dump::write_dump(source.as_mut(), &self.connection.database, &mut out)
            .map_err(BackupError::DumpFailed)?;

        log.append(&format!("Dumped {} tables with {} rows", stats.tables, stats.rows));
        Ok(())
    }

    fn dump_external(
        &self,
        ctx: &RunContext<'_>,
        dump_file: &Path,
        log: &mut dyn LogSink,
    ) -> Result<(), BackupError> {
        let strategy = exec::strategy(ctx.method);
        let command = self.dump_command(dump_file);
        exec::execute_and_report(strategy.as_ref(), &command, log)
            .map_err(BackupError::ExecutionFailed)?;

        if dump_file.is_file() {
            Ok(())
        } else {
            Err(BackupError::DumpFailed(DumpError::Missing(dump_file.to_path_buf())))
        }
    }

    fn compress(dump_file: &Path, zip_file: &Path) -> Result<(), BackupError> {
        let entry = dump_file
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "dump.sql".to_string());

        let archive = ZipArchiveWriter::create(zip_file).map_err(BackupError::CompressionFailed)?;
        let mut archive = Box::new(archive);
        archive
            .add_file(dump_file, &entry)
            .and_then(|()| archive.finish())
            .map_err(BackupError::CompressionFailed)
    }

    /// Dumps, compresses and deletes the dump through `remove`.
    fn dump_and_compress(
        &self,
        ctx: &RunContext<'_>,
        log: &mut dyn LogSink,
        remove: &mut dyn FnMut(&Path) -> io::Result<()>,
    ) -> Result<(), BackupError> {
        log.append(&format!(
            "Database Backup Started | DB: {} | Name Suffix: {} | {}",
            self.connection.database,
            self.name_suffix,
            now_formatted()
        ));

        let output_dir = self.output_dir();
        prepare_dir(&output_dir, log)?;

        let dump_file = ctx.artifacts.path(&output_dir, "sql");
        let zip_file = ctx.artifacts.path(&output_dir, "zip");
        log.append(&format!("Creating Backup: {}", dump_file.display()));
        log::info!(
            target: "backend::db",
            "Dumping database {} [{}]",
            self.connection.database,
            ctx.method
        );

        let dumped = match ctx.method {
            ExecutionMethod::Native => self.dump_native(ctx, &dump_file, log),
            _ => self.dump_external(ctx, &dump_file, log),
        };
        if let Err(e) = dumped {
            log.append(&format!("Dump ERROR at {}: {e}", now_formatted()));
            remove_partial(&dump_file);
            return Err(e);
        }
        log.append(&format!("Dump successfully finished at {}", now_formatted()));

        log.append("Zipping File:");
        if let Err(e) = Self::compress(&dump_file, &zip_file) {
            log.append(&format!("ERROR: {e}"));
            remove_partial(&zip_file);
            return Err(e);
        }
        log.append(&format!("Zip of dump successfully finished at {}", now_formatted()));

        log.append(&format!("Deleting Dump File: {}", dump_file.display()));
        if let Err(source) = remove(&dump_file) {
            let warning = BackupError::CleanupFailed {
                path: dump_file.clone(),
                source,
            };
            log::warn!(target: "backend::db", "{warning}");
            log.append(&format!("WARNING: {warning}"));
        }

        report_archive(&zip_file, log);
        log::info!(
            target: "backend::db",
            "Finished backup of database {}",
            self.connection.database
        );

        Ok(())
    }
}

fn remove_partial(path: &Path) {
    if path.exists() {
        if let Err(e) = fs::remove_file(path) {
            log::warn!(target: "backend::db", "Removing partial file {} failed: {e}", path.display());
        }
    }
}

impl Backup for Database {
    type Error = BackupError;

    fn backup(&self, ctx: &RunContext<'_>, log: &mut dyn LogSink) -> Result<(), Self::Error> {
        self.dump_and_compress(ctx, log, &mut |path| fs::remove_file(path))
    }
}
