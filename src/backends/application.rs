//! Implements backup of an application directory using [Application].

use std::fs;
use std::path::{Path, PathBuf};

use super::{
    now_formatted, prepare_dir, report_archive, require, Backup, BackupError, RunContext,
    ValidationError,
};
use crate::archive::{self, ArchiveWriter, ZipArchiveWriter};
use crate::config::Parameters;
use crate::runlog::LogSink;

/// The [Application] backend archives a whole directory tree.
///
/// Paths inside the archive are relative to the application root.
#[derive(Debug, Clone)]
pub struct Application {
    pub name: String,
    pub root_path: PathBuf,
    pub backup_path: PathBuf,
    pub name_suffix: String,
}

impl Application {
    pub(crate) fn from_parameters(
        params: &Parameters,
        errors: &mut Vec<ValidationError>,
    ) -> Option<Self> {
        let root_path = require(&params.app_root_path, "APP_ROOT_PATH", errors);
        if let Some(root) = &root_path {
            if !root.is_dir() {
                errors.push(ValidationError::NotADirectory {
                    key: "APP_ROOT_PATH",
                    path: root.clone(),
                });
            }
        }
        let name = require(&params.app_name, "APP_NAME", errors);
        let backup_path = require(&params.backup_path, "BACKUP_PATH", errors);

        Some(Self {
            name: name?,
            root_path: root_path?,
            backup_path: backup_path?,
            name_suffix: params.name_suffix.clone(),
        })
    }

    pub fn output_dir(&self) -> PathBuf {
        self.backup_path.join(&self.name)
    }

    fn compress(&self, zip_file: &Path) -> Result<usize, BackupError> {
        let archive = ZipArchiveWriter::create(zip_file).map_err(BackupError::CompressionFailed)?;
        let mut archive = Box::new(archive);
        let files = archive::add_tree(archive.as_mut(), &self.root_path, Some(zip_file))
            .map_err(BackupError::CompressionFailed)?;
        archive.finish().map_err(BackupError::CompressionFailed)?;
        Ok(files)
    }
}

impl Backup for Application {
    type Error = BackupError;

    fn backup(&self, ctx: &RunContext<'_>, log: &mut dyn LogSink) -> Result<(), Self::Error> {
        log.append(&format!(
            "Application Backup Started | App: {} | Root: {} | Name Suffix: {} | {}",
            self.name,
            self.root_path.display(),
            self.name_suffix,
            now_formatted()
        ));

        let output_dir = self.output_dir();
        prepare_dir(&output_dir, log)?;

        let zip_file = ctx.artifacts.path(&output_dir, "zip");
        log.append(&format!("Zipping {} into {}", self.root_path.display(), zip_file.display()));
        log::info!(target: "backend::app", "Archiving {}", self.root_path.display());

        match self.compress(&zip_file) {
            Ok(files) => log.append(&format!(
                "Zip of {files} files successfully finished at {}",
                now_formatted()
            )),
            Err(e) => {
                log.append(&format!("ERROR: {e}"));
                if zip_file.exists() {
                    if let Err(e) = fs::remove_file(&zip_file) {
                        log::warn!(target: "backend::app", "Removing partial archive {} failed: {e}", zip_file.display());
                    }
                }
                return Err(e);
            }
        }

        report_archive(&zip_file, log);
        log::info!(target: "backend::app", "Finished backup of application {}", self.name);

        Ok(())
    }
}
