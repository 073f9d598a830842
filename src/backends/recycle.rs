//! Implements deletion of aged backups and logs using [Recycle].

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use super::{now_formatted, require, Backup, BackupError, RunContext, ValidationError};
use crate::config::Parameters;
use crate::runlog::LogSink;
use crate::util::retention::{RetentionPolicy, RetentionReport};

/// The [Recycle] backend sweeps the backup and the log directory.
///
/// Each directory has its own age threshold, the exclusion and reporting
/// settings are shared.
#[derive(Debug, Clone)]
pub struct Recycle {
    /// Group name, used as target name of the log.
    pub name: String,
    pub backup_path: PathBuf,
    pub log_path: PathBuf,
    pub backups: RetentionPolicy,
    pub logs: RetentionPolicy,
}

fn days(
    value: &Option<String>,
    key: &'static str,
    errors: &mut Vec<ValidationError>,
) -> Option<u32> {
    let value = require(value, key, errors)?;
    match value.trim().parse::<u32>() {
        Ok(0) => {
            errors.push(ValidationError::Zero(key));
            None
        }
        Ok(days) => Some(days),
        Err(_) => {
            errors.push(ValidationError::NotANumber { key, value });
            None
        }
    }
}

impl Recycle {
    pub(crate) fn from_parameters(
        group: &str,
        params: &Parameters,
        errors: &mut Vec<ValidationError>,
    ) -> Option<Self> {
        let backup_days = days(&params.mtime_bkp, "MTIME_BKP", errors);
        let log_days = days(&params.mtime_log, "MTIME_LOG", errors);
        let backup_path = require(&params.backup_path, "BACKUP_PATH", errors);

        let policy = |days| RetentionPolicy {
            days,
            exclude: params.exclude_filenames_with.clone(),
            only_report: params.only_report,
            report_all: params.report_all,
        };

        Some(Self {
            name: group.to_string(),
            backup_path: backup_path?,
            log_path: params.log_file_path.clone()?,
            backups: policy(backup_days?),
            logs: policy(log_days?),
        })
    }

    /// Sweeps both directories, the backup directory first.
    fn sweep(
        &self,
        ctx: &RunContext<'_>,
        log: &mut dyn LogSink,
        remove: &mut dyn FnMut(&Path) -> io::Result<()>,
    ) -> [(PathBuf, RetentionReport); 2] {
        [(&self.backup_path, &self.backups), (&self.log_path, &self.logs)].map(|(root, policy)| {
            let report = policy.sweep_with(root, ctx.now, log, remove);
            log::info!(
                target: "backend::recycle",
                "{}: processed {}, eligible {}, removed {}",
                root.display(),
                report.processed,
                report.eligible,
                report.removed
            );
            (root.clone(), report)
        })
    }

    fn recycle(
        &self,
        ctx: &RunContext<'_>,
        log: &mut dyn LogSink,
        remove: &mut dyn FnMut(&Path) -> io::Result<()>,
    ) -> Result<(), BackupError> {
        log.append(&format!(
            "Recycling Started | Backups: {} ({} days) | Logs: {} ({} days){} | {}",
            self.backup_path.display(),
            self.backups.days,
            self.log_path.display(),
            self.logs.days,
            if self.backups.only_report { " | Only report" } else { "" },
            now_formatted()
        ));

        let reports = self.sweep(ctx, log, remove);

        if let Some((root, _)) = reports.iter().find(|(_, report)| report.error) {
            let err = BackupError::RetentionDeleteFailed(root.clone());
            log.append(&format!("ERROR: {err}"));
            return Err(err);
        }

        log.append(&format!("Recycling Completed at {}", now_formatted()));
        Ok(())
    }
}

impl Backup for Recycle {
    type Error = BackupError;

    fn backup(&self, ctx: &RunContext<'_>, log: &mut dyn LogSink) -> Result<(), Self::Error> {
        self.recycle(ctx, log, &mut |path| fs::remove_file(path))
    }
}
