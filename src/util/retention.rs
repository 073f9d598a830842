use std::fs;
use std::io;
use std::path::Path;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Local};
use walkdir::WalkDir;

use crate::runlog::LogSink;

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

/// Age based retention of the files below a directory.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Files older than this many days are deleted.
    pub days: u32,

    /// Files whose name contains this substring are always kept.
    pub exclude: Option<String>,

    /// Only report files that would be deleted.
    pub only_report: bool,

    /// Log every preserved and out of range file instead of only their count.
    pub report_all: bool,
}

/// Verdict of the [RetentionPolicy] for one file.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Classification {
    /// Name matches the exclusion.
    Preserved,
    /// Not old enough to be deleted.
    OutOfRange,
    /// Old enough to be deleted.
    Eligible,
}

/// Counts of one sweep over a directory tree.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct RetentionReport {
    pub processed: usize,
    pub preserved: usize,
    pub out_of_range: usize,
    pub eligible: usize,
    pub removed: usize,
    /// At least one eligible file couldn't be deleted.
    pub error: bool,
}

impl RetentionPolicy {
    /// Files modified before the returned instant are eligible.
    pub fn threshold(&self, now: SystemTime) -> SystemTime {
        let age = Duration::from_secs(u64::from(self.days) * SECONDS_PER_DAY);
        now.checked_sub(age).unwrap_or(SystemTime::UNIX_EPOCH)
    }

    /// Exclusion is checked before age, a file modified exactly at the
    /// threshold is not eligible yet.
    pub fn classify(
        &self,
        file_name: &str,
        modified: SystemTime,
        threshold: SystemTime,
    ) -> Classification {
        let excluded = self
            .exclude
            .as_deref()
            .is_some_and(|exclude| !exclude.is_empty() && file_name.contains(exclude));

        if excluded {
            Classification::Preserved
        } else if modified >= threshold {
            Classification::OutOfRange
        } else {
            Classification::Eligible
        }
    }

    /// Walks `root` recursively and deletes (or reports) every eligible file.
    ///
    /// Directories are never removed. Failing deletions are logged and flagged
    /// in the report but don't stop the sweep.
    pub fn sweep(&self, root: &Path, now: SystemTime, log: &mut dyn LogSink) -> RetentionReport {
        self.sweep_with(root, now, log, &mut |path| fs::remove_file(path))
    }

    /// [Self::sweep] deleting eligible files through `remove`.
    pub(crate) fn sweep_with(
        &self,
        root: &Path,
        now: SystemTime,
        log: &mut dyn LogSink,
        remove: &mut dyn FnMut(&Path) -> io::Result<()>,
    ) -> RetentionReport {
        let mut report = RetentionReport::default();

        if !root.is_dir() {
            log.append(&format!(
                "WARNING: {} is not a directory, nothing to recycle",
                root.display()
            ));
            return report;
        }

        let threshold = self.threshold(now);
        log.append(&format!(
            "Recycling {} | Files older than {} days ({}){}",
            root.display(),
            self.days,
            format_time(threshold),
            self.exclude
                .as_deref()
                .map(|e| format!(" | Excluding names with '{e}'"))
                .unwrap_or_default(),
        ));

        for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    log.append(&format!("WARNING: {e}"));
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let modified = entry
                .metadata()
                .map_err(io::Error::from)
                .and_then(|meta| meta.modified());
            let modified = match modified {
                Ok(modified) => modified,
                Err(e) => {
                    log.append(&format!(
                        "WARNING: modification time of {} unknown: {e}",
                        path.display()
                    ));
                    continue;
                }
            };
            report.processed += 1;

            let file_name = entry.file_name().to_string_lossy();
            let shown = format!("{} ({})", path.display(), format_time(modified));
            match self.classify(&file_name, modified, threshold) {
                Classification::Preserved => {
                    report.preserved += 1;
                    if self.report_all {
                        log.append(&format!("Preserved: {}", path.display()));
                    }
                }
                Classification::OutOfRange => {
                    report.out_of_range += 1;
                    if self.report_all {
                        log.append(&format!("Out of range: {shown}"));
                    }
                }
                Classification::Eligible if self.only_report => {
                    report.eligible += 1;
                    log.append(&format!("Skipped (report only): {shown}"));
                }
                Classification::Eligible => {
                    report.eligible += 1;
                    match remove(path) {
                        Ok(()) => {
                            report.removed += 1;
                            log.append(&format!("Removed: {shown}"));
                        }
                        Err(e) => {
                            report.error = true;
                            log::warn!(target: "retention", "Deleting {} failed: {e}", path.display());
                            log.append(&format!(
                                "ERROR: {} could not be removed: {e}",
                                path.display()
                            ));
                        }
                    }
                }
            }
        }

        log.append(&format!(
            "Processed: {} | Preserved: {} | Out of range: {} | Eligible: {} | Removed: {}",
            report.processed,
            report.preserved,
            report.out_of_range,
            report.eligible,
            report.removed,
        ));

        report
    }
}

fn format_time(time: SystemTime) -> String {
    DateTime::<Local>::from(time).format("%Y-%m-%d %H:%M:%S").to_string()
}
