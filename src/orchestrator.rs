//! Drives one invocation over every group of the configuration cascade.
//!
//! ```text
//! Init -> LoadRoot -> for each group: LoadGroup -> Validate -> Dispatch -> Report -> Done
//! ```
//!
//! A failing group is reported and skipped, it never stops the groups after it.
//! Only a failing root configuration aborts the run.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::Local;

use crate::backends::database::{DumpConnector, MySqlConnector};
use crate::backends::{now_formatted, ArtifactName, BackupError, Job, RunContext, ValidationError};
use crate::config::{ConfigCascade, ConfigError, Parameters, MAIN_GROUP};
use crate::exec::ExecutionMethod;
use crate::runlog::{Echo, LineEnd, LogSink, RunLog};
use crate::util::ensure_dir;

/// Settings of one invocation which are not part of the configuration files.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Name shown in the summary and used for the summary log file.
    pub process_name: String,
    pub line_end: LineEnd,
    /// Overrides `EXECUTION_METHOD` of every group.
    pub execution_method: Option<ExecutionMethod>,
    /// Echo the summary to stdout.
    pub echo_summary: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            process_name: "bkp".to_string(),
            line_end: LineEnd::default(),
            execution_method: None,
            echo_summary: true,
        }
    }
}

/// Final state of one group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupStatus {
    Completed,
    /// The backup ran but failed.
    Failed(String),
    /// The group couldn't be loaded or validated.
    Skipped(String),
    /// The `main` group only references other groups.
    Placeholder,
}

impl fmt::Display for GroupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupStatus::Completed => f.write_str("completed"),
            GroupStatus::Failed(reason) => write!(f, "failed: {reason}"),
            GroupStatus::Skipped(reason) => write!(f, "skipped: {reason}"),
            GroupStatus::Placeholder => f.write_str("no options, skipped"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupOutcome {
    pub name: String,
    pub status: GroupStatus,
    /// Log of the group, if one was opened.
    pub log_file: Option<PathBuf>,
}

impl GroupOutcome {
    fn new(name: &str, status: GroupStatus) -> Self {
        Self {
            name: name.to_string(),
            status,
            log_file: None,
        }
    }
}

/// Outcomes of all groups in processing order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub groups: Vec<GroupOutcome>,
}

impl RunSummary {
    pub fn group(&self, name: &str) -> Option<&GroupOutcome> {
        self.groups.iter().find(|g| g.name == name)
    }

    pub fn completed(&self) -> usize {
        self.count(|s| matches!(s, GroupStatus::Completed))
    }

    pub fn failed(&self) -> usize {
        self.count(|s| matches!(s, GroupStatus::Failed(_)))
    }

    pub fn skipped(&self) -> usize {
        self.count(|s| matches!(s, GroupStatus::Skipped(_)))
    }

    fn count(&self, f: impl Fn(&GroupStatus) -> bool) -> usize {
        self.groups.iter().filter(|g| f(&g.status)).count()
    }
}

/// Runs the backups of every group found through the root configuration.
pub struct Orchestrator {
    config: PathBuf,
    options: RunOptions,
    connector: Box<dyn DumpConnector>,
}

impl Orchestrator {
    pub fn new(config: impl Into<PathBuf>, options: RunOptions) -> Self {
        Self {
            config: config.into(),
            options,
            connector: Box::new(MySqlConnector),
        }
    }

    /// Replaces the connector used for native database dumps.
    pub fn with_connector(mut self, connector: Box<dyn DumpConnector>) -> Self {
        self.connector = connector;
        self
    }

    /// Processes all groups one after another.
    ///
    /// Fails only if the root configuration can't be loaded.
    pub fn run(&self) -> Result<RunSummary, ConfigError> {
        let mut cascade = ConfigCascade::load_root(&self.config)?;

        let main_params = match cascade.group(MAIN_GROUP).map(Parameters::resolve).transpose() {
            Ok(params) => params,
            Err(e) => {
                log::warn!(target: "orchestrator", "Ignoring the options of the root group: {e}");
                None
            }
        };
        // DEBUG of the root group overrides the setting of every group
        let main_debug = main_params.as_ref().and_then(|p| p.debug);

        let mut summary_log = self.summary_log(main_params.as_ref());
        summary_log.append(&format!(
            "Process {} started at {}",
            self.options.process_name,
            now_formatted()
        ));
        log::info!(target: "orchestrator", "Processing {}", self.config.display());

        let mut summary = RunSummary::default();
        let mut next = 0;
        // groups discovered while loading sub-configurations are appended
        while let Some(name) = cascade.names().get(next).cloned() {
            next += 1;

            let outcome = self.process_group(&mut cascade, &name, main_debug);
            summary_log.append(&format!(">>> {name}: {}", outcome.status));
            match &outcome.status {
                GroupStatus::Failed(reason) | GroupStatus::Skipped(reason) => {
                    log::error!(target: "orchestrator", "Group '{name}': {reason}")
                }
                status => log::info!(target: "orchestrator", "Group '{name}': {status}"),
            }
            summary.groups.push(outcome);
        }

        summary_log.append(&format!(
            "Process {} completed at {} | completed: {} | failed: {} | skipped: {}",
            self.options.process_name,
            now_formatted(),
            summary.completed(),
            summary.failed(),
            summary.skipped()
        ));
        if let Err(e) = summary_log.close() {
            log::warn!(target: "orchestrator", "Closing the summary log failed: {e}");
        }

        Ok(summary)
    }

    fn summary_log(&self, main: Option<&Parameters>) -> RunLog {
        let echo = Echo::new(self.options.echo_summary, self.options.line_end);

        let Some(main) = main else {
            return RunLog::echo_only("summary", echo);
        };
        let Some(dir) = &main.log_file_path else {
            return RunLog::echo_only("summary", echo);
        };

        let process = &self.options.process_name;
        let path = ArtifactName::summary(process, &main.name_suffix, &Local::now())
            .path(dir, "log");
        match ensure_dir(dir).and_then(|()| RunLog::create(&path, "summary", echo)) {
            Ok(log) => log,
            Err(e) => {
                log::warn!(target: "orchestrator", "Summary log {} can't be created: {e}", path.display());
                RunLog::echo_only("summary", echo)
            }
        }
    }

    fn process_group(
        &self,
        cascade: &mut ConfigCascade,
        name: &str,
        main_debug: Option<bool>,
    ) -> GroupOutcome {
        // LoadGroup
        if name == MAIN_GROUP {
            if cascade.group(name).is_none_or(|group| group.is_empty()) {
                return GroupOutcome::new(name, GroupStatus::Placeholder);
            }
        } else {
            let filename = cascade
                .group(name)
                .and_then(|group| group.filename())
                .map(Path::to_path_buf);
            let Some(filename) = filename else {
                let status = GroupStatus::Skipped("no configuration file".to_string());
                return GroupOutcome::new(name, status);
            };
            if let Err(e) = cascade.load(&filename, name) {
                return GroupOutcome::new(name, GroupStatus::Skipped(e.to_string()));
            }
        }

        // Validate
        let Some(group) = cascade.group(name) else {
            return GroupOutcome::new(name, GroupStatus::Skipped("unknown group".to_string()));
        };
        let mut params = match Parameters::resolve(group) {
            Ok(params) => params,
            Err(e) => {
                let err = BackupError::ValidationFailed(vec![ValidationError::from(e)]);
                return GroupOutcome::new(name, GroupStatus::Skipped(err.to_string()));
            }
        };
        if let Some(method) = self.options.execution_method {
            params.execution_method = method;
        }
        let job = match Job::from_parameters(name, &params) {
            Ok(job) => job,
            Err(errors) => return self.reject(name, &params, main_debug, errors),
        };

        // Dispatch
        let artifacts = ArtifactName::new(
            job.kind(),
            job.target(),
            &params.name_suffix,
            &Local::now(),
        );
        let (mut log, log_path) = match self.open_group_log(name, &params, &artifacts, main_debug) {
            Ok(opened) => opened,
            Err(reason) => return GroupOutcome::new(name, GroupStatus::Skipped(reason)),
        };

        log.append(&format!(
            ">>> Group Name: {name} | Type: {} | Method: {}",
            job.kind(),
            params.execution_method
        ));
        let ctx = RunContext {
            artifacts,
            method: params.execution_method,
            connector: self.connector.as_ref(),
            now: SystemTime::now(),
        };
        let status = match job.run(&ctx, &mut log) {
            Ok(()) => GroupStatus::Completed,
            Err(e) => GroupStatus::Failed(e.to_string()),
        };

        // Report
        log.append(&format!("The Log file is in: {}", log_path.display()));
        log.append(&format!("Process Completed at {}", now_formatted()));
        if let Err(e) = log.close() {
            log::warn!(target: "orchestrator", "Closing {} failed: {e}", log_path.display());
        }

        GroupOutcome {
            name: name.to_string(),
            status,
            log_file: Some(log_path),
        }
    }

    /// Opens the log of group `name` in its `LOG_FILE_PATH`.
    fn open_group_log(
        &self,
        name: &str,
        params: &Parameters,
        artifacts: &ArtifactName,
        main_debug: Option<bool>,
    ) -> Result<(RunLog, PathBuf), String> {
        let log_dir = params
            .log_file_path
            .as_ref()
            .ok_or_else(|| ValidationError::Missing("LOG_FILE_PATH").to_string())?;
        let log_path = artifacts.path(log_dir, "log");

        let echo = Echo::new(params.debug(main_debug), self.options.line_end);
        let opened = ensure_dir(log_dir).and_then(|()| RunLog::create(&log_path, name, echo));
        match opened {
            Ok(log) => Ok((log, log_path)),
            Err(source) => Err(BackupError::DirectoryCreateFailed {
                path: log_dir.clone(),
                source,
            }
            .to_string()),
        }
    }

    /// Skips a group with invalid options, recording every problem in its log
    /// if `LOG_FILE_PATH` is known.
    fn reject(
        &self,
        name: &str,
        params: &Parameters,
        main_debug: Option<bool>,
        errors: Vec<ValidationError>,
    ) -> GroupOutcome {
        let mut log_file = None;

        if params.log_file_path.is_some() {
            // the target may be missing, the log is named after the group
            let artifacts =
                ArtifactName::new(params.backup_type, name, &params.name_suffix, &Local::now());
            match self.open_group_log(name, params, &artifacts, main_debug) {
                Ok((mut log, log_path)) => {
                    log.append(&format!(
                        ">>> Group Name: {name} | Type: {} | Method: {}",
                        params.backup_type, params.execution_method
                    ));
                    for error in &errors {
                        log.append(&format!("ERROR: {error}"));
                    }
                    log.append(&format!(
                        "Validation failed, group skipped at {}",
                        now_formatted()
                    ));
                    if let Err(e) = log.close() {
                        log::warn!(target: "orchestrator", "Closing {} failed: {e}", log_path.display());
                    }
                    log_file = Some(log_path);
                }
                Err(reason) => log::warn!(target: "orchestrator", "Group '{name}': {reason}"),
            }
        }

        GroupOutcome {
            name: name.to_string(),
            status: GroupStatus::Skipped(BackupError::ValidationFailed(errors).to_string()),
            log_file,
        }
    }
}
