//! Typed view on the options of a [ConfigGroup].

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use derive_more::{Display, Error};
use serde::de::{self, Deserializer};
use serde::Deserialize;
use serde_json::Value;

use super::ConfigGroup;
use crate::exec::ExecutionMethod;

const DEFAULT_MYSQL_PORT: u16 = 3306;
const DEFAULT_MYSQLDUMP: &str = "mysqldump";

/// Kind of backup performed for a group.
#[derive(Copy, Clone, Debug, Display, Default, PartialEq, Eq)]
pub enum BackupType {
    /// Dump and compress a MySQL database.
    #[default]
    #[display("db")]
    Db,
    /// Compress an application directory.
    #[display("app")]
    App,
    /// Delete aged backups and logs.
    #[display("recycle")]
    Recycle,
    /// Run a free-form command.
    #[display("command")]
    Command,
}

/// The backup type is unknown.
#[derive(Debug, Display, Error)]
#[display("Backup type is unknown: {_0}")]
pub struct UnknownBackupType(#[error(ignore)] String);

impl FromStr for BackupType {
    type Err = UnknownBackupType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "db" => Ok(Self::Db),
            "app" => Ok(Self::App),
            "recycle" => Ok(Self::Recycle),
            "command" | "cmd" => Ok(Self::Command),
            other => Err(UnknownBackupType(other.to_string())),
        }
    }
}

/// Options of a group could not be converted into [Parameters].
#[derive(Debug, Display, Error)]
#[display("Invalid configuration: {_0}")]
pub struct ParameterError(serde_json::Error);

/// Options of one group with defaults applied.
///
/// Empty values are treated like missing ones.
#[derive(Debug, Clone, Deserialize)]
pub struct Parameters {
    #[serde(rename = "BACKUP_TYPE", default, deserialize_with = "parse_or_default")]
    pub backup_type: BackupType,
    #[serde(rename = "EXECUTION_METHOD", default, deserialize_with = "parse_or_default")]
    pub execution_method: ExecutionMethod,

    #[serde(rename = "MYSQL_SERVER", default, deserialize_with = "non_empty")]
    pub mysql_server: Option<String>,
    #[serde(rename = "MYSQL_PORT", default = "default_port", deserialize_with = "port")]
    pub mysql_port: u16,
    #[serde(rename = "MYSQL_DATABASE", default, deserialize_with = "non_empty")]
    pub mysql_database: Option<String>,
    #[serde(rename = "MYSQL_USER", default, deserialize_with = "non_empty")]
    pub mysql_user: Option<String>,
    #[serde(rename = "MYSQL_PASSWORD", default, deserialize_with = "non_empty")]
    pub mysql_password: Option<String>,
    #[serde(
        rename = "MYSQLDUMP_BIN",
        default = "default_mysqldump",
        deserialize_with = "or_default_mysqldump"
    )]
    pub mysqldump_bin: String,

    #[serde(rename = "APP_NAME", default, deserialize_with = "non_empty")]
    pub app_name: Option<String>,
    #[serde(rename = "APP_ROOT_PATH", default, deserialize_with = "non_empty_path")]
    pub app_root_path: Option<PathBuf>,

    #[serde(rename = "COMMAND", default, deserialize_with = "non_empty")]
    pub command: Option<String>,
    #[serde(rename = "NAME", default, deserialize_with = "non_empty")]
    pub name: Option<String>,

    #[serde(rename = "BACKUP_PATH", default, deserialize_with = "non_empty_path")]
    pub backup_path: Option<PathBuf>,
    #[serde(rename = "LOG_FILE_PATH", default, deserialize_with = "non_empty_path")]
    pub log_file_path: Option<PathBuf>,
    #[serde(rename = "NAME_SUFFIX", default)]
    pub name_suffix: String,

    #[serde(rename = "MTIME_BKP", default, deserialize_with = "non_empty")]
    pub mtime_bkp: Option<String>,
    #[serde(rename = "MTIME_LOG", default, deserialize_with = "non_empty")]
    pub mtime_log: Option<String>,
    #[serde(rename = "ONLY_REPORT", default, deserialize_with = "flag")]
    pub only_report: bool,
    #[serde(rename = "REPORT_ALL", default, deserialize_with = "flag")]
    pub report_all: bool,
    #[serde(rename = "EXCLUDE_FILENAMES_WITH", default, deserialize_with = "non_empty")]
    pub exclude_filenames_with: Option<String>,

    /// Debug setting of the group itself, see [Parameters::debug].
    #[serde(rename = "DEBUG", default, deserialize_with = "optional_flag")]
    pub debug: Option<bool>,
}

impl Parameters {
    pub fn resolve(group: &ConfigGroup) -> Result<Self, ParameterError> {
        let map: serde_json::Map<String, Value> = group
            .options()
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();

        serde_json::from_value(Value::Object(map)).map_err(ParameterError)
    }

    /// Effective debug verbosity, `main_debug` takes precedence when set.
    pub fn debug(&self, main_debug: Option<bool>) -> bool {
        main_debug.or(self.debug).unwrap_or(false)
    }
}

fn default_port() -> u16 {
    DEFAULT_MYSQL_PORT
}

fn default_mysqldump() -> String {
    DEFAULT_MYSQLDUMP.to_string()
}

fn non_empty<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    let value = Option::<String>::deserialize(d)?;
    Ok(value.filter(|v| !v.trim().is_empty()))
}

fn non_empty_path<'de, D: Deserializer<'de>>(d: D) -> Result<Option<PathBuf>, D::Error> {
    Ok(non_empty(d)?.map(PathBuf::from))
}

fn or_default_mysqldump<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(non_empty(d)?.unwrap_or_else(default_mysqldump))
}

fn port<'de, D: Deserializer<'de>>(d: D) -> Result<u16, D::Error> {
    match non_empty(d)? {
        None => Ok(DEFAULT_MYSQL_PORT),
        Some(port) => port
            .trim()
            .parse()
            .map_err(|_| de::Error::custom(format!("MYSQL_PORT is not a valid port: {port}"))),
    }
}

fn parse_flag<E: de::Error>(value: &str) -> Result<bool, E> {
    match value.trim().to_ascii_lowercase().as_str() {
        "" | "0" | "false" | "no" | "off" => Ok(false),
        "1" | "true" | "yes" | "on" => Ok(true),
        other => Err(E::custom(format!("not a flag: {other}"))),
    }
}

fn flag<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
    let value = String::deserialize(d)?;
    parse_flag(&value)
}

fn optional_flag<'de, D: Deserializer<'de>>(d: D) -> Result<Option<bool>, D::Error> {
    match non_empty(d)? {
        None => Ok(None),
        Some(value) => parse_flag(&value).map(Some),
    }
}

fn parse_or_default<'de, D, T>(d: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr + Default,
    T::Err: fmt::Display,
{
    match non_empty(d)? {
        None => Ok(T::default()),
        Some(value) => value.trim().parse().map_err(de::Error::custom),
    }
}
