//! Line oriented `KEY=value` configuration files organised in groups.
//!
//! A configuration file either sets options of the group it is loaded into or
//! declares a reference to another configuration file with `@group=path`.
//! References turn one invocation into a cascade of independent backup targets:
//!
//! ```text
//! # comment
//! BACKUP_TYPE=db
//! @website1=/home/website1/.env-prod
//! ```

pub mod params;

use std::collections::HashMap;
use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

use derive_more::{Display, Error};

pub use params::{BackupType, ParameterError, Parameters};

/// Name of the group the root configuration is loaded into.
pub const MAIN_GROUP: &str = "main";

const REFERENCE_PREFIX: char = '@';

#[derive(Debug, Display, Error)]
/// Errors on loading a configuration file.
pub enum ConfigError {
    /// The configuration file doesn't exist.
    #[display("Configuration file {} doesn't exist", _0.display())]
    NotFound(#[error(ignore)] PathBuf),
    /// The configuration file exists but can't be read.
    #[display("Configuration file {} can't be read: {source}", path.display())]
    Unreadable { path: PathBuf, source: io::Error },
    /// A line is neither blank, a comment nor a `KEY=value` pair.
    #[display("Malformed line {line} in {}: {content:?}", path.display())]
    Malformed {
        path: PathBuf,
        line: usize,
        content: String,
    },
}

/// Options of one named backup target.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigGroup {
    options: HashMap<String, String>,
    filename: Option<PathBuf>,
}

impl ConfigGroup {
    /// Stub group only pointing to the file that holds its options.
    pub fn reference(filename: PathBuf) -> Self {
        Self {
            options: HashMap::new(),
            filename: Some(filename),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }

    pub fn options(&self) -> &HashMap<String, String> {
        &self.options
    }

    /// File the options of a referenced group are loaded from.
    pub fn filename(&self) -> Option<&Path> {
        self.filename.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.options.insert(key.into(), value.into());
    }
}

/// All groups discovered so far, in discovery order with [MAIN_GROUP] first.
#[derive(Debug, Clone)]
pub struct ConfigCascade {
    order: Vec<String>,
    groups: HashMap<String, ConfigGroup>,
}

impl Default for ConfigCascade {
    fn default() -> Self {
        Self::new()
    }
}

enum Entry {
    Option(String, String),
    Reference(String, PathBuf),
}

impl ConfigCascade {
    pub fn new() -> Self {
        let mut groups = HashMap::new();
        groups.insert(MAIN_GROUP.to_string(), ConfigGroup::default());

        Self {
            order: vec![MAIN_GROUP.to_string()],
            groups,
        }
    }

    /// Loads the root configuration into [MAIN_GROUP].
    pub fn load_root(path: &Path) -> Result<Self, ConfigError> {
        let mut cascade = Self::new();
        cascade.load(path, MAIN_GROUP)?;
        Ok(cascade)
    }

    /// Parses `path` and merges its options into the group `group_name`.
    ///
    /// Options already present in the group are overwritten by the file,
    /// nothing is removed. References declared in the file are appended to
    /// the discovery order. On error the cascade is left untouched.
    pub fn load(&mut self, path: &Path, group_name: &str) -> Result<(), ConfigError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(ConfigError::NotFound(path.to_path_buf()))
            }
            Err(source) => {
                return Err(ConfigError::Unreadable {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        log::debug!(target: "config", "Loading {} into group '{group_name}'", path.display());

        let entries = parse(path, &content)?;

        for entry in entries {
            match entry {
                Entry::Option(key, value) => {
                    self.group_mut(group_name).insert(key, value);
                }
                Entry::Reference(name, filename) if name == MAIN_GROUP => {
                    log::warn!(target: "config", "Ignoring reference to the reserved group '{name}': {}", filename.display());
                }
                Entry::Reference(name, filename) => {
                    log::trace!(target: "config", "Found group '{name}' in {}", filename.display());
                    match self.groups.get_mut(&name) {
                        Some(group) => group.filename = Some(filename),
                        None => {
                            self.order.push(name.clone());
                            self.groups.insert(name, ConfigGroup::reference(filename));
                        }
                    }
                }
            }
        }

        Ok(())
    }

    fn group_mut(&mut self, name: &str) -> &mut ConfigGroup {
        if !self.groups.contains_key(name) {
            self.order.push(name.to_string());
        }
        self.groups.entry(name.to_string()).or_default()
    }

    pub fn group(&self, name: &str) -> Option<&ConfigGroup> {
        self.groups.get(name)
    }

    /// Group names in discovery order.
    pub fn names(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

fn parse(path: &Path, content: &str) -> Result<Vec<Entry>, ConfigError> {
    let mut entries = Vec::new();

    for (idx, raw) in content.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let malformed = || ConfigError::Malformed {
            path: path.to_path_buf(),
            line: idx + 1,
            content: raw.to_string(),
        };

        let (key, value) = line.split_once('=').ok_or_else(malformed)?;
        let key = key.trim();
        let value = unquote(value.trim());

        match key.strip_prefix(REFERENCE_PREFIX) {
            Some("") => return Err(malformed()),
            Some(name) => entries.push(Entry::Reference(name.to_string(), value.into())),
            None if key.is_empty() => return Err(malformed()),
            None => entries.push(Entry::Option(key.to_string(), value.to_string())),
        }
    }

    Ok(entries)
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn inline_options_keep_last_duplicate() {
        let tmp = TempDir::new().unwrap();
        let path = write(
            &tmp,
            ".env",
            "MYSQL_SERVER=localhost\n# a comment\n\n  MYSQL_PORT = 3307 \nMYSQL_SERVER=db.internal\n",
        );

        let cascade = ConfigCascade::load_root(&path).unwrap();
        let main = cascade.group(MAIN_GROUP).unwrap();

        assert_eq!(main.options().len(), 2);
        assert_eq!(main.get("MYSQL_SERVER"), Some("db.internal"));
        assert_eq!(main.get("MYSQL_PORT"), Some("3307"));
        assert_eq!(cascade.names(), [MAIN_GROUP]);
    }

    #[test]
    fn reference_creates_stub_group() {
        let tmp = TempDir::new().unwrap();
        let path = write(&tmp, ".env", "@siteA=./siteA.env\nDEBUG=1\n@siteB=/etc/b.env\n");

        let cascade = ConfigCascade::load_root(&path).unwrap();

        assert_eq!(cascade.names(), [MAIN_GROUP, "siteA", "siteB"]);
        let site_a = cascade.group("siteA").unwrap();
        assert!(site_a.is_empty());
        assert_eq!(site_a.filename(), Some(Path::new("./siteA.env")));
        assert_eq!(cascade.group(MAIN_GROUP).unwrap().get("DEBUG"), Some("1"));
    }

    #[test]
    fn loading_referenced_file_merges_into_group() {
        let tmp = TempDir::new().unwrap();
        let site = write(&tmp, "site.env", "APP_NAME=site\n@nested=other.env\n");
        let root = write(&tmp, ".env", &format!("@site={}\n", site.display()));

        let mut cascade = ConfigCascade::load_root(&root).unwrap();
        cascade.load(&site, "site").unwrap();

        let group = cascade.group("site").unwrap();
        assert_eq!(group.get("APP_NAME"), Some("site"));
        assert_eq!(group.filename(), Some(site.as_path()));
        assert_eq!(cascade.names(), [MAIN_GROUP, "site", "nested"]);
    }

    #[test]
    fn values_may_contain_separator_and_quotes() {
        let tmp = TempDir::new().unwrap();
        let path = write(&tmp, ".env", "MYSQL_PASSWORD=\"a=b c\"\nNAME='x'\n");

        let cascade = ConfigCascade::load_root(&path).unwrap();
        let main = cascade.group(MAIN_GROUP).unwrap();
        assert_eq!(main.get("MYSQL_PASSWORD"), Some("a=b c"));
        assert_eq!(main.get("NAME"), Some("x"));
    }

    #[test]
    fn malformed_line_fails_whole_file() {
        let tmp = TempDir::new().unwrap();
        let path = write(&tmp, ".env", "A=1\nnot an option\n");

        let mut cascade = ConfigCascade::new();
        let err = cascade.load(&path, MAIN_GROUP).unwrap_err();

        assert!(matches!(err, ConfigError::Malformed { line: 2, .. }));
        assert!(cascade.group(MAIN_GROUP).unwrap().is_empty());
    }

    #[test]
    fn missing_file_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let err = ConfigCascade::load_root(&tmp.path().join("nope.env")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn directory_is_unreadable() {
        let tmp = TempDir::new().unwrap();
        let err = ConfigCascade::load_root(tmp.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Unreadable { .. }));
    }

    #[test]
    fn main_reference_is_ignored() {
        let tmp = TempDir::new().unwrap();
        let path = write(&tmp, ".env", "@main=/tmp/other.env\n");

        let cascade = ConfigCascade::load_root(&path).unwrap();
        assert_eq!(cascade.group(MAIN_GROUP).unwrap().filename(), None);
        assert_eq!(cascade.len(), 1);
    }
}
