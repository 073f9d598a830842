//! Whole runs over a configuration cascade, without a MySQL server.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use db_backup_lib::backends::database::{
    ConnectionParams, DumpConnector, DumpError, DumpSource, SqlValue,
};
use db_backup_lib::orchestrator::{GroupStatus, Orchestrator, RunOptions};
use tempfile::TempDir;

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Database with the given tables, each with a single row.
#[derive(Clone, Default)]
struct MemoryDatabase {
    tables: Vec<String>,
}

impl DumpSource for MemoryDatabase {
    fn tables(&mut self) -> Result<Vec<String>, DumpError> {
        Ok(self.tables.clone())
    }

    fn create_statement(&mut self, table: &str) -> Result<String, DumpError> {
        Ok(format!("CREATE TABLE `{table}` (`id` int NOT NULL)"))
    }

    fn for_each_row(
        &mut self,
        _table: &str,
        row: &mut dyn FnMut(&[SqlValue]) -> io::Result<()>,
    ) -> Result<(), DumpError> {
        row(&[SqlValue::Int(1)])?;
        Ok(())
    }
}

impl DumpConnector for MemoryDatabase {
    fn connect(&self, _params: &ConnectionParams) -> Result<Box<dyn DumpSource>, DumpError> {
        Ok(Box::new(self.clone()))
    }
}

fn options() -> RunOptions {
    RunOptions {
        echo_summary: false,
        ..RunOptions::default()
    }
}

fn write(path: &Path, content: &str) -> PathBuf {
    fs::write(path, content).unwrap();
    path.to_path_buf()
}

fn files_with_extension(dir: &Path, extension: &str) -> Vec<PathBuf> {
    let mut files: Vec<_> = fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .filter(|path| path.extension().is_some_and(|ext| ext == extension))
        .collect();
    files.sort();
    files
}

fn touch(path: &Path, modified: SystemTime) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    File::create(path).unwrap().set_modified(modified).unwrap();
}

#[test]
fn empty_database_leaves_only_archive() {
    let tmp = TempDir::new().unwrap();
    let backups = tmp.path().join("backups");
    let logs = tmp.path().join("logs");
    let root = write(
        &tmp.path().join(".env"),
        &format!(
            "BACKUP_TYPE=db\nMYSQL_SERVER=localhost\nMYSQL_DATABASE=shop\n\
             MYSQL_USER=backup\nMYSQL_PASSWORD=s3cret\n\
             BACKUP_PATH={}\nLOG_FILE_PATH={}\n",
            backups.display(),
            logs.display()
        ),
    );

    let summary = Orchestrator::new(&root, options())
        .with_connector(Box::new(MemoryDatabase::default()))
        .run()
        .unwrap();

    assert_eq!(summary.group("main").unwrap().status, GroupStatus::Completed);

    let dumps = backups.join("shop");
    assert!(files_with_extension(&dumps, "sql").is_empty());
    let archives = files_with_extension(&dumps, "zip");
    assert_eq!(archives.len(), 1);

    let mut zip = zip::ZipArchive::new(File::open(&archives[0]).unwrap()).unwrap();
    assert_eq!(zip.len(), 1);
    let sql = io::read_to_string(zip.by_index(0).unwrap()).unwrap();
    assert!(!sql.contains("INSERT"));

    let group_log = summary.group("main").unwrap().log_file.clone().unwrap();
    let content = fs::read_to_string(group_log).unwrap();
    assert!(content.contains("Deleting Dump File"));
    assert!(!content.contains("s3cret"));

    // group log and summary log
    assert_eq!(files_with_extension(&logs, "log").len(), 2);
}

#[test]
fn placeholder_main_and_application_group() {
    let tmp = TempDir::new().unwrap();
    let www = tmp.path().join("www");
    fs::create_dir_all(www.join("assets/empty")).unwrap();
    fs::write(www.join("index.php"), "<?php echo 1;").unwrap();
    fs::write(www.join("assets/site.css"), "body {}").unwrap();

    let backups = tmp.path().join("backups");
    let site = write(
        &tmp.path().join("siteA.env"),
        &format!(
            "BACKUP_TYPE=app\nAPP_NAME=site\nAPP_ROOT_PATH={}\nBACKUP_PATH={}\nLOG_FILE_PATH={}\n",
            www.display(),
            backups.display(),
            tmp.path().join("logs").display()
        ),
    );
    let root = write(&tmp.path().join(".env"), &format!("@siteA={}\n", site.display()));

    let summary = Orchestrator::new(&root, options()).run().unwrap();

    assert_eq!(summary.group("main").unwrap().status, GroupStatus::Placeholder);
    assert_eq!(summary.group("siteA").unwrap().status, GroupStatus::Completed);
    assert_eq!(summary.skipped(), 0);

    let archives = files_with_extension(&backups.join("site"), "zip");
    assert_eq!(archives.len(), 1);
    let zip = zip::ZipArchive::new(File::open(&archives[0]).unwrap()).unwrap();
    let mut names: Vec<_> = zip.file_names().collect();
    names.sort();
    assert_eq!(
        names,
        ["assets/", "assets/empty/", "assets/site.css", "index.php"]
    );
}

#[test]
fn recycle_counts_aged_backups() {
    for only_report in [false, true] {
        let tmp = TempDir::new().unwrap();
        let backups = tmp.path().join("backups");
        let logs = tmp.path().join("logs");
        let now = SystemTime::now();
        for name in ["a.zip", "b.zip", "c.zip"] {
            touch(&backups.join(name), now - 8 * DAY);
        }
        for name in ["d.zip", "e.zip"] {
            touch(&backups.join(name), now - DAY);
        }
        let root = write(
            &tmp.path().join(".env"),
            &format!(
                "BACKUP_TYPE=recycle\nMTIME_BKP=7\nMTIME_LOG=7\nONLY_REPORT={}\n\
                 BACKUP_PATH={}\nLOG_FILE_PATH={}\n",
                u8::from(only_report),
                backups.display(),
                logs.display()
            ),
        );

        let summary = Orchestrator::new(&root, options()).run().unwrap();
        let main = summary.group("main").unwrap();
        assert_eq!(main.status, GroupStatus::Completed);

        let content = fs::read_to_string(main.log_file.as_ref().unwrap()).unwrap();
        let remaining = fs::read_dir(&backups).unwrap().count();
        let counts = "Processed: 5 | Preserved: 0 | Out of range: 2 | Eligible: 3";
        if only_report {
            assert!(content.contains(&format!("{counts} | Removed: 0")));
            assert_eq!(remaining, 5);
        } else {
            assert!(content.contains(&format!("{counts} | Removed: 3")));
            assert_eq!(remaining, 2);
        }
    }
}

#[test]
fn failing_groups_do_not_stop_the_run() {
    let tmp = TempDir::new().unwrap();
    let logs = tmp.path().join("logs");
    let www = tmp.path().join("www");
    fs::create_dir_all(&www).unwrap();
    fs::write(www.join("index.html"), "hello").unwrap();

    let invalid = write(
        &tmp.path().join("invalid.env"),
        &format!("BACKUP_TYPE=db\nLOG_FILE_PATH={}\n", logs.display()),
    );
    let app = write(
        &tmp.path().join("app.env"),
        &format!(
            "BACKUP_TYPE=app\nAPP_NAME=www\nAPP_ROOT_PATH={}\nBACKUP_PATH={}\nLOG_FILE_PATH={}\n",
            www.display(),
            tmp.path().join("backups").display(),
            logs.display()
        ),
    );
    let root = write(
        &tmp.path().join(".env"),
        &format!(
            "@missing={}\n@invalid={}\n@app={}\n",
            tmp.path().join("missing.env").display(),
            invalid.display(),
            app.display()
        ),
    );

    let summary = Orchestrator::new(&root, options()).run().unwrap();

    let names: Vec<_> = summary.groups.iter().map(|g| g.name.as_str()).collect();
    assert_eq!(names, ["main", "missing", "invalid", "app"]);

    assert!(matches!(summary.group("missing").unwrap().status, GroupStatus::Skipped(_)));
    let GroupStatus::Skipped(reason) = &summary.group("invalid").unwrap().status else {
        panic!("invalid group must be skipped");
    };
    assert!(reason.contains("MYSQL_DATABASE must be specified"));
    assert!(reason.contains("MYSQL_SERVER must be specified"));
    assert!(reason.contains("BACKUP_PATH must be specified"));
    assert!(summary.group("invalid").unwrap().log_file.is_some());
    assert!(summary.group("missing").unwrap().log_file.is_none());

    assert_eq!(summary.group("app").unwrap().status, GroupStatus::Completed);
    assert_eq!(summary.completed(), 1);
    assert_eq!(summary.skipped(), 2);
}

#[test]
fn invalid_group_records_errors_in_its_log() {
    let tmp = TempDir::new().unwrap();
    let logs = tmp.path().join("logs");
    let site = write(
        &tmp.path().join("site.env"),
        &format!("MYSQL_DATABASE=shop\nLOG_FILE_PATH={}\n", logs.display()),
    );
    let root = write(&tmp.path().join(".env"), &format!("@site={}\n", site.display()));

    let summary = Orchestrator::new(&root, options()).run().unwrap();

    let outcome = summary.group("site").unwrap();
    assert!(matches!(outcome.status, GroupStatus::Skipped(_)));

    let log_file = outcome.log_file.as_ref().unwrap();
    assert!(log_file.starts_with(&logs));
    assert!(log_file
        .file_name()
        .unwrap()
        .to_string_lossy()
        .starts_with("bkp-db-site-"));

    let content = fs::read_to_string(log_file).unwrap();
    assert!(content.contains("ERROR: MYSQL_SERVER must be specified"));
    assert!(content.contains("ERROR: BACKUP_PATH must be specified"));
    assert!(!content.contains("MYSQL_DATABASE must be specified"));
}

#[test]
fn failed_command_is_reported() {
    let tmp = TempDir::new().unwrap();
    let root = write(
        &tmp.path().join(".env"),
        &format!(
            "BACKUP_TYPE=command\nNAME=broken\nCOMMAND=false\n\
             EXECUTION_METHOD=array-capture\nLOG_FILE_PATH={}\n",
            tmp.path().join("logs").display()
        ),
    );

    let summary = Orchestrator::new(&root, options()).run().unwrap();

    assert_eq!(summary.failed(), 1);
    let main = summary.group("main").unwrap();
    assert!(main.log_file.as_ref().unwrap().exists());
}

#[test]
fn missing_root_configuration_aborts() {
    let tmp = TempDir::new().unwrap();

    let result = Orchestrator::new(tmp.path().join(".env"), options()).run();

    assert!(result.is_err());
}

#[test]
fn invalid_root_options_skip_main_only() {
    let tmp = TempDir::new().unwrap();
    let www = tmp.path().join("www");
    fs::create_dir_all(&www).unwrap();
    fs::write(www.join("index.html"), "hello").unwrap();
    let app = write(
        &tmp.path().join("app.env"),
        &format!(
            "BACKUP_TYPE=app\nAPP_NAME=www\nAPP_ROOT_PATH={}\nBACKUP_PATH={}\nLOG_FILE_PATH={}\n",
            www.display(),
            tmp.path().join("backups").display(),
            tmp.path().join("logs").display()
        ),
    );
    let root = write(
        &tmp.path().join(".env"),
        &format!("ONLY_REPORT=maybe\n@app={}\n", app.display()),
    );

    let summary = Orchestrator::new(&root, options()).run().unwrap();

    let GroupStatus::Skipped(reason) = &summary.group("main").unwrap().status else {
        panic!("main must be skipped");
    };
    assert!(reason.contains("not a flag: maybe"));
    assert_eq!(summary.group("app").unwrap().status, GroupStatus::Completed);
}
