//! In-process SQL dump writer.

use std::io::{self, Write};
use std::path::PathBuf;

use chrono::Local;
use derive_more::{Display, Error, From};

#[derive(Debug, Display, Error, From)]
/// Errors on producing a database dump.
pub enum DumpError {
    /// Connecting to the database server failed.
    #[display("Connecting to the database failed: {_0}")]
    #[from(ignore)]
    Connection(mysql::Error),
    /// A query on the database failed.
    #[display("Query failed: {_0}")]
    #[from(ignore)]
    Query(mysql::Error),
    /// The server returned no definition for a table.
    #[display("No create statement for table {_0}")]
    #[from(ignore)]
    MissingCreateStatement(#[error(ignore)] String),
    /// The dump command succeeded but no dump file was written.
    #[display("Dump file {} was not created", _0.display())]
    #[from(ignore)]
    Missing(#[error(ignore)] PathBuf),
    /// Writing the dump file failed.
    #[display("Writing the dump failed: {_0}")]
    Io(io::Error),
}

/// A single column value of a row.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Int(i64),
    UInt(u64),
    Float(f64),
    /// Written as quoted string, or hex literal if not UTF-8.
    Bytes(Vec<u8>),
}

impl SqlValue {
    /// SQL literal of the value.
    pub fn literal(&self) -> String {
        match self {
            SqlValue::Null => "NULL".to_string(),
            SqlValue::Int(v) => v.to_string(),
            SqlValue::UInt(v) => v.to_string(),
            SqlValue::Float(v) if v.is_finite() => v.to_string(),
            SqlValue::Float(_) => "NULL".to_string(),
            SqlValue::Bytes(bytes) => match std::str::from_utf8(bytes) {
                Ok(text) => quote(text),
                Err(_) if bytes.is_empty() => "''".to_string(),
                Err(_) => {
                    let hex: String = bytes.iter().map(|b| format!("{b:02X}")).collect();
                    format!("0x{hex}")
                }
            },
        }
    }
}

fn quote(text: &str) -> String {
    let mut quoted = String::with_capacity(text.len() + 2);
    quoted.push('\'');
    for c in text.chars() {
        match c {
            '\0' => quoted.push_str("\\0"),
            '\'' => quoted.push_str("\\'"),
            '"' => quoted.push_str("\\\""),
            '\\' => quoted.push_str("\\\\"),
            '\n' => quoted.push_str("\\n"),
            '\r' => quoted.push_str("\\r"),
            '\t' => quoted.push_str("\\t"),
            '\x08' => quoted.push_str("\\b"),
            '\x1a' => quoted.push_str("\\Z"),
            c => quoted.push(c),
        }
    }
    quoted.push('\'');
    quoted
}

/// Quotes a table name as identifier.
pub fn identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Connection settings of the database to dump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionParams {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: Option<String>,
    pub password: Option<String>,
}

/// Database the dump is read from.
pub trait DumpSource {
    /// Names of the base tables, views are not dumped.
    fn tables(&mut self) -> Result<Vec<String>, DumpError>;

    /// The `CREATE TABLE` statement of `table`.
    fn create_statement(&mut self, table: &str) -> Result<String, DumpError>;

    /// Calls `row` for every row of `table`.
    fn for_each_row(
        &mut self,
        table: &str,
        row: &mut dyn FnMut(&[SqlValue]) -> io::Result<()>,
    ) -> Result<(), DumpError>;
}

/// Opens a [DumpSource], one connection per backup.
pub trait DumpConnector {
    fn connect(&self, params: &ConnectionParams) -> Result<Box<dyn DumpSource>, DumpError>;
}

/// Number of dumped tables and rows.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct DumpStats {
    pub tables: usize,
    pub rows: usize,
}

/// Writes schema and data of every table of `source` to `out`.
///
/// A database without tables results in a dump without any statement
/// besides the session settings.
pub fn write_dump(
    source: &mut dyn DumpSource,
    database: &str,
    out: &mut dyn Write,
) -> Result<DumpStats, DumpError> {
    let mut stats = DumpStats::default();

    writeln!(out, "-- Dump of database {}", identifier(database))?;
    writeln!(out, "-- Created {}", Local::now().format("%Y-%m-%d %H:%M:%S"))?;
    writeln!(out)?;
    writeln!(out, "SET NAMES utf8mb4;")?;
    writeln!(out, "SET FOREIGN_KEY_CHECKS=0;")?;

    for table in source.tables()? {
        log::trace!(target: "backend::db", "Dumping table {table}");
        let create = source.create_statement(&table)?;
        let name = identifier(&table);

        writeln!(out)?;
        writeln!(out, "-- Table structure for {name}")?;
        writeln!(out, "DROP TABLE IF EXISTS {name};")?;
        writeln!(out, "{};", create.trim_end().trim_end_matches(';'))?;

        let mut rows = 0;
        source.for_each_row(&table, &mut |values: &[SqlValue]| {
            let values: Vec<String> = values.iter().map(SqlValue::literal).collect();
            rows += 1;
            writeln!(out, "INSERT INTO {name} VALUES ({});", values.join(","))
        })?;

        stats.tables += 1;
        stats.rows += rows;
    }

    writeln!(out)?;
    writeln!(out, "SET FOREIGN_KEY_CHECKS=1;")?;
    out.flush()?;

    Ok(stats)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// In-memory database for tests.
    #[derive(Clone, Default)]
    pub(crate) struct FakeDatabase {
        pub tables: Vec<(String, String, Vec<Vec<SqlValue>>)>,
    }

    impl FakeDatabase {
        pub(crate) fn with_table(mut self, name: &str, rows: Vec<Vec<SqlValue>>) -> Self {
            let create = format!("CREATE TABLE `{name}` (`id` int NOT NULL, `name` text)");
            self.tables.push((name.to_string(), create, rows));
            self
        }
    }

    impl DumpSource for FakeDatabase {
        fn tables(&mut self) -> Result<Vec<String>, DumpError> {
            Ok(self.tables.iter().map(|(name, _, _)| name.clone()).collect())
        }

        fn create_statement(&mut self, table: &str) -> Result<String, DumpError> {
            self.tables
                .iter()
                .find(|(name, _, _)| name == table)
                .map(|(_, create, _)| create.clone())
                .ok_or_else(|| DumpError::MissingCreateStatement(table.to_string()))
        }

        fn for_each_row(
            &mut self,
            table: &str,
            row: &mut dyn FnMut(&[SqlValue]) -> io::Result<()>,
        ) -> Result<(), DumpError> {
            for (name, _, rows) in &self.tables {
                if name == table {
                    for values in rows {
                        row(values)?;
                    }
                }
            }
            Ok(())
        }
    }

    impl DumpConnector for FakeDatabase {
        fn connect(&self, _params: &ConnectionParams) -> Result<Box<dyn DumpSource>, DumpError> {
            Ok(Box::new(self.clone()))
        }
    }

    fn dump(mut db: FakeDatabase) -> (DumpStats, String) {
        let mut out = Vec::new();
        let stats = write_dump(&mut db, "shop", &mut out).unwrap();
        (stats, String::from_utf8(out).unwrap())
    }

    #[test]
    fn empty_database_has_no_inserts() {
        let (stats, sql) = dump(FakeDatabase::default());

        assert_eq!(stats, DumpStats::default());
        assert!(!sql.contains("INSERT"));
        assert!(!sql.contains("CREATE TABLE"));
        assert!(sql.contains("SET FOREIGN_KEY_CHECKS=1;"));
    }

    #[test]
    fn tables_are_dumped_with_rows() {
        let db = FakeDatabase::default()
            .with_table(
                "customers",
                vec![
                    vec![SqlValue::Int(1), SqlValue::Bytes(b"O'Brien".to_vec())],
                    vec![SqlValue::UInt(2), SqlValue::Null],
                ],
            )
            .with_table("empty", Vec::new());

        let (stats, sql) = dump(db);

        assert_eq!(stats, DumpStats { tables: 2, rows: 2 });
        assert!(sql.contains("DROP TABLE IF EXISTS `customers`;"));
        assert!(sql.contains("CREATE TABLE `customers` (`id` int NOT NULL, `name` text);"));
        assert!(sql.contains("INSERT INTO `customers` VALUES (1,'O\\'Brien');"));
        assert!(sql.contains("INSERT INTO `customers` VALUES (2,NULL);"));
        assert!(!sql.contains("INSERT INTO `empty`"));
    }

    #[test]
    fn literals_are_escaped() {
        assert_eq!(SqlValue::Bytes(b"a\nb\\c".to_vec()).literal(), "'a\\nb\\\\c'");
        assert_eq!(SqlValue::Bytes(vec![0xff, 0x00]).literal(), "0xFF00");
        assert_eq!(SqlValue::Float(1.5).literal(), "1.5");
        assert_eq!(identifier("we`ird"), "`we``ird`");
    }
}
