//! [DumpSource] reading a MySQL server with the `mysql` driver.

use std::io;

use mysql::prelude::Queryable;
use mysql::{Conn, OptsBuilder, Value};

use super::dump::{identifier, ConnectionParams, DumpConnector, DumpError, DumpSource, SqlValue};

/// Connects to MySQL servers over TCP.
#[derive(Debug, Default, Clone, Copy)]
pub struct MySqlConnector;

impl DumpConnector for MySqlConnector {
    fn connect(&self, params: &ConnectionParams) -> Result<Box<dyn DumpSource>, DumpError> {
        log::debug!(
            target: "backend::db",
            "Connecting to {}@{}:{}/{}",
            params.user.as_deref().unwrap_or("<anonymous>"),
            params.host,
            params.port,
            params.database
        );

        let opts = OptsBuilder::new()
            .ip_or_hostname(Some(params.host.clone()))
            .tcp_port(params.port)
            .db_name(Some(params.database.clone()))
            .user(params.user.clone())
            .pass(params.password.clone());
        let conn = Conn::new(opts).map_err(DumpError::Connection)?;

        Ok(Box::new(MySqlSource { conn }))
    }
}

struct MySqlSource {
    conn: Conn,
}

impl DumpSource for MySqlSource {
    fn tables(&mut self) -> Result<Vec<String>, DumpError> {
        let tables: Vec<(String, String)> = self
            .conn
            .query("SHOW FULL TABLES WHERE Table_type = 'BASE TABLE'")
            .map_err(DumpError::Query)?;

        Ok(tables.into_iter().map(|(name, _)| name).collect())
    }

    fn create_statement(&mut self, table: &str) -> Result<String, DumpError> {
        let create: Option<(String, String)> = self
            .conn
            .query_first(format!("SHOW CREATE TABLE {}", identifier(table)))
            .map_err(DumpError::Query)?;

        create
            .map(|(_, statement)| statement)
            .ok_or_else(|| DumpError::MissingCreateStatement(table.to_string()))
    }

    fn for_each_row(
        &mut self,
        table: &str,
        row: &mut dyn FnMut(&[SqlValue]) -> io::Result<()>,
    ) -> Result<(), DumpError> {
        let result = self
            .conn
            .query_iter(format!("SELECT * FROM {}", identifier(table)))
            .map_err(DumpError::Query)?;

        for values in result {
            let values: Vec<SqlValue> = values
                .map_err(DumpError::Query)?
                .unwrap() // column values of the row
                .into_iter()
                .map(sql_value)
                .collect();
            row(&values)?;
        }

        Ok(())
    }
}

fn sql_value(value: Value) -> SqlValue {
    match value {
        Value::NULL => SqlValue::Null,
        Value::Bytes(bytes) => SqlValue::Bytes(bytes),
        Value::Int(v) => SqlValue::Int(v),
        Value::UInt(v) => SqlValue::UInt(v),
        Value::Float(v) => SqlValue::Float(f64::from(v)),
        Value::Double(v) => SqlValue::Float(v),
        Value::Date(year, month, day, hour, minute, second, micros) => {
            let mut date =
                format!("{year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}");
            if micros > 0 {
                date.push_str(&format!(".{micros:06}"));
            }
            SqlValue::Bytes(date.into_bytes())
        }
        Value::Time(negative, days, hours, minutes, seconds, micros) => {
            let sign = if negative { "-" } else { "" };
            let hours = days * 24 + u32::from(hours);
            let mut time = format!("{sign}{hours:02}:{minutes:02}:{seconds:02}");
            if micros > 0 {
                time.push_str(&format!(".{micros:06}"));
            }
            SqlValue::Bytes(time.into_bytes())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temporal_values_become_strings() {
        assert_eq!(
            sql_value(Value::Date(2024, 2, 29, 13, 5, 0, 0)).literal(),
            "'2024-02-29 13:05:00'"
        );
        assert_eq!(
            sql_value(Value::Time(true, 1, 2, 3, 4, 500)).literal(),
            "'-26:03:04.000500'"
        );
    }

    #[test]
    fn scalar_values_keep_their_type() {
        assert_eq!(sql_value(Value::NULL), SqlValue::Null);
        assert_eq!(sql_value(Value::Int(-3)), SqlValue::Int(-3));
        assert_eq!(sql_value(Value::Double(0.25)), SqlValue::Float(0.25));
    }
}
