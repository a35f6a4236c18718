//! [Executor] for [rusqlite::Connection].
//!
//! # Example
//!
//! ```
//! use ledger_migrate::{Executor, MigrationRunner, MigrationSet, Value};
//! use rusqlite::Connection;
//!
//! let mut conn = Connection::open_in_memory().unwrap();
//! let set = MigrationSet::new()
//!     .with("1", ["CREATE TABLE t (id INTEGER)"])
//!     .with("2", ["ALTER TABLE t ADD COLUMN name TEXT"]);
//!
//! // the runner can borrow the connection...
//! let results = MigrationRunner::try_new(&mut conn, set).unwrap().migrate().unwrap();
//! assert_eq!(results.len(), 2);
//!
//! // ...and the same capability is available to application code afterwards.
//! let cursor = Executor::execute(
//!     &mut conn,
//!     "INSERT INTO t (id, name) VALUES (?1, ?2)",
//!     &[Value::Integer(1), "alice".into()],
//! )
//! .unwrap();
//! assert_eq!(cursor.rows_written(), 1);
//! ```

use crate::error::Error;
use crate::executor::{Cursor, Executor, Row, Value};
use rusqlite::types::{ToSqlOutput, ValueRef};
use rusqlite::{Connection, ToSql};

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::Borrowed(match self {
            Value::Null => ValueRef::Null,
            Value::Integer(i) => ValueRef::Integer(*i),
            Value::Real(f) => ValueRef::Real(*f),
            Value::Text(s) => ValueRef::Text(s.as_bytes()),
            Value::Blob(b) => ValueRef::Blob(b),
        }))
    }
}

impl From<ValueRef<'_>> for Value {
    fn from(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(i) => Value::Integer(i),
            ValueRef::Real(f) => Value::Real(f),
            ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(b) => Value::Blob(b.to_vec()),
        }
    }
}

impl Executor for Connection {
    /// Statements without result columns are run once. Statements with result columns are
    /// stepped to completion and report the row count as rows read. Rows written is the growth
    /// of the connection's total change counter across the statement, so DDL reports 0.
    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<Cursor, Error> {
        let before = total_changes(self)?;
        let mut stmt = self.prepare(sql)?;
        let columns: Vec<String> = stmt
            .column_names()
            .into_iter()
            .map(String::from)
            .collect();

        if columns.is_empty() {
            stmt.execute(rusqlite::params_from_iter(params))?;
            drop(stmt);
            let written = total_changes(self)?.saturating_sub(before);
            return Ok(Cursor::new(0, written, vec![]));
        }

        let mut materialized: Vec<Row> = Vec::new();
        {
            let mut rows = stmt.query(rusqlite::params_from_iter(params))?;
            while let Some(row) = rows.next()? {
                let mut record = Row::with_capacity(columns.len());
                for (index, name) in columns.iter().enumerate() {
                    record.insert(name.clone(), Value::from(row.get_ref(index)?));
                }
                materialized.push(record);
            }
        }
        drop(stmt);
        let written = total_changes(self)?.saturating_sub(before);
        Ok(Cursor::new(materialized.len() as u64, written, materialized))
    }
}

fn total_changes(conn: &Connection) -> Result<u64, Error> {
    let count: i64 = conn.query_row("SELECT total_changes()", [], |row| row.get(0))?;
    Ok(u64::try_from(count).unwrap_or(0))
}
