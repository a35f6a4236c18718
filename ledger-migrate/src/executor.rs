//! The storage capability the runner drives.
//!
//! The runner never talks to a database driver directly. Everything it does, including its own
//! ledger bookkeeping, goes through [Executor::execute], so any store that can run one SQL
//! statement at a time and report what it touched can host migrations.

use crate::error::Error;
use std::collections::HashMap;

/// A scalar bound as a statement parameter or read back from a result row.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Real(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Blob(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

/// One materialized result row, keyed by column name.
pub type Row = HashMap<String, Value>;

/// The outcome of a single executed statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Cursor {
    rows_read: u64,
    rows_written: u64,
    rows: Vec<Row>,
}

impl Cursor {
    pub fn new(rows_read: u64, rows_written: u64, rows: Vec<Row>) -> Self {
        Self {
            rows_read,
            rows_written,
            rows,
        }
    }

    pub fn rows_read(&self) -> u64 {
        self.rows_read
    }

    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }
}

/// A handle that can run one SQL statement with positional parameters.
///
/// Implementations must report failures (invalid SQL, constraint violations, I/O) as an `Err`
/// from the call that caused them; the runner relies on knowing each statement's outcome before
/// it issues the next one.
pub trait Executor {
    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<Cursor, Error>;
}

impl<E: Executor + ?Sized> Executor for &mut E {
    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<Cursor, Error> {
        (**self).execute(sql, params)
    }
}

impl<E: Executor + ?Sized> Executor for Box<E> {
    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<Cursor, Error> {
        (**self).execute(sql, params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optional_values_map_to_null() {
        assert_eq!(Value::from(None::<String>), Value::Null);
        assert_eq!(Value::from(Some("x")), Value::Text("x".to_string()));
        assert!(Value::from(None::<i64>).is_null());
    }

    #[test]
    fn value_accessors() {
        assert_eq!(Value::Integer(7).as_i64(), Some(7));
        assert_eq!(Value::Text("7".into()).as_i64(), None);
        assert_eq!(Value::Text("seven".into()).as_str(), Some("seven"));
        assert_eq!(Value::Real(1.5).as_str(), None);
    }

    #[test]
    fn boxed_executor_forwards() {
        struct Counting(u64);
        impl Executor for Counting {
            fn execute(&mut self, _sql: &str, _params: &[Value]) -> Result<Cursor, Error> {
                self.0 += 1;
                Ok(Cursor::new(0, self.0, vec![]))
            }
        }

        let mut boxed: Box<dyn Executor> = Box::new(Counting(0));
        boxed.execute("SELECT 1", &[]).unwrap();
        let cursor = boxed.execute("SELECT 1", &[]).unwrap();
        assert_eq!(cursor.rows_written(), 2);
        assert!(cursor.rows().is_empty());
    }
}
