//! Testing utilities for migration development.
//!
//! - [RecordingExecutor] wraps any [Executor] to log every statement it is asked to run and,
//!   optionally, to fail chosen statements.
//! - [sqlite::SqliteTestHarness] runs migration sets against an in-memory SQLite database and
//!   offers schema and ledger assertions.

use crate::error::Error;
use crate::executor::{Cursor, Executor, Value};

#[cfg(feature = "sqlite")]
pub mod sqlite;

/// An [Executor] that records every statement passed through it, in order.
///
/// # Example
///
/// ```
/// use ledger_migrate::testing::RecordingExecutor;
/// use ledger_migrate::{MigrationRunner, MigrationSet, Error};
/// use rusqlite::Connection;
///
/// let mut conn = Connection::open_in_memory().unwrap();
/// let set = MigrationSet::new().with("1", ["CREATE TABLE t (id INTEGER)"]);
///
/// // fail every ledger statement to simulate a store that refuses the bookkeeping table
/// let recorder = RecordingExecutor::new(&mut conn).fail_when(|sql| sql.contains("_migrations"));
/// let mut runner = MigrationRunner::try_new(recorder, set).unwrap();
/// assert_eq!(runner.current_version(), 0);
///
/// let err = runner.migrate().unwrap_err();
/// assert!(matches!(err, Error::Generic(_)));
/// assert!(runner.executor().executed("CREATE TABLE t (id INTEGER)"));
/// ```
pub struct RecordingExecutor<E> {
    inner: E,
    statements: Vec<String>,
    fail_when: Option<Box<dyn Fn(&str) -> bool + Send + Sync>>,
}

impl<E> RecordingExecutor<E> {
    pub fn new(inner: E) -> Self {
        Self {
            inner,
            statements: Vec::new(),
            fail_when: None,
        }
    }

    /// Fail, without forwarding, every statement for which `predicate` returns true.
    /// Failed statements are still recorded.
    pub fn fail_when<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        self.fail_when = Some(Box::new(predicate));
        self
    }

    /// Every statement attempted so far, oldest first.
    pub fn statements(&self) -> &[String] {
        &self.statements
    }

    /// Whether `sql` was attempted, compared verbatim.
    pub fn executed(&self, sql: &str) -> bool {
        self.statements.iter().any(|s| s == sql)
    }

    pub fn clear(&mut self) {
        self.statements.clear();
    }

    pub fn inner(&self) -> &E {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut E {
        &mut self.inner
    }

    pub fn into_inner(self) -> E {
        self.inner
    }
}

impl<E: Executor> Executor for RecordingExecutor<E> {
    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<Cursor, Error> {
        self.statements.push(sql.to_string());
        if let Some(ref predicate) = self.fail_when {
            if predicate(sql) {
                return Err(Error::Generic(format!("injected failure: {}", sql)));
            }
        }
        self.inner.execute(sql, params)
    }
}

impl<E> std::fmt::Debug for RecordingExecutor<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingExecutor")
            .field("statements", &self.statements)
            .field("fail_when", &self.fail_when.is_some())
            .finish()
    }
}
