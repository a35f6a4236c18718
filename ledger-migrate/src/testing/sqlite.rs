//! Testing utilities for SQLite: [SqliteTestHarness].

use crate::core::DEFAULT_LEDGER_TABLE_NAME;
use crate::ledger::{Ledger, LedgerEntry};
use crate::{Error, MigrationResult, MigrationSet, RunnerBuilder};
use rusqlite::Connection;

/// A test harness that plays the host: every call to [SqliteTestHarness::migrate] is a fresh
/// activation (new runner, same database), the way an application would run migrations on each
/// start-up.
///
/// # Example
///
/// ```
/// use ledger_migrate::testing::sqlite::SqliteTestHarness;
/// use ledger_migrate::MigrationSet;
///
/// # fn test() -> Result<(), ledger_migrate::Error> {
/// let mut harness = SqliteTestHarness::new();
/// let set = MigrationSet::new()
///     .with("1", ["CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)"])
///     .with("2", ["ALTER TABLE users ADD COLUMN email TEXT"]);
///
/// assert_eq!(harness.migrate(set.clone())?.len(), 2);
/// harness.assert_column_exists("users", "email")?;
///
/// // a second activation has nothing to do
/// assert!(harness.migrate(set)?.is_empty());
/// assert!(harness.ledger()?.iter().all(|entry| entry.is_applied()));
/// # Ok(())
/// # }
/// # test().unwrap();
/// ```
pub struct SqliteTestHarness {
    conn: Connection,
    ledger_table_name: String,
}

impl SqliteTestHarness {
    /// Uses an in-memory SQLite database.
    pub fn new() -> Self {
        let conn = Connection::open_in_memory().expect("Failed to create in-memory test database");
        Self::with_connection(conn)
    }

    /// Create a test harness with a custom SQLite connection.
    /// Useful for testing with file-based databases or custom settings.
    pub fn with_connection(conn: Connection) -> Self {
        Self {
            conn,
            ledger_table_name: DEFAULT_LEDGER_TABLE_NAME.to_string(),
        }
    }

    /// Read the ledger from a table other than `_migrations`.
    /// Runners built through [SqliteTestHarness::migrate_with] must use the same name.
    pub fn with_ledger_table_name(mut self, name: impl Into<String>) -> Self {
        self.ledger_table_name = name.into();
        self
    }

    /// Build a default runner for `set` over this database and run it.
    pub fn migrate(&mut self, set: MigrationSet) -> Result<Vec<MigrationResult>, Error> {
        self.migrate_with(RunnerBuilder::new(set))
    }

    /// Build a runner from `builder` over this database and run it.
    pub fn migrate_with(&mut self, builder: RunnerBuilder) -> Result<Vec<MigrationResult>, Error> {
        builder.build(&mut self.conn)?.migrate()
    }

    /// Execute a SQL statement (for setting up test data).
    pub fn execute(&mut self, sql: &str) -> Result<(), Error> {
        self.conn.execute_batch(sql)?;
        Ok(())
    }

    /// Query a single value from the database.
    pub fn query_one<T>(&mut self, sql: &str) -> Result<T, Error>
    where
        T: rusqlite::types::FromSql,
    {
        let result = self.conn.query_row(sql, [], |row| row.get(0))?;
        Ok(result)
    }

    /// Query all values from a single-column result.
    pub fn query_all<T>(&mut self, sql: &str) -> Result<Vec<T>, Error>
    where
        T: rusqlite::types::FromSql,
    {
        let mut stmt = self.conn.prepare(sql)?;
        let results = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<T>, _>>()?;
        Ok(results)
    }

    /// Every ledger row, ordered by version. Empty if the ledger table does not exist.
    pub fn ledger(&mut self) -> Result<Vec<LedgerEntry>, Error> {
        if !self.table_exists(&self.ledger_table_name)? {
            return Ok(vec![]);
        }
        Ledger::new(self.ledger_table_name.as_str())?.entries(&mut self.conn)
    }

    /// The ledger row for one version.
    pub fn ledger_entry(&mut self, version: u64) -> Result<Option<LedgerEntry>, Error> {
        Ok(self
            .ledger()?
            .into_iter()
            .find(|entry| entry.version == version))
    }

    /// Assert that a table exists in the database.
    pub fn assert_table_exists(&mut self, table_name: &str) -> Result<(), Error> {
        if !self.table_exists(table_name)? {
            return Err(Error::Generic(format!(
                "Table '{}' does not exist",
                table_name
            )));
        }
        Ok(())
    }

    /// Assert that a table does not exist in the database.
    pub fn assert_table_not_exists(&mut self, table_name: &str) -> Result<(), Error> {
        if self.table_exists(table_name)? {
            return Err(Error::Generic(format!("Table '{}' exists", table_name)));
        }
        Ok(())
    }

    /// Assert that a column exists in a table.
    pub fn assert_column_exists(
        &mut self,
        table_name: &str,
        column_name: &str,
    ) -> Result<(), Error> {
        let mut stmt = self
            .conn
            .prepare(&format!("PRAGMA table_info({})", table_name))?;
        let columns = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<Result<Vec<_>, _>>()?;

        if !columns.iter().any(|c| c == column_name) {
            return Err(Error::Generic(format!(
                "Column '{}' does not exist in table '{}'",
                column_name, table_name
            )));
        }
        Ok(())
    }

    /// Get a reference to the underlying connection for advanced usage.
    pub fn connection(&mut self) -> &mut Connection {
        &mut self.conn
    }

    fn table_exists(&self, table_name: &str) -> Result<bool, Error> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
            [table_name],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }
}

impl Default for SqliteTestHarness {
    fn default() -> Self {
        Self::new()
    }
}
