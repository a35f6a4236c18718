#![cfg_attr(docsrs, feature(doc_cfg))]
//! `ledger-migrate` applies ordered batches of SQL statements to a store exactly once, and
//! remembers what it did in a ledger table that lives in the same store.
//!
//! Core concepts:
//! - A [MigrationSet] maps version keys (`"1"`, `"2"`, ...) to ordered lists of SQL statements.
//!   Versions are applied in ascending numeric order, never in key order.
//! - The ledger (`_migrations` by default) holds one row per attempted version: when it was
//!   applied, or the JSON description of why it failed.
//! - A [MigrationRunner] issues every statement through an [Executor], the only capability it
//!   needs from the store. [rusqlite::Connection] is an executor with the `sqlite` feature.
//!
//! # Example
//!
//! ```
//! use ledger_migrate::{MigrationRunner, MigrationSet};
//! use rusqlite::Connection;
//!
//! let set = MigrationSet::from_json(
//!     r#"{
//!         "1": ["CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL)"],
//!         "2": ["ALTER TABLE users ADD COLUMN email TEXT"]
//!     }"#,
//! )
//! .unwrap();
//!
//! let mut conn = Connection::open_in_memory().unwrap();
//! let mut runner = MigrationRunner::try_new(&mut conn, set.clone()).unwrap();
//! assert_eq!(runner.pending_versions(), vec![1, 2]);
//!
//! let results = runner.migrate().unwrap();
//! assert!(results.iter().all(|r| r.success));
//! assert_eq!(runner.current_version(), 2);
//!
//! // running again on the next start-up is a no-op
//! let mut runner = MigrationRunner::try_new(&mut conn, set).unwrap();
//! assert!(runner.migrate().unwrap().is_empty());
//! ```
//!
//! # Failure model
//!
//! Statements are not wrapped in transactions. The first failing statement stops the run; the
//! failure is written to that version's ledger row and returned as [Error::Statement]. A later
//! run retries the failed version from its first statement, so statements should be written to
//! tolerate re-execution (`IF NOT EXISTS` and friends).
//!
//! # Features
//!
//! - `sqlite` (default): [Executor] for [rusqlite::Connection].
//! - `tracing` (default): spans and events for every run.
//! - `testing`: [testing::RecordingExecutor] and [testing::sqlite::SqliteTestHarness].

mod core;
pub use core::{
    FailureRecord, MigrationResult, MigrationSet, PendingPolicy, DEFAULT_LEDGER_TABLE_NAME,
};

mod error;
pub use error::Error;

mod executor;
pub use executor::{Cursor, Executor, Row, Value};

mod ledger;
pub use ledger::LedgerEntry;

mod runner;
pub use runner::{MigrationRunner, RunnerBuilder};

mod host;
pub use host::{FailurePolicy, MigratedStore};

#[macro_use]
mod macros;

#[cfg(feature = "sqlite")]
#[cfg_attr(docsrs, doc(cfg(feature = "sqlite")))]
pub mod sqlite;

#[cfg(any(test, feature = "testing"))]
#[cfg_attr(docsrs, doc(cfg(feature = "testing")))]
pub mod testing;
