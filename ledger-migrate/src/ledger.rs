//! The `_migrations` ledger: one row per version, holding the outcome of its latest attempt.
//!
//! ```sql
//! _migrations(version TEXT PRIMARY KEY, applied_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP, errors TEXT DEFAULT NULL)
//! ```
//!
//! A version counts as applied iff its row exists and `errors IS NULL`. Rows are overwritten
//! with `INSERT OR REPLACE`, never deleted.

use crate::core::{parse_version, FailureRecord};
use crate::error::Error;
use crate::executor::{Executor, Row, Value};
use chrono::{DateTime, NaiveDateTime};
use serde::Serialize;
use std::collections::BTreeSet;

/// A ledger row as read back from the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerEntry {
    pub version: u64,
    /// When the row was last written. `None` if the store returned something unparseable.
    pub applied_at: Option<NaiveDateTime>,
    /// `None` for an applied version, otherwise the recorded failure.
    pub errors: Option<String>,
}

impl LedgerEntry {
    pub fn is_applied(&self) -> bool {
        self.errors.is_none()
    }

    /// The structured failure, when `errors` was written by this crate.
    pub fn failure(&self) -> Option<FailureRecord> {
        self.errors.as_deref().and_then(FailureRecord::parse)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Ledger {
    table: String,
}

impl Ledger {
    pub fn new(table: impl Into<String>) -> Result<Self, Error> {
        let table = table.into();
        if !is_identifier(&table) {
            return Err(Error::configuration(
                format!(
                    "ledger table name '{}' must match [A-Za-z_][A-Za-z0-9_]*",
                    table
                ),
                vec![],
            ));
        }
        Ok(Self { table })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn create<E: Executor + ?Sized>(&self, executor: &mut E) -> Result<(), Error> {
        executor.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {} (version TEXT PRIMARY KEY, applied_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP, errors TEXT DEFAULT NULL)",
                self.table
            ),
            &[],
        )?;
        Ok(())
    }

    /// The version of the most recently written successful row, 0 if there is none.
    /// Rows written within the same timestamp resolve to the higher version. Rows whose version
    /// cannot be read are skipped.
    pub fn load_cursor<E: Executor + ?Sized>(&self, executor: &mut E) -> Result<u64, Error> {
        let cursor = executor.execute(
            &format!(
                "SELECT version FROM {} WHERE errors IS NULL ORDER BY applied_at DESC, CAST(version AS INTEGER) DESC",
                self.table
            ),
            &[],
        )?;
        Ok(cursor
            .rows()
            .iter()
            .find_map(|row| self.readable_version(row))
            .unwrap_or(0))
    }

    pub fn applied_versions<E: Executor + ?Sized>(
        &self,
        executor: &mut E,
    ) -> Result<BTreeSet<u64>, Error> {
        let cursor = executor.execute(
            &format!("SELECT version FROM {} WHERE errors IS NULL", self.table),
            &[],
        )?;
        Ok(cursor
            .rows()
            .iter()
            .filter_map(|row| self.readable_version(row))
            .collect())
    }

    pub fn record_success<E: Executor + ?Sized>(
        &self,
        executor: &mut E,
        version: u64,
    ) -> Result<(), Error> {
        self.write(executor, version, Value::Null)
    }

    pub fn record_failure<E: Executor + ?Sized>(
        &self,
        executor: &mut E,
        version: u64,
        failure: &FailureRecord,
    ) -> Result<(), Error> {
        self.write(executor, version, Value::Text(failure.to_json()?))
    }

    fn write<E: Executor + ?Sized>(
        &self,
        executor: &mut E,
        version: u64,
        errors: Value,
    ) -> Result<(), Error> {
        executor.execute(
            &format!(
                "INSERT OR REPLACE INTO {} (version, errors) VALUES (?1, ?2)",
                self.table
            ),
            &[Value::Text(version.to_string()), errors],
        )?;
        Ok(())
    }

    /// The row's version, or `None` with a warning when another writer left something that is
    /// not a version number.
    fn readable_version(&self, row: &Row) -> Option<u64> {
        let version = version_of(row);
        #[cfg(feature = "tracing")]
        if version.is_none() {
            tracing::warn!(
                ledger = %self.table,
                version = ?row.get("version"),
                "Skipping ledger row with an unreadable version"
            );
        }
        version
    }

    /// Every row with a readable version, ordered by numeric version.
    pub fn entries<E: Executor + ?Sized>(
        &self,
        executor: &mut E,
    ) -> Result<Vec<LedgerEntry>, Error> {
        let cursor = executor.execute(
            &format!(
                "SELECT version, applied_at, errors FROM {} ORDER BY CAST(version AS INTEGER)",
                self.table
            ),
            &[],
        )?;
        cursor
            .rows()
            .iter()
            .filter_map(|row| self.readable_version(row).map(|version| (version, row)))
            .map(|(version, row)| {
                Ok(LedgerEntry {
                    version,
                    applied_at: row.get("applied_at").and_then(parse_timestamp),
                    errors: match row.get("errors") {
                        None | Some(Value::Null) => None,
                        Some(Value::Text(text)) => Some(text.clone()),
                        Some(other) => {
                            return Err(Error::Ledger(format!(
                                "errors column holds a non-text value: {:?}",
                                other
                            )))
                        }
                    },
                })
            })
            .collect()
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

fn version_of(row: &Row) -> Option<u64> {
    match row.get("version") {
        Some(Value::Text(text)) => parse_version(text),
        Some(Value::Integer(number)) => u64::try_from(*number).ok(),
        _ => None,
    }
}

fn parse_timestamp(value: &Value) -> Option<NaiveDateTime> {
    let text = value.as_str()?;
    NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S")
        .ok()
        .or_else(|| {
            DateTime::parse_from_rfc3339(text)
                .ok()
                .map(|date| date.naive_utc())
        })
}
