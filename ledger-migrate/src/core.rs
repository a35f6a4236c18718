use crate::error::Error;
use crate::executor::Cursor;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const DEFAULT_LEDGER_TABLE_NAME: &str = "_migrations";

/// The author-supplied migrations: version key to the ordered SQL statements of that version.
///
/// Keys are kept as strings, the way they arrive from configuration (JSON objects, macros,
/// literals). They are validated when a runner is built from the set, see
/// [RunnerBuilder::build](crate::RunnerBuilder::build).
///
/// ```
/// use ledger_migrate::MigrationSet;
///
/// let set = MigrationSet::new()
///     .with("1", ["CREATE TABLE users (id INTEGER PRIMARY KEY)"])
///     .with("2", ["ALTER TABLE users ADD COLUMN email TEXT"]);
/// assert_eq!(set.len(), 2);
///
/// let same = MigrationSet::from_json(
///     r#"{"1": ["CREATE TABLE users (id INTEGER PRIMARY KEY)"],
///         "2": ["ALTER TABLE users ADD COLUMN email TEXT"]}"#,
/// ).unwrap();
/// assert_eq!(set, same);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MigrationSet {
    entries: BTreeMap<String, Vec<String>>,
}

impl MigrationSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a set from a JSON object of `"version": ["statement", ...]`.
    pub fn from_json(json: &str) -> Result<Self, Error> {
        Ok(serde_json::from_str(json)?)
    }

    /// Add (or replace) the statements for a version key, returning the previous statements.
    pub fn insert<K, Q, S>(&mut self, key: K, queries: Q) -> Option<Vec<String>>
    where
        K: Into<String>,
        Q: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.entries
            .insert(key.into(), queries.into_iter().map(Into::into).collect())
    }

    /// Builder-style [MigrationSet::insert].
    pub fn with<K, Q, S>(mut self, key: K, queries: Q) -> Self
    where
        K: Into<String>,
        Q: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.insert(key, queries);
        self
    }

    pub fn get(&self, key: &str) -> Option<&[String]> {
        self.entries.get(key).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries
            .iter()
            .map(|(key, queries)| (key.as_str(), queries.as_slice()))
    }

    /// Check every key and order the batches by numeric version.
    pub(crate) fn validate(&self) -> Result<MigrationPlan, Error> {
        let mut invalid: Vec<String> = Vec::new();
        let mut by_version: BTreeMap<u64, Vec<&String>> = BTreeMap::new();

        for key in self.entries.keys() {
            match parse_version(key) {
                Some(version) => by_version.entry(version).or_default().push(key),
                None => invalid.push(key.clone()),
            }
        }

        if !invalid.is_empty() {
            invalid.sort();
            return Err(Error::configuration(
                format!(
                    "version keys must be non-negative integers, found: {}",
                    invalid.join(", ")
                ),
                invalid,
            ));
        }

        let mut duplicated: Vec<String> = by_version
            .values()
            .filter(|keys| keys.len() > 1)
            .flat_map(|keys| keys.iter().map(|k| (*k).clone()))
            .collect();
        if !duplicated.is_empty() {
            duplicated.sort();
            return Err(Error::configuration(
                format!(
                    "version keys name the same version more than once: {}",
                    duplicated.join(", ")
                ),
                duplicated,
            ));
        }

        let batches = by_version
            .into_iter()
            .map(|(version, keys)| Batch {
                version,
                queries: self.entries[keys[0]].clone(),
            })
            .collect();
        Ok(MigrationPlan { batches })
    }
}

impl<K, Q, S> FromIterator<(K, Q)> for MigrationSet
where
    K: Into<String>,
    Q: IntoIterator<Item = S>,
    S: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, Q)>>(iter: I) -> Self {
        let mut set = MigrationSet::new();
        for (key, queries) in iter {
            set.insert(key, queries);
        }
        set
    }
}

/// Parse a version key: a non-empty run of ASCII digits that fits in a u64.
pub(crate) fn parse_version(key: &str) -> Option<u64> {
    if key.is_empty() || !key.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    key.parse::<u64>().ok()
}

/// The statements of one version.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Batch {
    pub version: u64,
    pub queries: Vec<String>,
}

/// A validated [MigrationSet], batches sorted by ascending version.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct MigrationPlan {
    pub batches: Vec<Batch>,
}

impl MigrationPlan {
    pub fn versions(&self) -> impl Iterator<Item = u64> + '_ {
        self.batches.iter().map(|b| b.version)
    }
}

/// How the runner decides which configured versions still need to run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PendingPolicy {
    /// Every configured version without a ledger row whose `errors` is `NULL`.
    /// A version that failed earlier is retried even when later versions have since succeeded.
    #[default]
    Ledger,
    /// Every configured version above the cached current version.
    /// Cheaper, but a failed version below the current version is never revisited.
    AboveCursor,
}

/// The outcome of one statement run by [MigrationRunner::migrate](crate::MigrationRunner::migrate).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationResult {
    pub version: u64,
    pub query: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows_read: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows_written: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl MigrationResult {
    pub(crate) fn applied(version: u64, query: &str, cursor: &Cursor) -> Self {
        Self {
            version,
            query: query.to_string(),
            success: true,
            rows_read: Some(cursor.rows_read()),
            rows_written: Some(cursor.rows_written()),
            error: None,
        }
    }

    pub(crate) fn failed(version: u64, query: &str, error: &str) -> Self {
        Self {
            version,
            query: query.to_string(),
            success: false,
            rows_read: None,
            rows_written: None,
            error: Some(error.to_string()),
        }
    }
}

/// What gets written to the ledger's `errors` column when a version fails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// The error reported by the store.
    pub error: String,
    /// The statement that failed.
    pub query: String,
    /// Position of the failed statement within its batch.
    pub index: usize,
    /// The whole batch, recorded only when it holds more than one statement.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub queries: Vec<String>,
}

impl FailureRecord {
    pub(crate) fn new(batch: &[String], index: usize, error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            query: batch.get(index).cloned().unwrap_or_default(),
            index,
            queries: if batch.len() > 1 {
                batch.to_vec()
            } else {
                Vec::new()
            },
        }
    }

    pub fn to_json(&self) -> Result<String, Error> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode an `errors` column value. Ledgers written by other tools may hold free text,
    /// which yields `None`.
    pub fn parse(errors: &str) -> Option<Self> {
        serde_json::from_str(errors).ok()
    }
}
