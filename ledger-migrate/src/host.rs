//! Running migrations as part of a host's activation.
//!
//! A host (a service, an actor, a per-tenant store) owns one storage handle and must not serve
//! requests against a half-migrated schema. [MigratedStore] wraps that handle: activating it
//! builds a runner, runs [MigrationRunner::migrate] to completion once, and only then hands the
//! executor back to the host.
//!
//! The host is responsible for serializing activations of the same storage instance.

use crate::core::MigrationResult;
use crate::error::Error;
use crate::executor::Executor;
use crate::runner::{MigrationRunner, RunnerBuilder};

/// What an activation does when [MigrationRunner::migrate] fails.
/// Configuration errors always fail activation regardless of policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Fail the activation.
    #[default]
    Abort,
    /// Log the error, keep it for inspection, and let the activation succeed.
    LogOnly,
}

/// A storage handle whose migrations ran when it was activated.
///
/// # Example
///
/// ```
/// use ledger_migrate::{FailurePolicy, MigratedStore, MigrationSet, RunnerBuilder};
/// use rusqlite::Connection;
///
/// let set = MigrationSet::new().with("1", ["CREATE TABLE notes (body TEXT)"]);
/// let mut store = MigratedStore::activate(
///     RunnerBuilder::new(set),
///     Connection::open_in_memory().unwrap(),
///     FailurePolicy::Abort,
/// )
/// .unwrap();
///
/// assert_eq!(store.results().len(), 1);
/// store
///     .store()
///     .execute("INSERT INTO notes (body) VALUES ('hello')", [])
///     .unwrap();
/// ```
#[derive(Debug)]
pub struct MigratedStore<E> {
    runner: MigrationRunner<E>,
    results: Vec<MigrationResult>,
    last_error: Option<Error>,
}

impl<E: Executor> MigratedStore<E> {
    pub fn activate(
        builder: RunnerBuilder,
        executor: E,
        policy: FailurePolicy,
    ) -> Result<Self, Error> {
        let mut runner = builder.build(executor)?;
        match runner.migrate() {
            Ok(results) => Ok(Self {
                runner,
                results,
                last_error: None,
            }),
            Err(error) => match policy {
                FailurePolicy::Abort => Err(error),
                FailurePolicy::LogOnly => {
                    #[cfg(feature = "tracing")]
                    tracing::error!(
                        error = %error,
                        current_version = runner.current_version(),
                        "Migrations failed, continuing activation"
                    );
                    let results = match error {
                        Error::Statement { ref results, .. } => results.clone(),
                        _ => vec![],
                    };
                    Ok(Self {
                        runner,
                        results,
                        last_error: Some(error),
                    })
                }
            },
        }
    }
}

impl<E> MigratedStore<E> {
    /// The statement results of this activation's migration run.
    pub fn results(&self) -> &[MigrationResult] {
        &self.results
    }

    /// The migration error swallowed under [FailurePolicy::LogOnly].
    pub fn last_error(&self) -> Option<&Error> {
        self.last_error.as_ref()
    }

    pub fn is_fully_migrated(&self) -> bool {
        self.last_error.is_none()
    }

    pub fn runner(&self) -> &MigrationRunner<E> {
        &self.runner
    }

    pub fn store(&mut self) -> &mut E {
        self.runner.executor_mut()
    }

    pub fn into_inner(self) -> E {
        self.runner.into_executor()
    }
}

#[cfg(all(test, feature = "sqlite"))]
mod tests {
    use super::*;
    use crate::MigrationSet;
    use rusqlite::Connection;

    fn broken_set() -> MigrationSet {
        MigrationSet::new()
            .with("1", ["CREATE TABLE a (id INTEGER)"])
            .with("2", ["CREATE TABLE a (id INTEGER)"])
    }

    #[test]
    fn abort_policy_fails_activation() {
        let err = MigratedStore::activate(
            RunnerBuilder::new(broken_set()),
            Connection::open_in_memory().unwrap(),
            FailurePolicy::default(),
        )
        .unwrap_err();
        assert_eq!(err.failed_version(), Some(2));
    }

    #[test]
    fn log_only_policy_keeps_the_error() {
        let mut store = MigratedStore::activate(
            RunnerBuilder::new(broken_set()),
            Connection::open_in_memory().unwrap(),
            FailurePolicy::LogOnly,
        )
        .unwrap();

        assert!(!store.is_fully_migrated());
        assert_eq!(store.last_error().and_then(Error::failed_version), Some(2));
        assert_eq!(
            store.results().iter().map(|r| r.success).collect::<Vec<_>>(),
            vec![true, false]
        );
        assert_eq!(store.runner().current_version(), 1);

        let count: i64 = store
            .store()
            .query_row("SELECT COUNT(*) FROM a", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn configuration_errors_ignore_policy() {
        let err = MigratedStore::activate(
            RunnerBuilder::new(MigrationSet::new().with("one", ["SELECT 1"])),
            Connection::open_in_memory().unwrap(),
            FailurePolicy::LogOnly,
        )
        .unwrap_err();
        assert_eq!(err.offending_keys(), ["one".to_string()]);
    }

    #[test]
    fn reactivation_is_a_no_op() {
        let set = MigrationSet::new().with("1", ["CREATE TABLE a (id INTEGER)"]);
        let store = MigratedStore::activate(
            RunnerBuilder::new(set.clone()),
            Connection::open_in_memory().unwrap(),
            FailurePolicy::Abort,
        )
        .unwrap();
        let conn = store.into_inner();

        let store =
            MigratedStore::activate(RunnerBuilder::new(set), conn, FailurePolicy::Abort).unwrap();
        assert!(store.results().is_empty());
        assert!(store.is_fully_migrated());
    }
}
