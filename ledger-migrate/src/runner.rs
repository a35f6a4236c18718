use crate::core::{
    FailureRecord, MigrationPlan, MigrationResult, MigrationSet, PendingPolicy,
    DEFAULT_LEDGER_TABLE_NAME,
};
use crate::error::Error;
use crate::executor::Executor;
use crate::ledger::{Ledger, LedgerEntry};
use std::collections::BTreeSet;
use std::time::{Duration, Instant};

type BootstrapErrorHook = Box<dyn Fn(&Error) + Send + Sync>;
type MigrationStartHook = Box<dyn Fn(u64, usize) + Send + Sync>;
type StatementHook = Box<dyn Fn(&MigrationResult) + Send + Sync>;
type MigrationCompleteHook = Box<dyn Fn(u64, Duration) + Send + Sync>;
type MigrationErrorHook = Box<dyn Fn(u64, &Error) + Send + Sync>;

#[derive(Default)]
struct Hooks {
    on_bootstrap_error: Option<BootstrapErrorHook>,
    on_migration_start: Option<MigrationStartHook>,
    on_statement: Option<StatementHook>,
    on_migration_complete: Option<MigrationCompleteHook>,
    on_migration_error: Option<MigrationErrorHook>,
}

// Hooks are opaque closures; report which ones are set.
impl std::fmt::Debug for Hooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hooks")
            .field("on_bootstrap_error", &self.on_bootstrap_error.is_some())
            .field("on_migration_start", &self.on_migration_start.is_some())
            .field("on_statement", &self.on_statement.is_some())
            .field("on_migration_complete", &self.on_migration_complete.is_some())
            .field("on_migration_error", &self.on_migration_error.is_some())
            .finish()
    }
}

/// Configures a [MigrationRunner] before it touches the store.
///
/// # Example
/// ```
/// use ledger_migrate::{MigrationSet, PendingPolicy, RunnerBuilder};
/// use rusqlite::Connection;
///
/// let set = MigrationSet::new().with("1", ["CREATE TABLE users (id INTEGER PRIMARY KEY)"]);
/// let mut runner = RunnerBuilder::new(set)
///     .with_ledger_table_name("schema_ledger")
///     .with_pending_policy(PendingPolicy::Ledger)
///     .fail_on_bootstrap_error(true)
///     .on_migration_complete(|version, duration| {
///         println!("Migration {} completed in {:?}", version, duration);
///     })
///     .build(Connection::open_in_memory().unwrap())
///     .unwrap();
///
/// assert_eq!(runner.pending_versions(), vec![1]);
/// runner.migrate().unwrap();
/// assert_eq!(runner.current_version(), 1);
/// ```
#[derive(Debug)]
pub struct RunnerBuilder {
    set: MigrationSet,
    ledger_table_name: String,
    pending_policy: PendingPolicy,
    fail_on_bootstrap_error: bool,
    hooks: Hooks,
}

impl RunnerBuilder {
    pub fn new(set: MigrationSet) -> Self {
        Self {
            set,
            ledger_table_name: DEFAULT_LEDGER_TABLE_NAME.to_string(),
            pending_policy: PendingPolicy::default(),
            fail_on_bootstrap_error: false,
            hooks: Hooks::default(),
        }
    }

    /// Set a custom name for the ledger table.
    /// Defaults to "_migrations".
    pub fn with_ledger_table_name(mut self, name: impl Into<String>) -> Self {
        self.ledger_table_name = name.into();
        self
    }

    /// Choose how pending versions are determined. Defaults to [PendingPolicy::Ledger].
    pub fn with_pending_policy(mut self, policy: PendingPolicy) -> Self {
        self.pending_policy = policy;
        self
    }

    /// When true, a ledger that cannot be created or read fails [RunnerBuilder::build] with
    /// [Error::Bootstrap]. When false (the default) the failure is reported through
    /// [RunnerBuilder::on_bootstrap_error] and the runner starts from version 0.
    pub fn fail_on_bootstrap_error(mut self, fail: bool) -> Self {
        self.fail_on_bootstrap_error = fail;
        self
    }

    /// Set a callback to be invoked when the ledger cannot be bootstrapped and the runner
    /// proceeds without it.
    pub fn on_bootstrap_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Error) + Send + Sync + 'static,
    {
        self.hooks.on_bootstrap_error = Some(Box::new(callback));
        self
    }

    /// Set a callback to be invoked when a version starts.
    /// The callback receives the version and the number of statements in its batch.
    pub fn on_migration_start<F>(mut self, callback: F) -> Self
    where
        F: Fn(u64, usize) + Send + Sync + 'static,
    {
        self.hooks.on_migration_start = Some(Box::new(callback));
        self
    }

    /// Set a callback to be invoked with the result of every statement, failed ones included.
    pub fn on_statement<F>(mut self, callback: F) -> Self
    where
        F: Fn(&MigrationResult) + Send + Sync + 'static,
    {
        self.hooks.on_statement = Some(Box::new(callback));
        self
    }

    /// Set a callback to be invoked when every statement of a version succeeded and the
    /// version has been recorded. The callback receives the version and duration.
    pub fn on_migration_complete<F>(mut self, callback: F) -> Self
    where
        F: Fn(u64, Duration) + Send + Sync + 'static,
    {
        self.hooks.on_migration_complete = Some(Box::new(callback));
        self
    }

    /// Set a callback to be invoked when a version fails.
    /// The callback receives the version and the [Error::Statement] about to be returned.
    pub fn on_migration_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(u64, &Error) + Send + Sync + 'static,
    {
        self.hooks.on_migration_error = Some(Box::new(callback));
        self
    }

    /// Validate the migration set, then bootstrap the ledger through `executor`.
    ///
    /// Invalid version keys or an invalid ledger table name fail with
    /// [Error::Configuration] before any statement is issued.
    pub fn build<E: Executor>(self, mut executor: E) -> Result<MigrationRunner<E>, Error> {
        let plan = self.set.validate()?;
        let ledger = Ledger::new(self.ledger_table_name)?;

        let (current_version, applied) = match bootstrap(&ledger, &mut executor) {
            Ok(state) => state,
            Err(error) => {
                let error = Error::Bootstrap(error.to_string());
                if self.fail_on_bootstrap_error {
                    return Err(error);
                }
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    error = %error,
                    ledger = ledger.table(),
                    "Ledger unavailable, assuming no migrations have been applied"
                );
                if let Some(ref callback) = self.hooks.on_bootstrap_error {
                    callback(&error);
                }
                (0, BTreeSet::new())
            }
        };

        #[cfg(feature = "tracing")]
        tracing::debug!(
            current_version = current_version,
            applied = ?applied,
            configured = ?plan.versions().collect::<Vec<_>>(),
            "Migration runner ready"
        );

        Ok(MigrationRunner {
            executor,
            plan,
            ledger,
            pending_policy: self.pending_policy,
            current_version,
            applied,
            hooks: self.hooks,
        })
    }
}

fn bootstrap<E: Executor>(
    ledger: &Ledger,
    executor: &mut E,
) -> Result<(u64, BTreeSet<u64>), Error> {
    ledger.create(executor)?;
    let current_version = ledger.load_cursor(executor)?;
    let applied = ledger.applied_versions(executor)?;
    Ok((current_version, applied))
}

/// Applies the pending versions of a [MigrationSet] through an [Executor], in ascending
/// version order, recording the outcome of each version in the ledger.
///
/// Statements are not wrapped in a transaction: a version whose batch fails halfway keeps the
/// effects of the statements that succeeded, and its ledger row records the failure. The next
/// run retries that version's whole batch from its first statement.
pub struct MigrationRunner<E> {
    executor: E,
    plan: MigrationPlan,
    ledger: Ledger,
    pending_policy: PendingPolicy,
    current_version: u64,
    applied: BTreeSet<u64>,
    hooks: Hooks,
}

impl<E> std::fmt::Debug for MigrationRunner<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationRunner")
            .field("plan", &self.plan)
            .field("ledger", &self.ledger)
            .field("pending_policy", &self.pending_policy)
            .field("current_version", &self.current_version)
            .field("applied", &self.applied)
            .field("hooks", &self.hooks)
            .finish()
    }
}

impl<E: Executor> MigrationRunner<E> {
    /// Build a runner with default options. See [RunnerBuilder] for the rest.
    pub fn try_new(executor: E, set: MigrationSet) -> Result<Self, Error> {
        RunnerBuilder::new(set).build(executor)
    }

    /// Apply every pending version.
    ///
    /// Returns one [MigrationResult] per executed statement. When nothing is pending this
    /// issues no statement at all and returns an empty list, so it is safe to call on every
    /// start-up.
    ///
    /// The first failing statement aborts the whole run: its version is recorded in the
    /// ledger with the failure, no later statement or version is attempted, and the call
    /// returns [Error::Statement] carrying the results gathered so far.
    pub fn migrate(&mut self) -> Result<Vec<MigrationResult>, Error> {
        let pending = self.pending_versions();
        if pending.is_empty() {
            #[cfg(feature = "tracing")]
            tracing::debug!(
                current_version = self.current_version,
                "No pending migrations"
            );
            return Ok(vec![]);
        }

        #[cfg(feature = "tracing")]
        tracing::info!(pending = ?pending, "Applying pending migrations");

        let mut results: Vec<MigrationResult> = Vec::new();
        for batch in self
            .plan
            .batches
            .iter()
            .filter(|batch| pending.binary_search(&batch.version).is_ok())
        {
            let version = batch.version;

            #[cfg(feature = "tracing")]
            let _span = tracing::info_span!("migration_up", version = version).entered();

            #[cfg(feature = "tracing")]
            tracing::info!(statements = batch.queries.len(), "Starting migration");

            if let Some(ref callback) = self.hooks.on_migration_start {
                callback(version, batch.queries.len());
            }

            let migration_start = Instant::now();

            for (index, query) in batch.queries.iter().enumerate() {
                match self.executor.execute(query, &[]) {
                    Ok(cursor) => {
                        let result = MigrationResult::applied(version, query, &cursor);

                        #[cfg(feature = "tracing")]
                        tracing::debug!(
                            query = %query,
                            rows_read = cursor.rows_read(),
                            rows_written = cursor.rows_written(),
                            "Statement applied"
                        );

                        if let Some(ref callback) = self.hooks.on_statement {
                            callback(&result);
                        }
                        results.push(result);
                    }
                    Err(e) => {
                        let message = e.to_string();
                        let result = MigrationResult::failed(version, query, &message);
                        if let Some(ref callback) = self.hooks.on_statement {
                            callback(&result);
                        }
                        results.push(result);

                        let failure = FailureRecord::new(&batch.queries, index, message.clone());
                        if let Err(_record_error) =
                            self.ledger
                                .record_failure(&mut self.executor, version, &failure)
                        {
                            #[cfg(feature = "tracing")]
                            tracing::error!(
                                error = %_record_error,
                                "Could not record migration failure in the ledger"
                            );
                        }
                        self.applied.remove(&version);

                        let error = Error::Statement {
                            version,
                            query: query.clone(),
                            message,
                            results,
                        };

                        #[cfg(feature = "tracing")]
                        tracing::error!(error = %error, "Migration failed");

                        if let Some(ref callback) = self.hooks.on_migration_error {
                            callback(version, &error);
                        }
                        return Err(error);
                    }
                }
            }

            self.ledger.record_success(&mut self.executor, version)?;
            self.applied.insert(version);
            self.current_version = self.current_version.max(version);

            let migration_duration = migration_start.elapsed();

            #[cfg(feature = "tracing")]
            tracing::info!(
                duration_ms = migration_duration.as_millis(),
                "Migration completed successfully"
            );

            if let Some(ref callback) = self.hooks.on_migration_complete {
                callback(version, migration_duration);
            }
        }

        Ok(results)
    }

    /// Every ledger row, ordered by version.
    pub fn history(&mut self) -> Result<Vec<LedgerEntry>, Error> {
        self.ledger.entries(&mut self.executor)
    }
}

impl<E> MigrationRunner<E> {
    /// The cached current version: the latest version recorded as applied, 0 if none.
    pub fn current_version(&self) -> u64 {
        self.current_version
    }

    /// The versions [MigrationRunner::migrate] would apply, in the order it would apply them.
    pub fn pending_versions(&self) -> Vec<u64> {
        self.plan
            .versions()
            .filter(|version| match self.pending_policy {
                PendingPolicy::Ledger => !self.applied.contains(version),
                PendingPolicy::AboveCursor => *version > self.current_version,
            })
            .collect()
    }

    /// Every configured version, ascending.
    pub fn versions(&self) -> Vec<u64> {
        self.plan.versions().collect()
    }

    pub fn pending_policy(&self) -> PendingPolicy {
        self.pending_policy
    }

    pub fn ledger_table_name(&self) -> &str {
        self.ledger.table()
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    pub fn executor_mut(&mut self) -> &mut E {
        &mut self.executor
    }

    pub fn into_executor(self) -> E {
        self.executor
    }
}

#[cfg(all(test, feature = "sqlite"))]
mod tests {
    use super::*;
    use crate::testing::sqlite::SqliteTestHarness;
    use crate::testing::RecordingExecutor;
    use rusqlite::Connection;
    use std::sync::{Arc, Mutex};

    fn e2e_set() -> MigrationSet {
        MigrationSet::new()
            .with("1", ["CREATE TABLE t (id INTEGER)"])
            .with("2", ["ALTER TABLE t ADD COLUMN name TEXT"])
    }

    #[test]
    fn fresh_store_applies_everything_then_nothing() {
        let mut harness = SqliteTestHarness::new();
        let results = harness.migrate(e2e_set()).unwrap();
        assert_eq!(
            results
                .iter()
                .map(|r| (r.version, r.query.as_str(), r.success))
                .collect::<Vec<_>>(),
            vec![
                (1, "CREATE TABLE t (id INTEGER)", true),
                (2, "ALTER TABLE t ADD COLUMN name TEXT", true),
            ]
        );
        assert!(results.iter().all(|r| r.error.is_none() && r.rows_read == Some(0)));
        // the ledger write after version 1 must not leak into the ALTER's count
        assert!(results.iter().all(|r| r.rows_written == Some(0)));

        harness
            .execute("INSERT INTO t (id, name) VALUES (1, 'alice')")
            .unwrap();
        let name: String = harness.query_one("SELECT name FROM t WHERE id = 1").unwrap();
        assert_eq!(name, "alice");

        assert!(harness.migrate(e2e_set()).unwrap().is_empty());
    }

    #[test]
    fn second_run_issues_no_statements() {
        let mut conn = Connection::open_in_memory().unwrap();
        let mut runner =
            MigrationRunner::try_new(RecordingExecutor::new(&mut conn), e2e_set()).unwrap();
        assert_eq!(runner.migrate().unwrap().len(), 2);
        let history = runner.history().unwrap();

        runner.executor_mut().clear();
        assert!(runner.migrate().unwrap().is_empty());
        assert!(runner.executor().statements().is_empty());
        assert_eq!(runner.history().unwrap(), history);
        assert_eq!(runner.current_version(), 2);
    }

    #[test]
    fn versions_apply_in_numeric_order() {
        let mut conn = Connection::open_in_memory().unwrap();
        // string order would be "10", "2", "9"; each step depends on the previous one
        let set = MigrationSet::new()
            .with("10", ["INSERT INTO t (id, name) VALUES (1, 'x')"])
            .with("9", ["ALTER TABLE t ADD COLUMN name TEXT"])
            .with("2", ["CREATE TABLE t (id INTEGER)"]);
        let mut runner = MigrationRunner::try_new(RecordingExecutor::new(&mut conn), set).unwrap();
        runner.executor_mut().clear();

        let results = runner.migrate().unwrap();
        assert_eq!(
            results.iter().map(|r| r.version).collect::<Vec<_>>(),
            vec![2, 9, 10]
        );
        let user_statements: Vec<&String> = runner
            .executor()
            .statements()
            .iter()
            .filter(|sql| !sql.contains("_migrations"))
            .collect();
        assert_eq!(
            user_statements,
            vec![
                "CREATE TABLE t (id INTEGER)",
                "ALTER TABLE t ADD COLUMN name TEXT",
                "INSERT INTO t (id, name) VALUES (1, 'x')",
            ]
        );
        assert_eq!(results[2].rows_written, Some(1));
    }

    #[test]
    fn ordering_ignores_insertion_order() {
        let mut harness = SqliteTestHarness::new();
        let set: MigrationSet = vec![
            ("3", vec!["CREATE TABLE s3 (id INTEGER)"]),
            ("1", vec!["CREATE TABLE s1 (id INTEGER)"]),
            ("2", vec!["CREATE TABLE s2 (id INTEGER)"]),
        ]
        .into_iter()
        .collect();
        let results = harness.migrate(set).unwrap();
        assert_eq!(
            results.iter().map(|r| r.version).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }

    const Q_OK: &str = "INSERT INTO t (id) VALUES (1)";
    const Q_FAIL: &str = "INSERT INTO missing (id) VALUES (2)";
    const Q_FIXED: &str = "INSERT INTO t (id) VALUES (2)";
    const Q_NEVER_RUN: &str = "INSERT INTO t (id) VALUES (3)";
    const Q_LATER: &str = "CREATE TABLE later (id INTEGER)";

    fn batch_set(second: &str) -> MigrationSet {
        MigrationSet::new()
            .with("1", ["CREATE TABLE t (id INTEGER)"])
            .with("2", [Q_OK, second, Q_NEVER_RUN])
            .with("3", [Q_LATER])
    }

    #[test]
    fn failing_statement_aborts_the_run() {
        let mut conn = Connection::open_in_memory().unwrap();
        let mut runner =
            MigrationRunner::try_new(RecordingExecutor::new(&mut conn), batch_set(Q_FAIL))
                .unwrap();

        let err = runner.migrate().unwrap_err();
        let Error::Statement {
            version,
            query,
            message,
            results,
        } = err
        else {
            panic!("expected a statement error");
        };
        assert_eq!(version, 2);
        assert_eq!(query, Q_FAIL);
        assert!(message.contains("no such table: missing"));
        assert_eq!(
            results
                .iter()
                .map(|r| (r.version, r.query.as_str(), r.success))
                .collect::<Vec<_>>(),
            vec![
                (1, "CREATE TABLE t (id INTEGER)", true),
                (2, Q_OK, true),
                (2, Q_FAIL, false),
            ]
        );
        assert_eq!(results[2].error.as_deref(), Some(message.as_str()));
        assert_eq!(results[2].rows_read, None);

        assert!(!runner.executor().executed(Q_NEVER_RUN));
        assert!(!runner.executor().executed(Q_LATER));
        assert_eq!(runner.current_version(), 1);
        assert_eq!(runner.pending_versions(), vec![2, 3]);

        let history = runner.history().unwrap();
        assert_eq!(history.len(), 2);
        assert!(history[0].is_applied());
        let failure = history[1].failure().unwrap();
        assert_eq!(failure.query, Q_FAIL);
        assert_eq!(failure.index, 1);
        assert_eq!(failure.queries, vec![Q_OK, Q_FAIL, Q_NEVER_RUN]);
        assert_eq!(failure.error, message);

        drop(runner);
        let ids: Vec<i64> = conn
            .prepare("SELECT id FROM t")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(ids, vec![1]);
    }

    #[test]
    fn retry_reruns_the_whole_batch_and_clears_the_error() {
        let mut harness = SqliteTestHarness::new();
        let err = harness.migrate(batch_set(Q_FAIL)).unwrap_err();
        assert_eq!(err.failed_version(), Some(2));
        assert!(!harness.ledger_entry(2).unwrap().unwrap().is_applied());

        let results = harness.migrate(batch_set(Q_FIXED)).unwrap();
        assert_eq!(
            results
                .iter()
                .map(|r| (r.version, r.query.as_str()))
                .collect::<Vec<_>>(),
            vec![(2, Q_OK), (2, Q_FIXED), (2, Q_NEVER_RUN), (3, Q_LATER)]
        );
        let entry = harness.ledger_entry(2).unwrap().unwrap();
        assert_eq!(entry.errors, None);
        harness.assert_table_exists("later").unwrap();

        // the first statement ran in both attempts; the batch is not transactional
        let ids: Vec<i64> = harness.query_all("SELECT id FROM t ORDER BY id").unwrap();
        assert_eq!(ids, vec![1, 1, 2, 3]);
    }

    #[test]
    fn only_unapplied_versions_run() {
        let mut harness = SqliteTestHarness::new();
        harness
            .migrate(MigrationSet::new().with("1", ["CREATE TABLE t (id INTEGER)"]))
            .unwrap();

        // version 1 would fail if it ran again
        let set = MigrationSet::new()
            .with("1", ["CREATE TABLE t (id INTEGER)"])
            .with("2", ["CREATE TABLE u (id INTEGER)"])
            .with("3", ["CREATE TABLE v (id INTEGER)"]);
        let results = harness.migrate(set).unwrap();
        assert_eq!(
            results.iter().map(|r| r.version).collect::<Vec<_>>(),
            vec![2, 3]
        );
    }

    #[test]
    fn invalid_keys_fail_before_any_statement() {
        let mut conn = Connection::open_in_memory().unwrap();
        let mut recorder = RecordingExecutor::new(&mut conn);
        let set = MigrationSet::new()
            .with("1", ["CREATE TABLE t (id INTEGER)"])
            .with("2", ["CREATE TABLE u (id INTEGER)"])
            .with("2a", ["CREATE TABLE v (id INTEGER)"]);

        let err = MigrationRunner::try_new(&mut recorder, set).unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
        assert_eq!(err.offending_keys(), ["2a".to_string()]);
        assert!(recorder.statements().is_empty());
    }

    #[test]
    fn invalid_ledger_table_name_is_a_configuration_error() {
        let mut conn = Connection::open_in_memory().unwrap();
        let err = RunnerBuilder::new(e2e_set())
            .with_ledger_table_name("migrations; DROP TABLE t")
            .build(&mut conn)
            .unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
    }

    fn seed_ledger(harness: &mut SqliteTestHarness) {
        // 1 and 3 applied, 2 failed; 3 written last
        harness
            .execute(
                "CREATE TABLE _migrations (version TEXT PRIMARY KEY, applied_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP, errors TEXT DEFAULT NULL);
                 INSERT INTO _migrations VALUES ('1', '2024-01-01 00:00:00', NULL);
                 INSERT INTO _migrations VALUES ('2', '2024-01-02 00:00:00', 'boom');
                 INSERT INTO _migrations VALUES ('3', '2024-01-03 00:00:00', NULL);",
            )
            .unwrap();
    }

    fn gap_set() -> MigrationSet {
        MigrationSet::new()
            .with("1", ["SELECT 1"])
            .with("2", ["CREATE TABLE two (id INTEGER)"])
            .with("3", ["SELECT 3"])
    }

    #[test]
    fn ledger_policy_retries_a_failed_version_below_the_cursor() {
        let mut harness = SqliteTestHarness::new();
        seed_ledger(&mut harness);

        let mut runner = MigrationRunner::try_new(harness.connection(), gap_set()).unwrap();
        assert_eq!(runner.current_version(), 3);
        assert_eq!(runner.pending_versions(), vec![2]);
        let results = runner.migrate().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(runner.current_version(), 3);
        drop(runner);

        harness.assert_table_exists("two").unwrap();
        assert!(harness.ledger_entry(2).unwrap().unwrap().is_applied());
    }

    #[test]
    fn above_cursor_policy_skips_a_failed_version_below_the_cursor() {
        let mut harness = SqliteTestHarness::new();
        seed_ledger(&mut harness);

        let results = harness
            .migrate_with(
                RunnerBuilder::new(gap_set()).with_pending_policy(PendingPolicy::AboveCursor),
            )
            .unwrap();
        assert!(results.is_empty());
        harness.assert_table_not_exists("two").unwrap();
        assert_eq!(
            harness.ledger_entry(2).unwrap().unwrap().errors.as_deref(),
            Some("boom")
        );
    }

    #[test]
    fn above_cursor_policy_applies_newer_versions() {
        let mut harness = SqliteTestHarness::new();
        seed_ledger(&mut harness);
        let set = gap_set().with("4", ["CREATE TABLE four (id INTEGER)"]);
        let results = harness
            .migrate_with(RunnerBuilder::new(set).with_pending_policy(PendingPolicy::AboveCursor))
            .unwrap();
        assert_eq!(
            results.iter().map(|r| r.version).collect::<Vec<_>>(),
            vec![4]
        );
    }

    #[test]
    fn bootstrap_failure_is_recovered_by_default() {
        let mut conn = Connection::open_in_memory().unwrap();
        let reported = Arc::new(Mutex::new(Vec::new()));
        let sink = reported.clone();

        let recorder =
            RecordingExecutor::new(&mut conn).fail_when(|sql| sql.contains("_migrations"));
        let mut runner = RunnerBuilder::new(e2e_set())
            .on_bootstrap_error(move |error| sink.lock().unwrap().push(error.to_string()))
            .build(recorder)
            .unwrap();

        assert_eq!(runner.current_version(), 0);
        assert_eq!(runner.pending_versions(), vec![1, 2]);
        {
            let reported = reported.lock().unwrap();
            assert_eq!(reported.len(), 1);
            assert!(reported[0].starts_with("ledger bootstrap failed: injected failure"));
        }

        // the first statement runs, then recording its success fails
        let err = runner.migrate().unwrap_err();
        assert!(matches!(err, Error::Generic(_)));
        assert!(runner.executor().executed("CREATE TABLE t (id INTEGER)"));
        assert!(!runner.executor().executed("ALTER TABLE t ADD COLUMN name TEXT"));
    }

    #[test]
    fn bootstrap_failure_can_be_fatal() {
        let mut conn = Connection::open_in_memory().unwrap();
        let recorder =
            RecordingExecutor::new(&mut conn).fail_when(|sql| sql.starts_with("CREATE TABLE IF"));
        let err = RunnerBuilder::new(e2e_set())
            .fail_on_bootstrap_error(true)
            .build(recorder)
            .unwrap_err();
        assert!(matches!(err, Error::Bootstrap(_)));
    }

    #[test]
    fn ledger_with_foreign_schema_counts_as_bootstrap_failure() {
        let mut harness = SqliteTestHarness::new();
        harness
            .execute("CREATE TABLE _migrations (version TEXT PRIMARY KEY)")
            .unwrap();
        let err = harness
            .migrate_with(RunnerBuilder::new(e2e_set()).fail_on_bootstrap_error(true))
            .unwrap_err();
        assert!(matches!(err, Error::Bootstrap(ref m) if m.contains("no such column")));
    }

    #[test]
    fn foreign_ledger_rows_do_not_reset_the_ledger() {
        let set = MigrationSet::new().with("1", ["CREATE TABLE t (id INTEGER)"]);
        let mut harness = SqliteTestHarness::new();
        assert_eq!(harness.migrate(set.clone()).unwrap().len(), 1);

        harness
            .execute(
                "INSERT INTO _migrations (version, applied_at) VALUES ('0', '2000-01-01 00:00:00');
                 INSERT INTO _migrations (version, applied_at) VALUES ('first', '2000-01-01 00:00:00');",
            )
            .unwrap();

        assert!(harness.migrate(set.clone()).unwrap().is_empty());
        assert!(harness.ledger_entry(1).unwrap().unwrap().is_applied());
        assert!(harness.ledger_entry(0).unwrap().unwrap().is_applied());

        let runner = RunnerBuilder::new(set)
            .with_pending_policy(PendingPolicy::AboveCursor)
            .build(harness.connection())
            .unwrap();
        assert_eq!(runner.current_version(), 1);
        assert!(runner.pending_versions().is_empty());
    }

    #[test]
    fn version_zero_is_applied_under_the_ledger_policy_only() {
        let set = MigrationSet::new()
            .with("0", ["CREATE TABLE zero (id INTEGER)"])
            .with("1", ["CREATE TABLE one (id INTEGER)"]);

        let mut harness = SqliteTestHarness::new();
        {
            let runner = RunnerBuilder::new(set.clone())
                .with_pending_policy(PendingPolicy::AboveCursor)
                .build(harness.connection())
                .unwrap();
            assert_eq!(runner.pending_versions(), vec![1]);
        }

        let results = harness.migrate(set.clone()).unwrap();
        assert_eq!(
            results.iter().map(|r| r.version).collect::<Vec<_>>(),
            vec![0, 1]
        );
        harness.assert_table_exists("zero").unwrap();
        assert!(harness.migrate(set).unwrap().is_empty());
    }

    #[test]
    fn hooks_observe_the_run() {
        let events = Arc::new(Mutex::new(Vec::<String>::new()));
        let (start, statement, complete, failed) =
            (events.clone(), events.clone(), events.clone(), events.clone());

        let mut harness = SqliteTestHarness::new();
        let builder = RunnerBuilder::new(batch_set(Q_FAIL))
            .on_migration_start(move |version, count| {
                start.lock().unwrap().push(format!("start {} ({})", version, count))
            })
            .on_statement(move |result| {
                statement
                    .lock()
                    .unwrap()
                    .push(format!("statement {} {}", result.version, result.success))
            })
            .on_migration_complete(move |version, _duration| {
                complete.lock().unwrap().push(format!("complete {}", version))
            })
            .on_migration_error(move |version, error| {
                assert!(matches!(error, Error::Statement { .. }));
                failed.lock().unwrap().push(format!("error {}", version))
            });
        harness.migrate_with(builder).unwrap_err();

        assert_eq!(
            *events.lock().unwrap(),
            vec![
                "start 1 (1)",
                "statement 1 true",
                "complete 1",
                "start 2 (3)",
                "statement 2 true",
                "statement 2 false",
                "error 2",
            ]
        );
    }

    #[test]
    fn empty_batch_is_recorded_as_applied() {
        let mut harness = SqliteTestHarness::new();
        let set = MigrationSet::new().with("1", Vec::<String>::new());
        assert!(harness.migrate(set.clone()).unwrap().is_empty());
        assert!(harness.ledger_entry(1).unwrap().unwrap().is_applied());
        assert!(harness.migrate(set).unwrap().is_empty());
    }

    #[test]
    fn custom_ledger_table_name() {
        let mut harness = SqliteTestHarness::new().with_ledger_table_name("schema_ledger");
        harness
            .migrate_with(RunnerBuilder::new(e2e_set()).with_ledger_table_name("schema_ledger"))
            .unwrap();
        harness.assert_table_exists("schema_ledger").unwrap();
        harness.assert_table_not_exists("_migrations").unwrap();
        assert_eq!(harness.ledger().unwrap().len(), 2);
    }

    #[test]
    fn runner_exposes_configuration() {
        let mut conn = Connection::open_in_memory().unwrap();
        let runner = RunnerBuilder::new(e2e_set().with("7", ["SELECT 7"]))
            .with_pending_policy(PendingPolicy::AboveCursor)
            .build(&mut conn)
            .unwrap();
        assert_eq!(runner.versions(), vec![1, 2, 7]);
        assert_eq!(runner.pending_policy(), PendingPolicy::AboveCursor);
        assert_eq!(runner.ledger_table_name(), "_migrations");
        assert!(format!("{:?}", runner).contains("current_version: 0"));
    }
}
