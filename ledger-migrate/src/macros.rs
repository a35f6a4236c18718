//! Convenience macros for defining migration sets.

/// Build a [`MigrationSet`](crate::MigrationSet) from version/statements pairs.
///
/// Versions may be written as integer or string literals; either way they become string keys
/// and are validated when a runner is built.
///
/// # Basic Usage
///
/// ```
/// use ledger_migrate::migration_set;
///
/// let set = migration_set! {
///     1 => ["CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL)"],
///     2 => [
///         "CREATE TABLE posts (id INTEGER PRIMARY KEY, user_id INTEGER, title TEXT)",
///         "CREATE INDEX idx_posts_user ON posts(user_id)",
///     ],
/// };
/// assert_eq!(set.len(), 2);
/// assert_eq!(set.get("2").unwrap().len(), 2);
/// ```
///
/// # String Keys
///
/// Keys copied from existing configuration can stay strings:
///
/// ```
/// use ledger_migrate::{migration_set, MigrationSet};
///
/// let set = migration_set! {
///     "1" => ["CREATE TABLE t (id INTEGER)"],
///     "2" => ["ALTER TABLE t ADD COLUMN name TEXT"],
/// };
/// let same = MigrationSet::new()
///     .with("1", ["CREATE TABLE t (id INTEGER)"])
///     .with("2", ["ALTER TABLE t ADD COLUMN name TEXT"]);
/// assert_eq!(set, same);
/// ```
#[macro_export]
macro_rules! migration_set {
    () => {
        $crate::MigrationSet::new()
    };

    ($($version:literal => [$($query:expr),* $(,)?]),+ $(,)?) => {{
        let mut set = $crate::MigrationSet::new();
        $(
            let queries: ::std::vec::Vec<::std::string::String> =
                ::std::vec![$(::std::string::String::from($query)),*];
            set.insert(::std::string::ToString::to_string(&$version), queries);
        )+
        set
    }};
}
