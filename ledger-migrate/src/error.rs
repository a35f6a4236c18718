use crate::core::MigrationResult;

/// Error type for the ledger-migrate crate.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The supplied migration set or runner options are unusable.
    /// Raised while building a runner, before any statement is issued.
    #[error("configuration error: {message}")]
    Configuration {
        message: String,
        /// The offending version keys, sorted. Empty for errors not tied to a key.
        keys: Vec<String>,
    },

    /// The ledger table could not be created or read while building a runner.
    #[error("ledger bootstrap failed: {0}")]
    Bootstrap(String),

    /// A migration statement failed. The failure has already been written to the ledger
    /// (unless writing it failed too, which is logged separately).
    #[error("migration {version} failed on `{query}`: {message}")]
    Statement {
        version: u64,
        query: String,
        message: String,
        /// Every statement result of the aborted run, ending with the failed one.
        results: Vec<MigrationResult>,
    },

    /// The ledger table holds a row this crate cannot interpret.
    #[error("unreadable ledger: {0}")]
    Ledger(String),

    #[cfg(feature = "sqlite")]
    #[error("{0}")]
    Rusqlite(rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Generic(String),
}

impl Error {
    pub(crate) fn configuration(message: impl Into<String>, keys: Vec<String>) -> Self {
        Self::Configuration {
            message: message.into(),
            keys,
        }
    }

    /// The version keys named by a configuration error, if any.
    pub fn offending_keys(&self) -> &[String] {
        match self {
            Self::Configuration { keys, .. } => keys,
            _ => &[],
        }
    }

    /// The version whose statement failed, for statement errors.
    pub fn failed_version(&self) -> Option<u64> {
        match self {
            Self::Statement { version, .. } => Some(*version),
            _ => None,
        }
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for Error {
    fn from(value: rusqlite::Error) -> Self {
        Self::Rusqlite(value)
    }
}

impl From<String> for Error {
    fn from(value: String) -> Self {
        Self::Generic(value)
    }
}
