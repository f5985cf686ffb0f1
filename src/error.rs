//! Error types for txkit.
//!
//! Driver implementations report failures as a boxed [`DriverError`]; the
//! handler wraps them into [`TxError`] variants that say which step failed.

use thiserror::Error;

use crate::scope::TxState;

/// Opaque failure reported by a driver, transaction or row cursor.
pub type DriverError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type for driver capability calls.
pub type DriverResult<T> = std::result::Result<T, DriverError>;

#[derive(Error, Debug)]
pub enum TxError {
    #[error("failed to connect to {host}:{port}/{database} after {attempts} attempts: {source}")]
    ConnectionError {
        host: String,
        port: String,
        database: String,
        attempts: u32,
        #[source]
        source: DriverError,
    },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("transaction already {0}")]
    TransactionStateError(TxState),

    #[error("missing query params")]
    MissingArgsError,

    #[error("IN clause error: {0}")]
    InClauseError(String),

    #[error("failed to begin transaction: {0}")]
    BeginError(#[source] DriverError),

    #[error("Query execution error: {0}")]
    QueryError(#[source] DriverError),

    #[error("Exec error: {0}")]
    ExecError(#[source] DriverError),

    #[error("failed to read result row: {0}")]
    ScanError(#[source] DriverError),

    #[error("failed to decode result set: {0}")]
    DecodeError(#[from] serde_json::Error),

    #[error("{0}")]
    RollbackError(#[source] DriverError),

    #[error("{0}")]
    CommitError(#[source] DriverError),

    /// An operation failed and the rollback attempted afterwards failed too.
    #[error("{cause}; rollback also failed: {rollback}")]
    RollbackFailed {
        #[source]
        cause: Box<TxError>,
        rollback: Box<TxError>,
    },
}

impl TxError {
    /// Whether the error was raised by the scope state check rather than the database.
    pub fn is_state_error(&self) -> bool {
        matches!(self, TxError::TransactionStateError(_))
    }
}

pub type Result<T> = std::result::Result<T, TxError>;
