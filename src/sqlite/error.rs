//! SQLite error types.

pub type SqliteResult<T> = Result<T, SqliteError>;

/// SQLite backend errors.
#[derive(Debug)]
pub enum SqliteError {
    /// Error reported by SQLite itself
    Sqlite(rusqlite::Error),
    /// Connection pool error
    Pool(String),
    /// Connection closed
    ConnectionClosed,
    /// The transaction was already committed or rolled back
    TransactionFinished,
}

impl std::fmt::Display for SqliteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqliteError::Sqlite(e) => write!(f, "SQLite error: {}", e),
            SqliteError::Pool(e) => write!(f, "Pool error: {}", e),
            SqliteError::ConnectionClosed => write!(f, "Connection closed"),
            SqliteError::TransactionFinished => write!(f, "Transaction already finished"),
        }
    }
}

impl std::error::Error for SqliteError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SqliteError::Sqlite(e) => Some(e),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for SqliteError {
    fn from(e: rusqlite::Error) -> Self {
        SqliteError::Sqlite(e)
    }
}

impl From<tokio_rusqlite::Error> for SqliteError {
    fn from(e: tokio_rusqlite::Error) -> Self {
        match e {
            tokio_rusqlite::Error::Rusqlite(e) => SqliteError::Sqlite(e),
            tokio_rusqlite::Error::ConnectionClosed => SqliteError::ConnectionClosed,
            other => SqliteError::Pool(other.to_string()),
        }
    }
}
