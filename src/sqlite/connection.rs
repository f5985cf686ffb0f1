//! A single SQLite connection.

use tokio_rusqlite::Connection;

use super::error::{SqliteError, SqliteResult};
use super::types::from_value_ref;
use crate::driver::{ExecResult, RowValues, Rows};
use crate::value::SqlValue;

/// A SQLite connection.
pub struct SqliteConnection {
    conn: Connection,
    closed: bool,
    /// Set while a transaction opened on this connection is unfinished
    pub(crate) in_transaction: bool,
}

impl SqliteConnection {
    /// Open a database file, or `:memory:`.
    ///
    /// File databases get WAL journaling and a busy timeout so that readers
    /// do not block the writer.
    pub async fn open(path: &str) -> SqliteResult<Self> {
        let is_memory = path == ":memory:";
        let conn = if is_memory {
            Connection::open_in_memory().await?
        } else {
            Connection::open(path).await?
        };

        if !is_memory {
            conn.call(|c| {
                c.execute_batch(
                    "PRAGMA journal_mode=WAL;
                     PRAGMA synchronous=NORMAL;
                     PRAGMA busy_timeout=5000;
                     PRAGMA foreign_keys=ON;",
                )?;
                Ok(())
            })
            .await?;
        }

        Ok(Self {
            conn,
            closed: false,
            in_transaction: false,
        })
    }

    /// Run a query and buffer the whole result set.
    pub async fn query(&self, sql: &str, params: &[SqlValue]) -> SqliteResult<Rows> {
        if self.closed {
            return Err(SqliteError::ConnectionClosed);
        }

        let sql = sql.to_string();
        let params = params.to_vec();

        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare_cached(&sql)?;
                let columns: Vec<String> =
                    stmt.column_names().iter().map(|s| s.to_string()).collect();

                let params_refs: Vec<&dyn rusqlite::ToSql> =
                    params.iter().map(|p| p as &dyn rusqlite::ToSql).collect();
                let mut rows = stmt.query(params_refs.as_slice())?;

                let mut buffered = Vec::new();
                while let Some(row) = rows.next()? {
                    let mut values = RowValues::with_capacity(columns.len());
                    for i in 0..columns.len() {
                        values.push(from_value_ref(row.get_ref(i)?));
                    }
                    buffered.push(values);
                }

                Ok(Rows::new(columns, buffered))
            })
            .await
            .map_err(SqliteError::from)
    }

    /// Run a statement that returns no rows.
    pub async fn execute(&self, sql: &str, params: &[SqlValue]) -> SqliteResult<ExecResult> {
        if self.closed {
            return Err(SqliteError::ConnectionClosed);
        }

        let sql = sql.to_string();
        let params = params.to_vec();

        self.conn
            .call(move |conn| {
                let params_refs: Vec<&dyn rusqlite::ToSql> =
                    params.iter().map(|p| p as &dyn rusqlite::ToSql).collect();
                let rows_affected = conn.prepare_cached(&sql)?.execute(params_refs.as_slice())?;
                let last_id = conn.last_insert_rowid();
                Ok(ExecResult {
                    rows_affected: rows_affected as u64,
                    last_insert_id: (last_id != 0).then_some(last_id),
                })
            })
            .await
            .map_err(SqliteError::from)
    }

    /// Run one or more statements without parameters.
    pub async fn execute_batch(&self, sql: &str) -> SqliteResult<()> {
        if self.closed {
            return Err(SqliteError::ConnectionClosed);
        }

        let sql = sql.to_string();

        self.conn
            .call(move |conn| {
                conn.execute_batch(&sql)?;
                Ok(())
            })
            .await
            .map_err(SqliteError::from)
    }

    pub async fn close(self) -> SqliteResult<()> {
        self.conn.close().await.map_err(SqliteError::from)
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}
