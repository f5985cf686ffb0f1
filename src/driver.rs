//! Driver capability traits.
//!
//! The handler and the establisher only ever talk to these traits, so any
//! backend (the native PostgreSQL and SQLite pools, or the scripted
//! [`stub`](crate::stub) driver) can sit underneath them:
//! - [`Driver`]: an open connection pool (ping, close, begin, query)
//! - [`Transaction`]: an in-flight transaction (exec, query, commit, rollback)
//! - [`RowCursor`]: a forward-only cursor over a result set
//! - [`Connect`]: opens a [`Driver`] from a [`ConnectionDescriptor`]

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;

use smallvec::SmallVec;

use crate::config::ConnectionDescriptor;
use crate::error::DriverResult;
use crate::value::SqlValue;

/// Placeholder syntax expected by a driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindStyle {
    /// `$1, $2, ...` (PostgreSQL)
    Dollar,
    /// `?` (SQLite)
    Question,
}

/// Outcome of a statement that does not return rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecResult {
    pub rows_affected: u64,
    pub last_insert_id: Option<i64>,
}

/// An open connection pool.
pub trait Driver: Send + Sync {
    type Tx: Transaction<Rows = Self::Rows>;
    type Rows: RowCursor;

    /// Placeholder syntax the driver understands.
    fn bind_style(&self) -> BindStyle {
        BindStyle::Dollar
    }

    /// Liveness probe.
    fn ping(&self) -> impl Future<Output = DriverResult<()>> + Send;

    fn close(&self) -> impl Future<Output = DriverResult<()>> + Send;

    fn begin(&self) -> impl Future<Output = DriverResult<Self::Tx>> + Send;

    /// Run a query outside of any transaction.
    fn query(
        &self,
        sql: &str,
        args: &[SqlValue],
    ) -> impl Future<Output = DriverResult<Self::Rows>> + Send;
}

/// An in-flight transaction. Owned by exactly one scope.
pub trait Transaction: Send {
    type Rows: RowCursor;

    fn exec(
        &mut self,
        sql: &str,
        args: &[SqlValue],
    ) -> impl Future<Output = DriverResult<ExecResult>> + Send;

    fn query(
        &mut self,
        sql: &str,
        args: &[SqlValue],
    ) -> impl Future<Output = DriverResult<Self::Rows>> + Send;

    fn commit(&mut self) -> impl Future<Output = DriverResult<()>> + Send;

    fn rollback(&mut self) -> impl Future<Output = DriverResult<()>> + Send;
}

/// Forward-only cursor over a result set.
///
/// Call [`advance`](RowCursor::advance) before every [`scan`](RowCursor::scan).
/// A cursor must be closed (or drained) once the caller is done with it.
pub trait RowCursor: Send {
    fn columns(&self) -> DriverResult<Vec<String>>;

    /// Move to the next row. Returns `false` once the result set is exhausted.
    fn advance(&mut self) -> bool;

    /// Copy the current row into `dest`, one slot per column.
    fn scan(&self, dest: &mut [SqlValue]) -> DriverResult<()>;

    fn close(&mut self) -> DriverResult<()>;
}

/// Opens drivers. Split from [`Driver`] so that connection establishment can
/// be exercised against a scripted opener.
pub trait Connect: Send + Sync {
    type Driver: Driver;

    fn open(
        &self,
        descriptor: &ConnectionDescriptor,
    ) -> impl Future<Output = DriverResult<Self::Driver>> + Send;
}

// ============================================================================
// Buffered cursor
// ============================================================================

/// Cursor misuse errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CursorError {
    Closed,
    NoCurrentRow,
    ColumnCount { expected: usize, got: usize },
}

impl fmt::Display for CursorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CursorError::Closed => write!(f, "cursor is closed"),
            CursorError::NoCurrentRow => write!(f, "scan called without a current row"),
            CursorError::ColumnCount { expected, got } => write!(
                f,
                "expected {} scan destinations, got {}",
                expected, got
            ),
        }
    }
}

impl std::error::Error for CursorError {}

/// A row stored inline for the common case of 16 columns or fewer.
pub type RowValues = SmallVec<[SqlValue; 16]>;

/// A fully buffered result set. Every bundled driver returns this cursor.
#[derive(Debug, Clone, Default)]
pub struct Rows {
    columns: Vec<String>,
    pending: VecDeque<RowValues>,
    current: Option<RowValues>,
    closed: bool,
}

impl Rows {
    pub fn new(columns: Vec<String>, rows: Vec<RowValues>) -> Self {
        Self {
            columns,
            pending: rows.into(),
            current: None,
            closed: false,
        }
    }

    /// Build from plain vectors (handy for stubs and tests).
    pub fn from_vecs(columns: &[&str], rows: Vec<Vec<SqlValue>>) -> Self {
        Self::new(
            columns.iter().map(|c| c.to_string()).collect(),
            rows.into_iter().map(RowValues::from_vec).collect(),
        )
    }

    /// Rows not yet consumed by `advance`.
    pub fn remaining(&self) -> usize {
        self.pending.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl RowCursor for Rows {
    fn columns(&self) -> DriverResult<Vec<String>> {
        if self.closed {
            return Err(CursorError::Closed.into());
        }
        Ok(self.columns.clone())
    }

    fn advance(&mut self) -> bool {
        if self.closed {
            return false;
        }
        self.current = self.pending.pop_front();
        self.current.is_some()
    }

    fn scan(&self, dest: &mut [SqlValue]) -> DriverResult<()> {
        if self.closed {
            return Err(CursorError::Closed.into());
        }
        let row = self.current.as_ref().ok_or(CursorError::NoCurrentRow)?;
        if dest.len() != row.len() {
            return Err(CursorError::ColumnCount {
                expected: row.len(),
                got: dest.len(),
            }
            .into());
        }
        dest.clone_from_slice(row);
        Ok(())
    }

    fn close(&mut self) -> DriverResult<()> {
        self.closed = true;
        self.pending.clear();
        self.current = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Rows {
        Rows::from_vecs(
            &["id", "name"],
            vec![
                vec![SqlValue::Int(1), SqlValue::from("a")],
                vec![SqlValue::Int(2), SqlValue::Null],
            ],
        )
    }

    #[test]
    fn test_cursor_walks_rows_in_order() {
        let mut rows = sample();
        let mut dest = vec![SqlValue::Null; 2];

        assert!(rows.advance());
        rows.scan(&mut dest).unwrap();
        assert_eq!(dest, vec![SqlValue::Int(1), SqlValue::from("a")]);

        assert!(rows.advance());
        rows.scan(&mut dest).unwrap();
        assert_eq!(dest, vec![SqlValue::Int(2), SqlValue::Null]);

        assert!(!rows.advance());
        assert_eq!(rows.remaining(), 0);
    }

    #[test]
    fn test_scan_requires_current_row() {
        let rows = sample();
        let mut dest = vec![SqlValue::Null; 2];
        assert!(rows.scan(&mut dest).is_err());
    }

    #[test]
    fn test_scan_checks_destination_length() {
        let mut rows = sample();
        rows.advance();
        let mut dest = vec![SqlValue::Null; 3];
        let err = rows.scan(&mut dest).unwrap_err();
        assert_eq!(err.to_string(), "expected 2 scan destinations, got 3");
    }

    #[test]
    fn test_closed_cursor() {
        let mut rows = sample();
        rows.close().unwrap();
        assert!(rows.is_closed());
        assert!(!rows.advance());
        assert!(rows.columns().is_err());
    }
}
