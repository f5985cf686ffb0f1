//! Transaction handler.
//!
//! Every operation takes the caller's [`TxScope`]. The first operation on a
//! fresh scope begins the transaction; later operations reuse it until the
//! caller commits. A failed operation rolls the transaction back and leaves
//! the scope dead, so every later call on it fails without reaching the
//! database.
//!
//! ```no_run
//! # async fn demo() -> txkit::Result<()> {
//! use txkit::{args, ConnectionDescriptor, TxHandler};
//!
//! let descriptor = ConnectionDescriptor::sqlite(":memory:");
//! let handler = TxHandler::new(txkit::connect(&descriptor).await?);
//! let mut scope = handler.scope();
//! handler
//!     .execute(&mut scope, "update users set email = ? where name = ?", &args!["d@x", "david"])
//!     .await?;
//! handler.commit(&mut scope).await?;
//! # Ok(())
//! # }
//! ```

use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::driver::{Driver, ExecResult, Transaction};
use crate::error::{Result, TxError};
use crate::in_clause::{in_clause_query_with, rebind, InArg};
use crate::materialize;
use crate::scope::{ScopeState, TxScope, TxState};
use crate::value::SqlValue;

/// Runs queries and statements inside the transaction carried by a scope.
#[derive(Debug, Clone)]
pub struct TxHandler<D> {
    driver: D,
}

impl<D: Driver> TxHandler<D> {
    pub fn new(driver: D) -> Self {
        Self { driver }
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn into_inner(self) -> D {
        self.driver
    }

    /// A fresh scope for one unit of work.
    pub fn scope(&self) -> TxScope<D::Tx> {
        TxScope::new()
    }

    /// Return the scope's transaction, beginning it on first use.
    pub async fn get_or_begin<'s>(&self, scope: &'s mut TxScope<D::Tx>) -> Result<&'s mut D::Tx> {
        ensure_usable(scope)?;
        if let ScopeState::Unstarted = scope.state {
            let tx = self.driver.begin().await.map_err(TxError::BeginError)?;
            debug!("transaction begun");
            scope.state = ScopeState::Active(tx);
        }
        let state = scope.state();
        match &mut scope.state {
            ScopeState::Active(tx) => Ok(tx),
            _ => Err(TxError::TransactionStateError(state)),
        }
    }

    /// Run `query` and decode every result row into `T` (usually `Vec<Row>`).
    pub async fn select<T: DeserializeOwned>(
        &self,
        scope: &mut TxScope<D::Tx>,
        query: &str,
        args: &[SqlValue],
    ) -> Result<T> {
        ensure_usable(scope)?;
        let sql = rebind(self.driver.bind_style(), query);
        self.select_prepared(scope, &sql, args).await
    }

    /// Like [`select`](Self::select), but the query's placeholder takes the
    /// whole argument list (`where id in (?)`). An empty list rolls the
    /// transaction back and fails with [`TxError::MissingArgsError`].
    pub async fn select_in<T: DeserializeOwned>(
        &self,
        scope: &mut TxScope<D::Tx>,
        query: &str,
        args: &[SqlValue],
    ) -> Result<T> {
        ensure_usable(scope)?;
        let (sql, flat) = match self.expand_list(query, args) {
            Ok(prepared) => prepared,
            Err(err) => return Err(self.abort(scope, err).await),
        };
        self.select_prepared(scope, &sql, &flat).await
    }

    /// Run a statement that returns no rows. Each argument binds to its own
    /// placeholder.
    pub async fn execute(
        &self,
        scope: &mut TxScope<D::Tx>,
        query: &str,
        args: &[SqlValue],
    ) -> Result<ExecResult> {
        ensure_usable(scope)?;
        let sql = rebind(self.driver.bind_style(), query);
        self.execute_prepared(scope, &sql, args).await
    }

    /// IN-clause variant of [`execute`](Self::execute).
    pub async fn execute_in(
        &self,
        scope: &mut TxScope<D::Tx>,
        query: &str,
        args: &[SqlValue],
    ) -> Result<ExecResult> {
        ensure_usable(scope)?;
        let (sql, flat) = match self.expand_list(query, args) {
            Ok(prepared) => prepared,
            Err(err) => return Err(self.abort(scope, err).await),
        };
        self.execute_prepared(scope, &sql, &flat).await
    }

    /// Commit the scope's transaction.
    ///
    /// A failed commit is returned as is and leaves the scope active, so the
    /// caller may still roll back. Committing a scope that never began a
    /// transaction does nothing and finishes the scope.
    pub async fn commit(&self, scope: &mut TxScope<D::Tx>) -> Result<()> {
        ensure_usable(scope)?;
        if let ScopeState::Active(tx) = &mut scope.state {
            tx.commit().await.map_err(TxError::CommitError)?;
            debug!("transaction committed");
        }
        scope.finish(ScopeState::Committed);
        Ok(())
    }

    /// Roll back the scope's transaction and mark the scope rolled back.
    ///
    /// The scope is dead afterwards even when the rollback itself fails.
    pub async fn rollback(&self, scope: &mut TxScope<D::Tx>) -> Result<()> {
        ensure_usable(scope)?;
        match scope.finish(ScopeState::RolledBack) {
            Some(mut tx) => {
                tx.rollback().await.map_err(TxError::RollbackError)?;
                debug!("transaction rolled back");
                Ok(())
            }
            None => Ok(()),
        }
    }

    async fn select_prepared<T: DeserializeOwned>(
        &self,
        scope: &mut TxScope<D::Tx>,
        sql: &str,
        args: &[SqlValue],
    ) -> Result<T> {
        let tx = self.get_or_begin(scope).await?;
        let mut rows = match tx.query(sql, args).await {
            Ok(rows) => rows,
            Err(err) => return Err(self.abort(scope, TxError::QueryError(err)).await),
        };

        let decoded = materialize::drain(&mut rows)
            .map_err(TxError::ScanError)
            .and_then(materialize::decode::<T>);
        match decoded {
            Ok(out) => Ok(out),
            Err(err) => Err(self.abort(scope, err).await),
        }
    }

    async fn execute_prepared(
        &self,
        scope: &mut TxScope<D::Tx>,
        sql: &str,
        args: &[SqlValue],
    ) -> Result<ExecResult> {
        let tx = self.get_or_begin(scope).await?;
        match tx.exec(sql, args).await {
            Ok(result) => Ok(result),
            Err(err) => Err(self.abort(scope, TxError::ExecError(err)).await),
        }
    }

    fn expand_list(&self, query: &str, args: &[SqlValue]) -> Result<(String, Vec<SqlValue>)> {
        in_clause_query_with(self.driver.bind_style(), query, &[InArg::from(args)])
    }

    /// Roll back after `cause`, keeping both errors if the rollback fails too.
    async fn abort(&self, scope: &mut TxScope<D::Tx>, cause: TxError) -> TxError {
        match self.rollback(scope).await {
            Ok(()) => cause,
            Err(rollback) => {
                warn!(error = %rollback, cause = %cause, "rollback after failed operation did not succeed");
                TxError::RollbackFailed {
                    cause: Box::new(cause),
                    rollback: Box::new(rollback),
                }
            }
        }
    }
}

fn ensure_usable<T>(scope: &TxScope<T>) -> Result<()> {
    match scope.state() {
        state @ (TxState::Committed | TxState::RolledBack) => {
            Err(TxError::TransactionStateError(state))
        }
        TxState::Unstarted | TxState::Active => Ok(()),
    }
}

#[cfg(test)]
mod tests;
