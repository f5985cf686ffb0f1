//! txkit - connection retry and shared, lazily begun transactions.
//!
//! A thin layer over a database driver:
//! - [`connect`] / [`establish`] open a driver and ping it, retrying at a
//!   fixed interval until the server answers
//! - [`TxHandler`] runs statements inside a caller-owned [`TxScope`]. The
//!   first statement begins the transaction, later ones reuse it, and any
//!   failure rolls it back and retires the scope
//! - [`in_clause_query`] expands list arguments into `IN (?, ?, ...)`
//! - results are decoded into any `serde::Deserialize` type
//!
//! Two native backends ship with the crate, PostgreSQL (wire protocol client)
//! and SQLite (rusqlite), selected by the descriptor's [`DriverKind`].
//! Anything implementing the [`Driver`] traits can be used instead.
//!
//! ```no_run
//! use serde::Deserialize;
//! use txkit::{args, connect, ConnectionDescriptor, TxHandler};
//!
//! #[derive(Deserialize)]
//! struct User {
//!     id: i64,
//!     name: String,
//! }
//!
//! # async fn run() -> txkit::Result<()> {
//! let db = connect(&ConnectionDescriptor::from_env()?).await?;
//! let handler = TxHandler::new(db);
//!
//! let mut scope = handler.scope();
//! handler
//!     .execute(&mut scope, "UPDATE users SET name = ? WHERE id = ?", &args!["ann", 1])
//!     .await?;
//! let users: Vec<User> = handler
//!     .select(&mut scope, "SELECT id, name FROM users WHERE id = ?", &args![1])
//!     .await?;
//! handler.commit(&mut scope).await?;
//! # Ok(())
//! # }
//! ```

mod config;
mod connect;
mod database;
mod driver;
mod error;
mod handler;
mod in_clause;
mod materialize;
mod scope;
mod value;

pub mod pg;
pub mod sqlite;
pub mod stub;

pub use config::{ConnectionDescriptor, DriverKind, RetryPolicy};
pub use connect::{connect, establish};
pub use database::{Database, DatabaseTx, NativeConnector};
pub use driver::{
    BindStyle, Connect, CursorError, Driver, ExecResult, RowCursor, RowValues, Rows, Transaction,
};
pub use error::{DriverError, DriverResult, Result, TxError};
pub use handler::TxHandler;
pub use in_clause::{
    expand, in_clause_query, in_clause_query_two_params, in_clause_query_with, rebind, InArg,
};
pub use materialize::{decode, drain, RowMap};
pub use scope::{TxScope, TxState};
pub use value::SqlValue;
