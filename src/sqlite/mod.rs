//! SQLite backend.
//!
//! Built on rusqlite with tokio-rusqlite running each connection on its own
//! thread. Queries use `?` placeholders.

pub mod connection;
pub mod error;
pub mod pool;
pub mod types;


pub use connection::SqliteConnection;
pub use error::{SqliteError, SqliteResult};
pub use pool::{SqlitePool, SqlitePoolConfig, SqliteTx};
