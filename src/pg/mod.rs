//! PostgreSQL backend.
//!
//! A small client for the v3 wire protocol:
//! - `protocol`: message encoding and decoding
//! - `connection`: startup, authentication (cleartext, MD5, SCRAM-SHA-256) and
//!   the simple and extended query cycles
//! - `statement`: per-connection LRU cache of named statements
//! - `types`: text-format column decoding
//! - `pool`: connection pool implementing the driver traits
//!
//! Parameters and results use the text format, so the server infers
//! parameter types. TLS is not supported.

pub mod connection;
pub mod error;
pub mod pool;
pub mod protocol;
pub mod scram;
pub mod statement;
pub mod types;


pub use connection::{PgConfig, PgConnection};
pub use error::{PgError, PgResult};
pub use pool::{PgPool, PgPoolConfig, PgTx};
