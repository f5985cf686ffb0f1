//! Native backends behind a single driver type.

use tracing::debug;

use crate::config::{ConnectionDescriptor, DriverKind};
use crate::driver::{BindStyle, Connect, Driver, ExecResult, Rows, Transaction};
use crate::error::DriverResult;
use crate::pg::{PgConfig, PgPool, PgPoolConfig, PgTx};
use crate::sqlite::{SqlitePool, SqlitePoolConfig, SqliteTx};
use crate::value::SqlValue;

/// An open pool for whichever backend the descriptor named.
#[derive(Debug, Clone)]
pub enum Database {
    Postgres(PgPool),
    Sqlite(SqlitePool),
}

/// Transaction of a [`Database`].
pub enum DatabaseTx {
    Postgres(PgTx),
    Sqlite(SqliteTx),
}

impl Database {
    pub fn kind(&self) -> DriverKind {
        match self {
            Database::Postgres(_) => DriverKind::Postgres,
            Database::Sqlite(_) => DriverKind::Sqlite,
        }
    }
}

impl Driver for Database {
    type Tx = DatabaseTx;
    type Rows = Rows;

    fn bind_style(&self) -> BindStyle {
        match self {
            Database::Postgres(pool) => pool.bind_style(),
            Database::Sqlite(pool) => pool.bind_style(),
        }
    }

    async fn ping(&self) -> DriverResult<()> {
        match self {
            Database::Postgres(pool) => pool.ping().await,
            Database::Sqlite(pool) => pool.ping().await,
        }
    }

    async fn close(&self) -> DriverResult<()> {
        match self {
            Database::Postgres(pool) => Driver::close(pool).await,
            Database::Sqlite(pool) => Driver::close(pool).await,
        }
    }

    async fn begin(&self) -> DriverResult<DatabaseTx> {
        match self {
            Database::Postgres(pool) => pool.begin().await.map(DatabaseTx::Postgres),
            Database::Sqlite(pool) => pool.begin().await.map(DatabaseTx::Sqlite),
        }
    }

    async fn query(&self, sql: &str, args: &[SqlValue]) -> DriverResult<Rows> {
        match self {
            Database::Postgres(pool) => Driver::query(pool, sql, args).await,
            Database::Sqlite(pool) => Driver::query(pool, sql, args).await,
        }
    }
}

impl Transaction for DatabaseTx {
    type Rows = Rows;

    async fn exec(&mut self, sql: &str, args: &[SqlValue]) -> DriverResult<ExecResult> {
        match self {
            DatabaseTx::Postgres(tx) => tx.exec(sql, args).await,
            DatabaseTx::Sqlite(tx) => tx.exec(sql, args).await,
        }
    }

    async fn query(&mut self, sql: &str, args: &[SqlValue]) -> DriverResult<Rows> {
        match self {
            DatabaseTx::Postgres(tx) => tx.query(sql, args).await,
            DatabaseTx::Sqlite(tx) => tx.query(sql, args).await,
        }
    }

    async fn commit(&mut self) -> DriverResult<()> {
        match self {
            DatabaseTx::Postgres(tx) => tx.commit().await,
            DatabaseTx::Sqlite(tx) => tx.commit().await,
        }
    }

    async fn rollback(&mut self) -> DriverResult<()> {
        match self {
            DatabaseTx::Postgres(tx) => tx.rollback().await,
            DatabaseTx::Sqlite(tx) => tx.rollback().await,
        }
    }
}

/// Opens the native backend named by a descriptor's driver kind.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeConnector;

impl Connect for NativeConnector {
    type Driver = Database;

    async fn open(&self, descriptor: &ConnectionDescriptor) -> DriverResult<Database> {
        debug!(db = %descriptor, "opening database pool");
        match descriptor.driver() {
            DriverKind::Postgres => {
                let config = PgPoolConfig::new(PgConfig::from_descriptor(descriptor)?);
                Ok(Database::Postgres(PgPool::connect(config).await?))
            }
            DriverKind::Sqlite => {
                let config = SqlitePoolConfig::new(descriptor.database());
                Ok(Database::Sqlite(SqlitePool::connect(config).await?))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args;
    use crate::connect::establish;
    use crate::config::RetryPolicy;
    use crate::handler::TxHandler;

    #[tokio::test]
    async fn test_sqlite_descriptor_opens_sqlite_pool() {
        let db = establish(
            &NativeConnector,
            &ConnectionDescriptor::sqlite(":memory:"),
            RetryPolicy::default().attempts(1),
        )
        .await
        .unwrap();

        assert_eq!(db.kind(), DriverKind::Sqlite);
        assert_eq!(db.bind_style(), BindStyle::Question);

        let handler = TxHandler::new(db);
        let mut scope = handler.scope();
        handler
            .execute(&mut scope, "CREATE TABLE kv (k TEXT, v INTEGER)", &[])
            .await
            .unwrap();
        let result = handler
            .execute(&mut scope, "INSERT INTO kv VALUES (?, ?)", &args!["a", 1])
            .await
            .unwrap();
        assert_eq!(result.rows_affected, 1);
        handler.commit(&mut scope).await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_postgres_port_is_reported() {
        let descriptor =
            ConnectionDescriptor::new("u", "p", "not-a-port", "db", "localhost", "postgres").unwrap();
        let err = NativeConnector.open(&descriptor).await.unwrap_err();
        assert!(err.to_string().contains("invalid port"));
    }
}
