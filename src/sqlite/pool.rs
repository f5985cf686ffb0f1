//! SQLite connection pool and transactions.
//!
//! Every transaction pins one pooled connection from `BEGIN` until commit or
//! rollback. An in-memory database lives inside a single connection, so
//! `:memory:` pools are capped at one connection, and asking for it while a
//! transaction holds it fails instead of waiting.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use super::connection::SqliteConnection;
use super::error::{SqliteError, SqliteResult};
use crate::driver::{BindStyle, Driver, ExecResult, Rows, Transaction};
use crate::error::DriverResult;
use crate::value::SqlValue;

/// Pool configuration.
#[derive(Debug, Clone)]
pub struct SqlitePoolConfig {
    /// Database path (or `:memory:`)
    pub path: String,
    /// Maximum number of open connections
    pub max_connections: u32,
}

impl SqlitePoolConfig {
    pub fn new(path: &str) -> Self {
        Self {
            path: path.to_string(),
            max_connections: if path == ":memory:" { 1 } else { 4 },
        }
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = if self.path == ":memory:" { 1 } else { max.max(1) };
        self
    }
}

/// A connection checked out of the pool.
pub struct PooledConnection {
    conn: Option<SqliteConnection>,
    pool: Arc<SqlitePoolInner>,
    _permit: OwnedSemaphorePermit,
}

impl PooledConnection {
    fn conn(&self) -> SqliteResult<&SqliteConnection> {
        self.conn.as_ref().ok_or(SqliteError::ConnectionClosed)
    }

    pub async fn query(&self, sql: &str, params: &[SqlValue]) -> SqliteResult<Rows> {
        self.conn()?.query(sql, params).await
    }

    pub async fn execute(&self, sql: &str, params: &[SqlValue]) -> SqliteResult<ExecResult> {
        self.conn()?.execute(sql, params).await
    }

    async fn batch(&self, sql: &str) -> SqliteResult<()> {
        self.conn()?.execute_batch(sql).await
    }

    fn set_in_transaction(&mut self, value: bool) {
        if let Some(conn) = self.conn.as_mut() {
            if conn.in_transaction != value {
                if value {
                    self.pool.pinned.fetch_add(1, Ordering::SeqCst);
                } else {
                    self.pool.pinned.fetch_sub(1, Ordering::SeqCst);
                }
            }
            conn.in_transaction = value;
        }
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            if conn.in_transaction {
                self.pool.pinned.fetch_sub(1, Ordering::SeqCst);
            }
            if !conn.is_closed() {
                self.pool.idle_connections.lock().push(conn);
            }
        }
    }
}

struct SqlitePoolInner {
    config: SqlitePoolConfig,
    idle_connections: Mutex<Vec<SqliteConnection>>,
    semaphore: Arc<Semaphore>,
    /// Connections currently held by an open transaction
    pinned: AtomicUsize,
}

/// SQLite connection pool.
#[derive(Clone)]
pub struct SqlitePool {
    inner: Arc<SqlitePoolInner>,
}

impl std::fmt::Debug for SqlitePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlitePool")
            .field("config", &self.inner.config)
            .field("idle", &self.inner.idle_connections.lock().len())
            .finish()
    }
}

impl SqlitePool {
    /// Create a pool and open its first connection.
    pub async fn connect(config: SqlitePoolConfig) -> SqliteResult<Self> {
        let inner = Arc::new(SqlitePoolInner {
            semaphore: Arc::new(Semaphore::new(config.max_connections as usize)),
            config,
            idle_connections: Mutex::new(Vec::new()),
            pinned: AtomicUsize::new(0),
        });

        let pool = Self { inner };

        let conn = pool.create_connection().await?;
        pool.inner.idle_connections.lock().push(conn);

        Ok(pool)
    }

    /// Check a connection out of the pool, opening one if none is idle.
    ///
    /// A connection given back by a transaction that was dropped unfinished
    /// is rolled back before it is reused. For `:memory:` pools, a request made
    /// while a transaction holds the only connection fails immediately.
    pub async fn acquire(&self) -> SqliteResult<PooledConnection> {
        if self.inner.config.path == ":memory:"
            && self.inner.pinned.load(Ordering::SeqCst) >= self.inner.config.max_connections as usize
        {
            return Err(SqliteError::Pool(
                "in-memory database connection is held by an open transaction".to_string(),
            ));
        }

        let permit = self
            .inner
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| SqliteError::Pool("Pool closed".to_string()))?;

        let conn = {
            let mut idle = self.inner.idle_connections.lock();
            idle.pop()
        };

        let mut conn = match conn {
            Some(c) if !c.is_closed() => c,
            _ => self.create_connection().await?,
        };

        if conn.in_transaction {
            debug!("rolling back abandoned transaction before reuse");
            conn.execute_batch("ROLLBACK").await?;
            conn.in_transaction = false;
        }

        Ok(PooledConnection {
            conn: Some(conn),
            pool: Arc::clone(&self.inner),
            _permit: permit,
        })
    }

    /// Close the pool. Idle connections are closed now, checked out ones
    /// when they come back.
    pub async fn close(&self) -> SqliteResult<()> {
        self.inner.semaphore.close();
        let connections = {
            let mut idle = self.inner.idle_connections.lock();
            std::mem::take(&mut *idle)
        };

        let mut result = Ok(());
        for conn in connections {
            if let Err(e) = conn.close().await {
                result = Err(e);
            }
        }
        result
    }

    pub fn path(&self) -> &str {
        &self.inner.config.path
    }

    async fn create_connection(&self) -> SqliteResult<SqliteConnection> {
        SqliteConnection::open(&self.inner.config.path).await
    }
}

impl Driver for SqlitePool {
    type Tx = SqliteTx;
    type Rows = Rows;

    fn bind_style(&self) -> BindStyle {
        BindStyle::Question
    }

    async fn ping(&self) -> DriverResult<()> {
        let conn = self.acquire().await?;
        conn.query("SELECT 1", &[]).await?;
        Ok(())
    }

    async fn close(&self) -> DriverResult<()> {
        SqlitePool::close(self).await?;
        Ok(())
    }

    async fn begin(&self) -> DriverResult<SqliteTx> {
        let mut conn = self.acquire().await?;
        conn.batch("BEGIN").await?;
        conn.set_in_transaction(true);
        Ok(SqliteTx { conn: Some(conn) })
    }

    async fn query(&self, sql: &str, args: &[SqlValue]) -> DriverResult<Rows> {
        let conn = self.acquire().await?;
        Ok(conn.query(sql, args).await?)
    }
}

/// A transaction pinned to one pooled connection.
pub struct SqliteTx {
    conn: Option<PooledConnection>,
}

impl SqliteTx {
    fn conn(&self) -> SqliteResult<&PooledConnection> {
        self.conn.as_ref().ok_or(SqliteError::TransactionFinished)
    }

    /// The connection stays pinned if the statement fails, so a failed
    /// commit can still be rolled back.
    async fn finish(&mut self, sql: &str) -> SqliteResult<()> {
        let conn = self.conn.as_mut().ok_or(SqliteError::TransactionFinished)?;
        conn.batch(sql).await?;
        conn.set_in_transaction(false);
        self.conn = None;
        Ok(())
    }
}

impl Transaction for SqliteTx {
    type Rows = Rows;

    async fn exec(&mut self, sql: &str, args: &[SqlValue]) -> DriverResult<ExecResult> {
        Ok(self.conn()?.execute(sql, args).await?)
    }

    async fn query(&mut self, sql: &str, args: &[SqlValue]) -> DriverResult<Rows> {
        Ok(self.conn()?.query(sql, args).await?)
    }

    async fn commit(&mut self) -> DriverResult<()> {
        Ok(self.finish("COMMIT").await?)
    }

    async fn rollback(&mut self) -> DriverResult<()> {
        Ok(self.finish("ROLLBACK").await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pool_basic() {
        let pool = SqlitePool::connect(SqlitePoolConfig::new(":memory:"))
            .await
            .unwrap();

        let conn = pool.acquire().await.unwrap();
        conn.execute("CREATE TABLE test (id INTEGER PRIMARY KEY, name TEXT)", &[])
            .await
            .unwrap();
        let result = conn
            .execute("INSERT INTO test (name) VALUES (?)", &[SqlValue::from("hello")])
            .await
            .unwrap();
        assert_eq!(result.rows_affected, 1);
        assert_eq!(result.last_insert_id, Some(1));
        drop(conn);

        let rows = Driver::query(&pool, "SELECT * FROM test", &[]).await.unwrap();
        assert_eq!(rows.remaining(), 1);

        pool.close().await.unwrap();
    }

    #[test]
    fn test_memory_pool_has_one_connection() {
        let config = SqlitePoolConfig::new(":memory:").max_connections(8);
        assert_eq!(config.max_connections, 1);
        let config = SqlitePoolConfig::new("app.db").max_connections(8);
        assert_eq!(config.max_connections, 8);
    }

    #[tokio::test]
    async fn test_closed_pool_refuses_connections() {
        let pool = SqlitePool::connect(SqlitePoolConfig::new(":memory:"))
            .await
            .unwrap();
        pool.close().await.unwrap();
        assert!(pool.ping().await.is_err());
    }
}
