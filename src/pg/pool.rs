//! PostgreSQL connection pool and transactions.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

use super::connection::{PgConfig, PgConnection, QueryOutput};
use super::error::{PgError, PgResult};
use super::protocol::TxStatus;
use crate::driver::{BindStyle, Driver, ExecResult, Rows, Transaction};
use crate::error::DriverResult;
use crate::value::SqlValue;

// ============================================================================
// Pool Configuration
// ============================================================================

/// Connection pool configuration.
#[derive(Debug, Clone)]
pub struct PgPoolConfig {
    pub connection: PgConfig,
    /// Connections opened up front
    pub min_connections: u32,
    /// Upper bound on open connections
    pub max_connections: u32,
}

impl PgPoolConfig {
    pub fn new(connection: PgConfig) -> Self {
        Self {
            connection,
            min_connections: 1,
            max_connections: 10,
        }
    }

    pub fn min_connections(mut self, min: u32) -> Self {
        self.min_connections = min;
        self
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max.max(1);
        self
    }

    pub fn statement_cache_capacity(mut self, capacity: usize) -> Self {
        self.connection.statement_cache_capacity = capacity;
        self
    }
}

// ============================================================================
// Pooled Connection
// ============================================================================

/// A connection checked out from the pool.
///
/// Dropping it hands the connection back, unless it is closed or still
/// inside a transaction block. Those are discarded so the next borrower
/// never inherits half a transaction.
pub struct PooledConnection {
    conn: Option<PgConnection>,
    pool: Arc<PgPoolInner>,
    _permit: OwnedSemaphorePermit,
}

impl PooledConnection {
    fn conn(&mut self) -> PgResult<&mut PgConnection> {
        self.conn.as_mut().ok_or(PgError::ConnectionClosed)
    }

    pub async fn simple(&mut self, sql: &str) -> PgResult<String> {
        self.conn()?.simple(sql).await
    }

    pub async fn query(&mut self, sql: &str, params: &[SqlValue]) -> PgResult<QueryOutput> {
        self.conn()?.query(sql, params).await
    }

    pub fn tx_status(&self) -> Option<TxStatus> {
        self.conn.as_ref().map(|c| c.tx_status())
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            if conn.is_closed() {
                return;
            }
            if conn.tx_status() != TxStatus::Idle {
                warn!("discarding connection returned inside an unfinished transaction");
                return;
            }
            self.pool.idle_connections.lock().push(conn);
        }
    }
}

// ============================================================================
// Connection Pool
// ============================================================================

struct PgPoolInner {
    config: PgPoolConfig,
    idle_connections: Mutex<Vec<PgConnection>>,
    semaphore: Arc<Semaphore>,
}

/// A PostgreSQL connection pool.
#[derive(Clone)]
pub struct PgPool {
    inner: Arc<PgPoolInner>,
}

impl std::fmt::Debug for PgPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgPool")
            .field("config", &self.inner.config)
            .field("idle", &self.idle_count())
            .finish()
    }
}

impl PgPool {
    /// Create a pool and open `min_connections` connections.
    pub async fn connect(config: PgPoolConfig) -> PgResult<Self> {
        let inner = Arc::new(PgPoolInner {
            semaphore: Arc::new(Semaphore::new(config.max_connections as usize)),
            config,
            idle_connections: Mutex::new(Vec::new()),
        });

        let pool = Self { inner };

        for _ in 0..pool.inner.config.min_connections {
            let conn = pool.create_connection().await?;
            pool.inner.idle_connections.lock().push(conn);
        }

        Ok(pool)
    }

    /// Check a connection out of the pool, opening one if none is idle.
    pub async fn acquire(&self) -> PgResult<PooledConnection> {
        let permit = Arc::clone(&self.inner.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| PgError::ConnectionClosed)?;

        let conn = {
            let mut idle = self.inner.idle_connections.lock();
            idle.pop()
        };

        let conn = match conn {
            Some(c) if !c.is_closed() => c,
            _ => self.create_connection().await?,
        };

        Ok(PooledConnection {
            conn: Some(conn),
            pool: Arc::clone(&self.inner),
            _permit: permit,
        })
    }

    /// Close the pool. Idle connections are terminated now; connections
    /// still checked out are dropped when they come back.
    pub async fn close(&self) -> PgResult<()> {
        self.inner.semaphore.close();
        let connections = {
            let mut idle = self.inner.idle_connections.lock();
            std::mem::take(&mut *idle)
        };

        for mut conn in connections {
            if let Err(e) = conn.close().await {
                debug!(error = %e, "terminate failed on idle connection");
            }
        }
        Ok(())
    }

    pub fn idle_count(&self) -> usize {
        self.inner.idle_connections.lock().len()
    }

    pub fn config(&self) -> &PgPoolConfig {
        &self.inner.config
    }

    async fn create_connection(&self) -> PgResult<PgConnection> {
        PgConnection::connect(self.inner.config.connection.clone()).await
    }
}

impl Driver for PgPool {
    type Tx = PgTx;
    type Rows = Rows;

    fn bind_style(&self) -> BindStyle {
        BindStyle::Dollar
    }

    async fn ping(&self) -> DriverResult<()> {
        let mut conn = self.acquire().await?;
        conn.simple("SELECT 1").await?;
        Ok(())
    }

    async fn close(&self) -> DriverResult<()> {
        PgPool::close(self).await?;
        Ok(())
    }

    async fn begin(&self) -> DriverResult<PgTx> {
        let mut conn = self.acquire().await?;
        conn.simple("BEGIN").await?;
        Ok(PgTx { conn: Some(conn) })
    }

    async fn query(&self, sql: &str, args: &[SqlValue]) -> DriverResult<Rows> {
        let mut conn = self.acquire().await?;
        Ok(conn.query(sql, args).await?.rows)
    }
}

// ============================================================================
// Transaction
// ============================================================================

/// A transaction pinned to one pooled connection from BEGIN to COMMIT or
/// ROLLBACK.
pub struct PgTx {
    conn: Option<PooledConnection>,
}

impl PgTx {
    fn conn(&mut self) -> PgResult<&mut PooledConnection> {
        self.conn.as_mut().ok_or(PgError::TransactionFinished)
    }
}

impl Transaction for PgTx {
    type Rows = Rows;

    async fn exec(&mut self, sql: &str, args: &[SqlValue]) -> DriverResult<ExecResult> {
        let output = self.conn()?.query(sql, args).await?;
        Ok(ExecResult {
            rows_affected: parse_rows_affected(&output.tag),
            last_insert_id: None,
        })
    }

    async fn query(&mut self, sql: &str, args: &[SqlValue]) -> DriverResult<Rows> {
        Ok(self.conn()?.query(sql, args).await?.rows)
    }

    /// A failed COMMIT keeps the connection so the caller can still roll back.
    async fn commit(&mut self) -> DriverResult<()> {
        let tag = self.conn()?.simple("COMMIT").await?;
        self.conn = None;
        // The server answers COMMIT with ROLLBACK when the block had failed
        if tag == "ROLLBACK" {
            return Err(PgError::TransactionAborted.into());
        }
        Ok(())
    }

    async fn rollback(&mut self) -> DriverResult<()> {
        self.conn()?.simple("ROLLBACK").await?;
        self.conn = None;
        Ok(())
    }
}

/// Rows affected, parsed from a command tag.
pub(crate) fn parse_rows_affected(tag: &str) -> u64 {
    let parts: Vec<&str> = tag.split_whitespace().collect();
    match parts.as_slice() {
        ["INSERT", _, n] | [_, n] => n.parse().unwrap_or(0),
        _ => 0,
    }
}
