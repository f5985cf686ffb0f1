//! A single PostgreSQL connection.
//!
//! Handles startup and authentication, the simple query cycle (used for
//! transaction control) and the extended query cycle with a per-connection
//! cache of named statements.

use std::collections::HashMap;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::TcpStream;
use tracing::debug;

use super::error::{PgError, PgResult};
use super::protocol::{Auth, Backend, Column, Frontend, TxStatus, MAX_PARAMS};
use super::scram::{self, ScramClient};
use super::statement::{PreparedStatement, StatementCache};
use super::types::decode_text;
use crate::config::ConnectionDescriptor;
use crate::driver::{RowValues, Rows};
use crate::value::SqlValue;

// ============================================================================
// Configuration
// ============================================================================

/// Connection settings.
#[derive(Clone)]
pub struct PgConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    pub application_name: String,
    /// Named statements kept per connection (default: 100)
    pub statement_cache_capacity: usize,
}

impl PgConfig {
    pub fn from_descriptor(descriptor: &ConnectionDescriptor) -> PgResult<Self> {
        let port = if descriptor.port().is_empty() {
            5432
        } else {
            descriptor
                .port()
                .parse()
                .map_err(|_| PgError::Config(format!("invalid port: {:?}", descriptor.port())))?
        };
        let host = if descriptor.host().is_empty() {
            "localhost".to_string()
        } else {
            descriptor.host().to_string()
        };

        Ok(Self {
            host,
            port,
            database: descriptor.database().to_string(),
            user: descriptor.user().to_string(),
            password: descriptor.password().to_string(),
            application_name: "txkit".to_string(),
            statement_cache_capacity: 100,
        })
    }
}

impl std::fmt::Debug for PgConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"****")
            .finish()
    }
}

/// Outcome of one extended query cycle.
#[derive(Debug)]
pub struct QueryOutput {
    pub rows: Rows,
    /// Command tag (e.g. `SELECT 5` or `INSERT 0 1`)
    pub tag: String,
}

// ============================================================================
// Connection
// ============================================================================

/// A PostgreSQL connection.
pub struct PgConnection {
    reader: BufReader<tokio::io::ReadHalf<TcpStream>>,
    writer: BufWriter<tokio::io::WriteHalf<TcpStream>>,
    config: PgConfig,
    statements: StatementCache,
    tx_status: TxStatus,
    parameters: HashMap<String, String>,
    closed: bool,
    read_buf: BytesMut,
    write_buf: BytesMut,
}

impl PgConnection {
    /// Connect and authenticate.
    pub async fn connect(config: PgConfig) -> PgResult<Self> {
        let stream = TcpStream::connect((config.host.as_str(), config.port)).await?;
        stream.set_nodelay(true)?;
        let (read_half, write_half) = tokio::io::split(stream);

        let mut conn = Self {
            reader: BufReader::new(read_half),
            writer: BufWriter::new(write_half),
            statements: StatementCache::new(config.statement_cache_capacity),
            config,
            tx_status: TxStatus::Idle,
            parameters: HashMap::new(),
            closed: false,
            read_buf: BytesMut::with_capacity(8192),
            write_buf: BytesMut::with_capacity(1024),
        };
        conn.startup().await?;
        Ok(conn)
    }

    async fn startup(&mut self) -> PgResult<()> {
        let user = self.config.user.clone();
        let database = self.config.database.clone();
        let application_name = self.config.application_name.clone();
        self.send(&[Frontend::Startup {
            user: &user,
            database: &database,
            application_name: &application_name,
        }])
        .await?;

        let mut sasl: Option<ScramClient> = None;
        loop {
            match self.receive().await? {
                Backend::Authentication(Auth::Ok) => {}
                Backend::Authentication(Auth::CleartextPassword) => {
                    let password = self.config.password.clone();
                    self.send(&[Frontend::Password(&password)]).await?;
                }
                Backend::Authentication(Auth::Md5Password { salt }) => {
                    let hash = md5_password(&self.config.user, &self.config.password, &salt);
                    self.send(&[Frontend::Password(&hash)]).await?;
                }
                Backend::Authentication(Auth::Sasl { mechanisms }) => {
                    if !mechanisms.iter().any(|m| m == scram::MECHANISM) {
                        return Err(PgError::Auth(format!(
                            "unsupported SASL mechanisms: {:?}",
                            mechanisms
                        )));
                    }
                    let client = ScramClient::new(&self.config.password);
                    let first = client.client_first();
                    self.send(&[Frontend::SaslInitialResponse {
                        mechanism: scram::MECHANISM,
                        data: &first,
                    }])
                    .await?;
                    sasl = Some(client);
                }
                Backend::Authentication(Auth::SaslContinue { data }) => {
                    let client = sasl
                        .as_mut()
                        .ok_or_else(|| PgError::Protocol("unexpected SASL continue".to_string()))?;
                    let last = client.client_final(&data)?;
                    self.send(&[Frontend::SaslResponse(&last)]).await?;
                }
                Backend::Authentication(Auth::SaslFinal { data }) => {
                    sasl
                        .as_ref()
                        .ok_or_else(|| PgError::Protocol("unexpected SASL final".to_string()))?
                        .verify(&data)?;
                }
                Backend::ParameterStatus { name, value } => {
                    self.parameters.insert(name, value);
                }
                Backend::ReadyForQuery(status) => {
                    self.tx_status = status;
                    debug!(host = %self.config.host, database = %self.config.database, "postgres session ready");
                    return Ok(());
                }
                Backend::ErrorResponse(fields) => return Err(PgError::from_fields(&fields)),
                _ => {}
            }
        }
    }

    /// Run a statement through the simple query protocol and return the
    /// command tag of its last result.
    pub async fn simple(&mut self, sql: &str) -> PgResult<String> {
        self.ensure_open()?;
        self.send(&[Frontend::Query(sql)]).await?;

        let mut tag = String::new();
        let mut failure = None;
        loop {
            match self.receive().await? {
                Backend::CommandComplete(t) => tag = t,
                Backend::ErrorResponse(fields) => failure = Some(PgError::from_fields(&fields)),
                Backend::ReadyForQuery(status) => {
                    self.tx_status = status;
                    return match failure {
                        Some(err) => Err(err),
                        None => Ok(tag),
                    };
                }
                _ => {}
            }
        }
    }

    /// Run a parameterized statement through the extended protocol.
    ///
    /// The statement is parsed once per connection and reused from the cache
    /// afterwards. Parameters are sent as text and the server infers their
    /// types.
    pub async fn query(&mut self, sql: &str, params: &[SqlValue]) -> PgResult<QueryOutput> {
        self.ensure_open()?;
        if params.len() > MAX_PARAMS {
            return Err(PgError::Protocol(format!(
                "too many parameters: {} (at most {})",
                params.len(),
                MAX_PARAMS
            )));
        }
        let stmt = self.prepare(sql).await?;

        self.send(&[
            Frontend::Bind {
                statement: &stmt.name,
                params,
            },
            Frontend::Execute,
            Frontend::Sync,
        ])
        .await?;

        let mut values = Vec::new();
        let mut tag = String::new();
        let mut failure = None;
        loop {
            match self.receive().await? {
                Backend::DataRow(raw) if failure.is_none() => {
                    match decode_row(&stmt.columns, raw) {
                        Ok(row) => values.push(row),
                        Err(err) => failure = Some(err),
                    }
                }
                Backend::CommandComplete(t) => tag = t,
                Backend::ErrorResponse(fields) => {
                    let err = PgError::from_fields(&fields);
                    // 26000: the server no longer knows the statement
                    if err.code() == Some("26000") {
                        self.statements.remove(sql);
                    }
                    failure = Some(err);
                }
                Backend::ReadyForQuery(status) => {
                    self.tx_status = status;
                    break;
                }
                _ => {}
            }
        }

        if let Some(err) = failure {
            return Err(err);
        }
        let columns = stmt.columns.iter().map(|c| c.name.clone()).collect();
        Ok(QueryOutput {
            rows: Rows::new(columns, values),
            tag,
        })
    }

    async fn prepare(&mut self, sql: &str) -> PgResult<PreparedStatement> {
        if let Some(stmt) = self.statements.get(sql) {
            return Ok(stmt.clone());
        }

        let name = self.statements.next_name();
        let evicted = self.statements.evict_for_insert();

        let mut messages = Vec::with_capacity(4);
        if let Some(old) = &evicted {
            messages.push(Frontend::Close { kind: b'S', name: old });
        }
        messages.push(Frontend::Parse { name: &name, query: sql });
        messages.push(Frontend::Describe { kind: b'S', name: &name });
        messages.push(Frontend::Sync);
        self.send(&messages).await?;

        let mut columns = Vec::new();
        let mut failure = None;
        loop {
            match self.receive().await? {
                Backend::RowDescription(cols) => columns = cols,
                Backend::ErrorResponse(fields) => failure = Some(PgError::from_fields(&fields)),
                Backend::ReadyForQuery(status) => {
                    self.tx_status = status;
                    break;
                }
                _ => {}
            }
        }
        if let Some(err) = failure {
            return Err(err);
        }

        debug!(statement = %name, "prepared statement");
        let stmt = PreparedStatement { name, columns };
        self.statements.insert(sql.to_string(), stmt.clone());
        Ok(stmt)
    }

    /// Send Terminate and mark the connection closed.
    pub async fn close(&mut self) -> PgResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.send(&[Frontend::Terminate]).await
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn tx_status(&self) -> TxStatus {
        self.tx_status
    }

    /// A server parameter reported at startup (`server_version`, ...).
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).map(|s| s.as_str())
    }

    pub fn cached_statements(&self) -> usize {
        self.statements.len()
    }

    // ========================================================================
    // I/O
    // ========================================================================

    fn ensure_open(&self) -> PgResult<()> {
        if self.closed {
            return Err(PgError::ConnectionClosed);
        }
        Ok(())
    }

    async fn send(&mut self, messages: &[Frontend<'_>]) -> PgResult<()> {
        self.write_buf.clear();
        for msg in messages {
            msg.encode(&mut self.write_buf);
        }
        let written = match self.writer.write_all(&self.write_buf).await {
            Ok(()) => self.writer.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            self.closed = true;
            return Err(PgError::Io(e));
        }
        Ok(())
    }

    async fn receive(&mut self) -> PgResult<Backend> {
        loop {
            if let Some(msg) = Backend::parse(&mut self.read_buf)? {
                return Ok(msg);
            }
            match self.reader.read_buf(&mut self.read_buf).await {
                Ok(0) => {
                    self.closed = true;
                    return Err(PgError::ConnectionClosed);
                }
                Ok(_) => {}
                Err(e) => {
                    self.closed = true;
                    return Err(PgError::Io(e));
                }
            }
        }
    }
}

fn decode_row(columns: &[Column], raw: Vec<Option<bytes::Bytes>>) -> PgResult<RowValues> {
    if raw.len() != columns.len() {
        return Err(PgError::Protocol(format!(
            "row has {} values for {} columns",
            raw.len(),
            columns.len()
        )));
    }
    columns
        .iter()
        .zip(raw)
        .map(|(column, value)| match value {
            Some(data) => decode_text(column.type_oid, &data),
            None => Ok(SqlValue::Null),
        })
        .collect()
}

/// `md5` || md5(md5(password || user) || salt)
pub(crate) fn md5_password(user: &str, password: &str, salt: &[u8; 4]) -> String {
    let inner = format!("{:x}", md5::compute(format!("{}{}", password, user)));
    let mut outer = inner.into_bytes();
    outer.extend_from_slice(salt);
    format!("md5{:x}", md5::compute(&outer))
}
