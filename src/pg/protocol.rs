//! PostgreSQL v3 wire protocol messages.
//!
//! Only the subset needed by a text-format client is implemented: startup and
//! authentication, the simple query cycle, and the extended query cycle with
//! named statements. Parameters and results always travel in text format.
//!
//! Reference: https://www.postgresql.org/docs/current/protocol-message-formats.html

use std::collections::HashMap;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::error::{PgError, PgResult};
use crate::value::SqlValue;

/// Protocol version 3.0
pub const PROTOCOL_VERSION: i32 = 196608;

/// Bind carries its parameter count as a 16-bit unsigned integer.
pub const MAX_PARAMS: usize = u16::MAX as usize;

/// Transaction status reported by ReadyForQuery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    Idle,
    InTransaction,
    Failed,
}

impl From<u8> for TxStatus {
    fn from(b: u8) -> Self {
        match b {
            b'T' => TxStatus::InTransaction,
            b'E' => TxStatus::Failed,
            _ => TxStatus::Idle,
        }
    }
}

// ============================================================================
// Frontend (client -> server)
// ============================================================================

/// A message sent by the client.
#[derive(Debug, Clone, Copy)]
pub enum Frontend<'a> {
    Startup {
        user: &'a str,
        database: &'a str,
        application_name: &'a str,
    },
    Password(&'a str),
    SaslInitialResponse {
        mechanism: &'a str,
        data: &'a [u8],
    },
    SaslResponse(&'a [u8]),
    Query(&'a str),
    /// Prepare a named statement; parameter types are left to the server.
    Parse {
        name: &'a str,
        query: &'a str,
    },
    /// Describe a statement (`b'S'`) or portal (`b'P'`).
    Describe {
        kind: u8,
        name: &'a str,
    },
    /// Bind text-format parameters to a statement on the unnamed portal.
    Bind {
        statement: &'a str,
        params: &'a [SqlValue],
    },
    /// Run the unnamed portal to completion.
    Execute,
    Close {
        kind: u8,
        name: &'a str,
    },
    Sync,
    Terminate,
}

impl Frontend<'_> {
    /// Append the encoded message to `buf`.
    pub fn encode(&self, buf: &mut BytesMut) {
        let start = match self {
            // The startup message is the only one without a type byte
            Frontend::Startup { .. } => buf.len(),
            _ => {
                buf.put_u8(self.tag());
                buf.len()
            }
        };
        buf.put_i32(0);
        self.encode_body(buf);
        let len = (buf.len() - start) as i32;
        buf[start..start + 4].copy_from_slice(&len.to_be_bytes());
    }

    fn tag(&self) -> u8 {
        match self {
            Frontend::Startup { .. } => 0,
            Frontend::Password(_)
            | Frontend::SaslInitialResponse { .. }
            | Frontend::SaslResponse(_) => b'p',
            Frontend::Query(_) => b'Q',
            Frontend::Parse { .. } => b'P',
            Frontend::Describe { .. } => b'D',
            Frontend::Bind { .. } => b'B',
            Frontend::Execute => b'E',
            Frontend::Close { .. } => b'C',
            Frontend::Sync => b'S',
            Frontend::Terminate => b'X',
        }
    }

    fn encode_body(&self, buf: &mut BytesMut) {
        match *self {
            Frontend::Startup {
                user,
                database,
                application_name,
            } => {
                buf.put_i32(PROTOCOL_VERSION);
                for (key, value) in [
                    ("user", user),
                    ("database", database),
                    ("application_name", application_name),
                    ("client_encoding", "UTF8"),
                ] {
                    put_cstr(buf, key);
                    put_cstr(buf, value);
                }
                buf.put_u8(0);
            }
            Frontend::Password(password) => put_cstr(buf, password),
            Frontend::SaslInitialResponse { mechanism, data } => {
                put_cstr(buf, mechanism);
                buf.put_i32(data.len() as i32);
                buf.put_slice(data);
            }
            Frontend::SaslResponse(data) => buf.put_slice(data),
            Frontend::Query(query) => put_cstr(buf, query),
            Frontend::Parse { name, query } => {
                put_cstr(buf, name);
                put_cstr(buf, query);
                buf.put_i16(0);
            }
            Frontend::Describe { kind, name } | Frontend::Close { kind, name } => {
                buf.put_u8(kind);
                put_cstr(buf, name);
            }
            Frontend::Bind { statement, params } => {
                put_cstr(buf, "");
                put_cstr(buf, statement);
                // Zero format codes: every parameter is text
                buf.put_i16(0);
                // Callers reject more than MAX_PARAMS before encoding
                buf.put_u16(params.len() as u16);
                for param in params {
                    match param.to_text() {
                        Some(text) => {
                            buf.put_i32(text.len() as i32);
                            buf.put_slice(text.as_bytes());
                        }
                        None => buf.put_i32(-1),
                    }
                }
                // Zero result format codes: every column comes back as text
                buf.put_i16(0);
            }
            Frontend::Execute => {
                put_cstr(buf, "");
                buf.put_i32(0);
            }
            Frontend::Sync | Frontend::Terminate => {}
        }
    }
}

fn put_cstr(buf: &mut BytesMut, s: &str) {
    buf.put_slice(s.as_bytes());
    buf.put_u8(0);
}

// ============================================================================
// Backend (server -> client)
// ============================================================================

/// Authentication request.
#[derive(Debug, Clone, PartialEq)]
pub enum Auth {
    Ok,
    CleartextPassword,
    Md5Password { salt: [u8; 4] },
    Sasl { mechanisms: Vec<String> },
    SaslContinue { data: Bytes },
    SaslFinal { data: Bytes },
}

/// One column of a RowDescription.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub type_oid: u32,
}

/// A message sent by the server.
#[derive(Debug, Clone, PartialEq)]
pub enum Backend {
    Authentication(Auth),
    ParameterStatus { name: String, value: String },
    BackendKeyData { process_id: i32, secret_key: i32 },
    ReadyForQuery(TxStatus),
    RowDescription(Vec<Column>),
    DataRow(Vec<Option<Bytes>>),
    CommandComplete(String),
    EmptyQueryResponse,
    ParseComplete,
    BindComplete,
    CloseComplete,
    NoData,
    ParameterDescription,
    ErrorResponse(HashMap<u8, String>),
    NoticeResponse(HashMap<u8, String>),
    /// Messages this client has no use for (notifications, copy data, ...)
    Ignored(u8),
}

impl Backend {
    /// Split one complete message off the front of `buf`.
    ///
    /// Returns `Ok(None)` when `buf` does not hold a whole message yet.
    pub fn parse(buf: &mut BytesMut) -> PgResult<Option<Self>> {
        if buf.len() < 5 {
            return Ok(None);
        }
        let len = i32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]);
        if len < 4 {
            return Err(PgError::Protocol(format!("invalid message length {}", len)));
        }
        let total = 1 + len as usize;
        if buf.len() < total {
            return Ok(None);
        }

        let mut frame = buf.split_to(total).freeze();
        let tag = frame.get_u8();
        frame.advance(4);
        Self::decode(tag, frame).map(Some)
    }

    fn decode(tag: u8, body: Bytes) -> PgResult<Self> {
        let mut r = Reader(body);
        let msg = match tag {
            b'R' => Backend::Authentication(decode_auth(&mut r)?),
            b'S' => Backend::ParameterStatus {
                name: r.cstr()?,
                value: r.cstr()?,
            },
            b'K' => Backend::BackendKeyData {
                process_id: r.i32()?,
                secret_key: r.i32()?,
            },
            b'Z' => Backend::ReadyForQuery(TxStatus::from(r.u8()?)),
            b'T' => {
                let count = r.i16()?.max(0) as usize;
                let mut columns = Vec::with_capacity(count);
                for _ in 0..count {
                    let name = r.cstr()?;
                    // table oid (4), attribute number (2)
                    r.skip(6)?;
                    let type_oid = r.i32()? as u32;
                    // type size (2), type modifier (4), format code (2)
                    r.skip(8)?;
                    columns.push(Column { name, type_oid });
                }
                Backend::RowDescription(columns)
            }
            b'D' => {
                let count = r.i16()?.max(0) as usize;
                let mut values = Vec::with_capacity(count);
                for _ in 0..count {
                    let len = r.i32()?;
                    values.push(if len < 0 { None } else { Some(r.take(len as usize)?) });
                }
                Backend::DataRow(values)
            }
            b'C' => Backend::CommandComplete(r.cstr()?),
            b'I' => Backend::EmptyQueryResponse,
            b'1' => Backend::ParseComplete,
            b'2' => Backend::BindComplete,
            b'3' => Backend::CloseComplete,
            b'n' => Backend::NoData,
            b't' => Backend::ParameterDescription,
            b'E' => Backend::ErrorResponse(r.fields()?),
            b'N' => Backend::NoticeResponse(r.fields()?),
            other => Backend::Ignored(other),
        };
        Ok(msg)
    }
}

fn decode_auth(r: &mut Reader) -> PgResult<Auth> {
    let auth = match r.i32()? {
        0 => Auth::Ok,
        3 => Auth::CleartextPassword,
        5 => {
            let mut salt = [0u8; 4];
            salt.copy_from_slice(&r.take(4)?);
            Auth::Md5Password { salt }
        }
        10 => {
            let mut mechanisms = Vec::new();
            loop {
                let mechanism = r.cstr()?;
                if mechanism.is_empty() {
                    break;
                }
                mechanisms.push(mechanism);
            }
            Auth::Sasl { mechanisms }
        }
        11 => Auth::SaslContinue { data: r.rest() },
        12 => Auth::SaslFinal { data: r.rest() },
        other => {
            return Err(PgError::Auth(format!(
                "unsupported authentication method {}",
                other
            )))
        }
    };
    Ok(auth)
}

/// Bounds-checked reader over a message body.
struct Reader(Bytes);

impl Reader {
    fn need(&self, n: usize) -> PgResult<()> {
        if self.0.remaining() < n {
            return Err(PgError::Protocol("truncated message".to_string()));
        }
        Ok(())
    }

    fn u8(&mut self) -> PgResult<u8> {
        self.need(1)?;
        Ok(self.0.get_u8())
    }

    fn i16(&mut self) -> PgResult<i16> {
        self.need(2)?;
        Ok(self.0.get_i16())
    }

    fn i32(&mut self) -> PgResult<i32> {
        self.need(4)?;
        Ok(self.0.get_i32())
    }

    fn skip(&mut self, n: usize) -> PgResult<()> {
        self.need(n)?;
        self.0.advance(n);
        Ok(())
    }

    fn take(&mut self, n: usize) -> PgResult<Bytes> {
        self.need(n)?;
        Ok(self.0.split_to(n))
    }

    fn rest(&mut self) -> Bytes {
        self.0.split_to(self.0.len())
    }

    fn cstr(&mut self) -> PgResult<String> {
        let end = self
            .0
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| PgError::Protocol("missing null terminator".to_string()))?;
        let raw = self.0.split_to(end);
        self.0.advance(1);
        Ok(String::from_utf8_lossy(&raw).into_owned())
    }

    fn fields(&mut self) -> PgResult<HashMap<u8, String>> {
        let mut fields = HashMap::new();
        while self.0.has_remaining() {
            let code = self.u8()?;
            if code == 0 {
                break;
            }
            fields.insert(code, self.cstr()?);
        }
        Ok(fields)
    }
}
