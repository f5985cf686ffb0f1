//! Text-format decoding of PostgreSQL column values.
//!
//! Reference: https://www.postgresql.org/docs/current/datatype.html

use super::error::{PgError, PgResult};
use crate::value::SqlValue;

/// Built-in type OIDs the decoder treats specially.
pub mod oid {
    pub const BOOL: u32 = 16;
    pub const BYTEA: u32 = 17;
    pub const INT8: u32 = 20;
    pub const INT2: u32 = 21;
    pub const INT4: u32 = 23;
    pub const OID: u32 = 26;
    pub const JSON: u32 = 114;
    pub const FLOAT4: u32 = 700;
    pub const FLOAT8: u32 = 701;
    pub const JSONB: u32 = 3802;
}

/// Decode one text-format column value of type `type_oid`.
///
/// Integer, float, boolean, bytea and json columns map onto their matching
/// [`SqlValue`] variants. Everything else, including `numeric` (to keep its
/// precision) and date/time types, is returned as text.
pub fn decode_text(type_oid: u32, raw: &[u8]) -> PgResult<SqlValue> {
    let text = std::str::from_utf8(raw)
        .map_err(|e| PgError::Protocol(format!("column value is not UTF-8: {}", e)))?;

    let value = match type_oid {
        oid::BOOL => SqlValue::Bool(text == "t"),
        oid::INT2 | oid::INT4 | oid::INT8 | oid::OID => SqlValue::Int(
            text.parse()
                .map_err(|_| type_error("integer", text))?,
        ),
        oid::FLOAT4 | oid::FLOAT8 => SqlValue::Float(
            text.parse()
                .map_err(|_| type_error("float", text))?,
        ),
        oid::BYTEA => SqlValue::Bytes(decode_bytea(text)?),
        oid::JSON | oid::JSONB => match serde_json::from_str(text) {
            Ok(json) => SqlValue::Json(json),
            Err(_) => SqlValue::Text(text.to_string()),
        },
        _ => SqlValue::Text(text.to_string()),
    };
    Ok(value)
}

fn type_error(kind: &str, text: &str) -> PgError {
    PgError::Protocol(format!("invalid {} value: {:?}", kind, text))
}

/// Decode bytea in hex output format (`\x0a1b...`).
fn decode_bytea(text: &str) -> PgResult<Vec<u8>> {
    let hex = text
        .strip_prefix("\\x")
        .ok_or_else(|| type_error("bytea", text))?;
    if !hex.is_ascii() || hex.len() % 2 != 0 {
        return Err(type_error("bytea", text));
    }
    hex.as_bytes()
        .chunks(2)
        .map(|pair| {
            let digit = |b: u8| (b as char).to_digit(16);
            match (digit(pair[0]), digit(pair[1])) {
                (Some(hi), Some(lo)) => Ok((hi * 16 + lo) as u8),
                _ => Err(type_error("bytea", text)),
            }
        })
        .collect()
}
