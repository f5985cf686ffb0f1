//! Values passed as query arguments and read back from result rows.

use serde_json::Value as JsonValue;

/// A single SQL argument or column value.
#[derive(Clone, Debug, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    /// JSON document (json/jsonb columns)
    Json(JsonValue),
}

impl SqlValue {
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            SqlValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Convert into the JSON representation used when decoding rows into caller types.
    pub fn into_json(self) -> JsonValue {
        match self {
            SqlValue::Null => JsonValue::Null,
            SqlValue::Bool(b) => JsonValue::Bool(b),
            SqlValue::Int(i) => JsonValue::from(i),
            // NaN and infinities have no JSON form
            SqlValue::Float(f) => serde_json::Number::from_f64(f)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            SqlValue::Text(s) => JsonValue::String(s),
            SqlValue::Bytes(b) => JsonValue::Array(b.into_iter().map(JsonValue::from).collect()),
            SqlValue::Json(v) => v,
        }
    }

    /// Render the value in PostgreSQL text format. `None` means SQL NULL.
    pub fn to_text(&self) -> Option<String> {
        match self {
            SqlValue::Null => None,
            SqlValue::Bool(b) => Some(if *b { "t".to_string() } else { "f".to_string() }),
            SqlValue::Int(i) => Some(i.to_string()),
            SqlValue::Float(f) => Some(f.to_string()),
            SqlValue::Text(s) => Some(s.clone()),
            SqlValue::Bytes(b) => {
                let mut out = String::with_capacity(2 + b.len() * 2);
                out.push_str("\\x");
                for byte in b {
                    out.push_str(&format!("{:02x}", byte));
                }
                Some(out)
            }
            SqlValue::Json(v) => Some(v.to_string()),
        }
    }
}

impl From<&str> for SqlValue {
    fn from(s: &str) -> Self {
        SqlValue::Text(s.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(s: String) -> Self {
        SqlValue::Text(s)
    }
}

impl From<&String> for SqlValue {
    fn from(s: &String) -> Self {
        SqlValue::Text(s.clone())
    }
}

impl From<bool> for SqlValue {
    fn from(b: bool) -> Self {
        SqlValue::Bool(b)
    }
}

impl From<i32> for SqlValue {
    fn from(i: i32) -> Self {
        SqlValue::Int(i as i64)
    }
}

impl From<i64> for SqlValue {
    fn from(i: i64) -> Self {
        SqlValue::Int(i)
    }
}

impl From<u32> for SqlValue {
    fn from(i: u32) -> Self {
        SqlValue::Int(i as i64)
    }
}

impl From<f64> for SqlValue {
    fn from(f: f64) -> Self {
        SqlValue::Float(f)
    }
}

impl From<Vec<u8>> for SqlValue {
    fn from(b: Vec<u8>) -> Self {
        SqlValue::Bytes(b)
    }
}

impl From<JsonValue> for SqlValue {
    fn from(v: JsonValue) -> Self {
        SqlValue::Json(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(SqlValue::Null)
    }
}

/// Build a `Vec<SqlValue>` from heterogeneous arguments.
///
/// ```
/// let args = txkit::args!["david", 42, None::<i64>];
/// assert_eq!(args.len(), 3);
/// ```
#[macro_export]
macro_rules! args {
    () => {
        ::std::vec::Vec::<$crate::SqlValue>::new()
    };
    ($($arg:expr),+ $(,)?) => {
        ::std::vec![$($crate::SqlValue::from($arg)),+]
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_macro_converts_each_argument() {
        let args = crate::args!["a", 1, true, None::<String>];
        assert_eq!(
            args,
            vec![
                SqlValue::Text("a".to_string()),
                SqlValue::Int(1),
                SqlValue::Bool(true),
                SqlValue::Null,
            ]
        );
    }

    #[test]
    fn test_text_format() {
        assert_eq!(SqlValue::Null.to_text(), None);
        assert_eq!(SqlValue::Bool(true).to_text().as_deref(), Some("t"));
        assert_eq!(SqlValue::Int(-7).to_text().as_deref(), Some("-7"));
        assert_eq!(
            SqlValue::Bytes(vec![0xde, 0xad]).to_text().as_deref(),
            Some("\\xdead")
        );
    }

    #[test]
    fn test_float_without_json_form_becomes_null() {
        assert_eq!(SqlValue::Float(f64::NAN).into_json(), JsonValue::Null);
        assert_eq!(SqlValue::Float(1.5).into_json(), serde_json::json!(1.5));
    }
}
