//! SQLite value conversion.

use rusqlite::types::{ToSql, ToSqlOutput, Value, ValueRef};

use crate::value::SqlValue;

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            SqlValue::Null => ToSqlOutput::Owned(Value::Null),
            SqlValue::Bool(b) => ToSqlOutput::Owned(Value::Integer(*b as i64)),
            SqlValue::Int(i) => ToSqlOutput::Owned(Value::Integer(*i)),
            SqlValue::Float(f) => ToSqlOutput::Owned(Value::Real(*f)),
            // Borrow text and blobs instead of cloning them
            SqlValue::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            SqlValue::Bytes(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
            SqlValue::Json(v) => ToSqlOutput::Owned(Value::Text(v.to_string())),
        })
    }
}

/// Convert a column value read from a row.
pub fn from_value_ref(value: ValueRef<'_>) -> SqlValue {
    match value {
        ValueRef::Null => SqlValue::Null,
        ValueRef::Integer(i) => SqlValue::Int(i),
        ValueRef::Real(f) => SqlValue::Float(f),
        ValueRef::Text(s) => SqlValue::Text(String::from_utf8_lossy(s).into_owned()),
        ValueRef::Blob(b) => SqlValue::Bytes(b.to_vec()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bool_binds_as_integer() {
        let value = SqlValue::Bool(true);
        let out = value.to_sql().unwrap();
        assert!(matches!(out, ToSqlOutput::Owned(Value::Integer(1))));
    }

    #[test]
    fn test_json_binds_as_text() {
        let value = SqlValue::Json(serde_json::json!({"a": 1}));
        let out = value.to_sql().unwrap();
        match out {
            ToSqlOutput::Owned(Value::Text(s)) => assert_eq!(s, r#"{"a":1}"#),
            other => panic!("unexpected output: {other:?}"),
        }
    }

    #[test]
    fn test_from_value_ref() {
        assert_eq!(from_value_ref(ValueRef::Null), SqlValue::Null);
        assert_eq!(from_value_ref(ValueRef::Integer(7)), SqlValue::Int(7));
        assert_eq!(from_value_ref(ValueRef::Real(1.5)), SqlValue::Float(1.5));
        assert_eq!(from_value_ref(ValueRef::Text(b"hi")), SqlValue::from("hi"));
        assert_eq!(
            from_value_ref(ValueRef::Blob(&[0xde, 0xad])),
            SqlValue::Bytes(vec![0xde, 0xad])
        );
    }
}
