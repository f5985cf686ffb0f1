//! Result materialization: drain a cursor into column→value maps, then decode
//! the whole sequence into a caller type with serde.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;

use crate::driver::RowCursor;
use crate::error::{DriverResult, Result};
use crate::value::SqlValue;

/// One result row keyed by column name.
pub type RowMap = BTreeMap<String, SqlValue>;

/// Read every row of `cursor` into a [`RowMap`], preserving row order.
///
/// Every declared column is present in every map (NULL columns hold
/// [`SqlValue::Null`]). The cursor is closed whether or not draining succeeds.
pub fn drain<C: RowCursor>(cursor: &mut C) -> DriverResult<Vec<RowMap>> {
    let drained = drain_open(cursor);
    let closed = cursor.close();
    let rows = drained?;
    closed?;
    Ok(rows)
}

fn drain_open<C: RowCursor>(cursor: &mut C) -> DriverResult<Vec<RowMap>> {
    let columns = cursor.columns()?;
    let mut values = vec![SqlValue::Null; columns.len()];
    let mut rows = Vec::new();

    while cursor.advance() {
        cursor.scan(&mut values)?;
        let row: RowMap = columns
            .iter()
            .cloned()
            .zip(values.iter().cloned())
            .collect();
        rows.push(row);
    }

    Ok(rows)
}

/// Decode drained rows into `T`, typically `Vec<S>` for a row struct `S`.
///
/// Column names are matched to serde field names; use `#[serde(rename)]` or
/// `#[serde(rename_all)]` where they differ.
pub fn decode<T: DeserializeOwned>(rows: Vec<RowMap>) -> Result<T> {
    let value = JsonValue::Array(rows.into_iter().map(row_to_json).collect());
    Ok(serde_json::from_value(value)?)
}

fn row_to_json(row: RowMap) -> JsonValue {
    JsonValue::Object(row.into_iter().map(|(k, v)| (k, v.into_json())).collect())
}
