//! IN-clause expansion and placeholder rebinding.
//!
//! Queries are written with `?` placeholders. A list argument expands its
//! placeholder into one `?` per element (`id IN (?)` with three ids becomes
//! `id IN (?, ?, ?)`), then the query is rebound to the driver's placeholder
//! syntax. `??` stands for a literal question mark. Placeholders inside
//! string literals (`'...'`, `E'...'` with backslash escapes) and quoted
//! identifiers (`"..."`) are left alone. Dollar-quoted strings are not
//! recognized.

use crate::driver::BindStyle;
use crate::error::{Result, TxError};
use crate::value::SqlValue;

/// One argument of an IN-clause query.
#[derive(Debug, Clone, PartialEq)]
pub enum InArg {
    /// Binds to a single placeholder.
    Value(SqlValue),
    /// Expands its placeholder into one placeholder per element.
    List(Vec<SqlValue>),
}

impl From<SqlValue> for InArg {
    fn from(v: SqlValue) -> Self {
        InArg::Value(v)
    }
}

impl From<Vec<SqlValue>> for InArg {
    fn from(v: Vec<SqlValue>) -> Self {
        InArg::List(v)
    }
}

impl From<&[SqlValue]> for InArg {
    fn from(v: &[SqlValue]) -> Self {
        InArg::List(v.to_vec())
    }
}

enum Segment<'a> {
    Text(&'a str),
    Placeholder,
    /// `??`
    Escaped,
}

#[derive(Clone, Copy, PartialEq)]
enum Quote {
    None,
    /// `'...'`, where `''` is an escaped quote
    Literal,
    /// `E'...'`, where a backslash escapes the next character
    Escaped,
    /// `"..."` identifier
    Identifier,
}

fn segments(query: &str) -> Vec<Segment<'_>> {
    let bytes = query.as_bytes();
    let mut out = Vec::new();
    let mut start = 0;
    let mut quote = Quote::None;
    let mut i = 0;

    while i < bytes.len() {
        match (quote, bytes[i]) {
            (Quote::None, b'\'') => {
                quote = if starts_escape_string(bytes, i) {
                    Quote::Escaped
                } else {
                    Quote::Literal
                };
            }
            (Quote::None, b'"') => quote = Quote::Identifier,
            (Quote::None, b'?') => {
                if start < i {
                    out.push(Segment::Text(&query[start..i]));
                }
                if bytes.get(i + 1) == Some(&b'?') {
                    out.push(Segment::Escaped);
                    i += 1;
                } else {
                    out.push(Segment::Placeholder);
                }
                start = i + 1;
            }
            (Quote::Escaped, b'\\') => i += 1,
            (Quote::Literal | Quote::Escaped, b'\'') | (Quote::Identifier, b'"') => {
                quote = Quote::None;
            }
            _ => {}
        }
        i += 1;
    }

    if start < bytes.len() {
        out.push(Segment::Text(&query[start..]));
    }
    out
}

/// Whether the quote at `at` opens an `E'...'` string.
fn starts_escape_string(bytes: &[u8], at: usize) -> bool {
    match at.checked_sub(1).map(|p| bytes[p]) {
        Some(b'e' | b'E') => !matches!(
            at.checked_sub(2).map(|p| bytes[p]),
            Some(b) if b.is_ascii_alphanumeric() || b == b'_'
        ),
        _ => false,
    }
}

/// Expand list arguments into one `?` per element and flatten the arguments.
///
/// Queries with no list argument are returned untouched.
pub fn expand(query: &str, args: &[InArg]) -> Result<(String, Vec<SqlValue>)> {
    let mut any_list = false;
    for arg in args {
        if let InArg::List(values) = arg {
            if values.is_empty() {
                return Err(TxError::MissingArgsError);
            }
            any_list = true;
        }
    }

    if !any_list {
        let flat = args
            .iter()
            .filter_map(|a| match a {
                InArg::Value(v) => Some(v.clone()),
                InArg::List(_) => None,
            })
            .collect();
        return Ok((query.to_string(), flat));
    }

    let mut sql = String::with_capacity(query.len() + 16);
    let mut flat = Vec::new();
    let mut next = 0;

    for segment in segments(query) {
        match segment {
            Segment::Text(text) => sql.push_str(text),
            Segment::Escaped => sql.push_str("??"),
            Segment::Placeholder => {
                let arg = args.get(next).ok_or_else(|| {
                    TxError::InClauseError("number of bindVars exceeds arguments".to_string())
                })?;
                next += 1;
                match arg {
                    InArg::Value(v) => {
                        sql.push('?');
                        flat.push(v.clone());
                    }
                    InArg::List(values) => {
                        sql.push_str(&vec!["?"; values.len()].join(", "));
                        flat.extend(values.iter().cloned());
                    }
                }
            }
        }
    }

    if next < args.len() {
        return Err(TxError::InClauseError(
            "number of bindVars less than number arguments".to_string(),
        ));
    }

    Ok((sql, flat))
}

/// Rewrite `?` placeholders into the given bind style.
pub fn rebind(style: BindStyle, query: &str) -> String {
    match style {
        BindStyle::Question => query.to_string(),
        BindStyle::Dollar => {
            let mut sql = String::with_capacity(query.len() + 8);
            let mut n = 0;
            for segment in segments(query) {
                match segment {
                    Segment::Text(text) => sql.push_str(text),
                    Segment::Escaped => sql.push('?'),
                    Segment::Placeholder => {
                        n += 1;
                        sql.push('$');
                        sql.push_str(&n.to_string());
                    }
                }
            }
            sql
        }
    }
}

/// Expand and rebind in one step.
pub fn in_clause_query_with(
    style: BindStyle,
    query: &str,
    args: &[InArg],
) -> Result<(String, Vec<SqlValue>)> {
    let (sql, flat) = expand(query, args)?;
    Ok((rebind(style, &sql), flat))
}

/// Prepare a query whose single placeholder takes the whole argument list,
/// numbered for PostgreSQL.
pub fn in_clause_query(query: &str, args: &[SqlValue]) -> Result<(String, Vec<SqlValue>)> {
    in_clause_query_with(BindStyle::Dollar, query, &[InArg::from(args)])
}

/// Two-list variant for queries with two IN clauses. Placeholders are numbered
/// sequentially across both lists.
pub fn in_clause_query_two_params(
    query: &str,
    arg_one: &[SqlValue],
    arg_two: &[SqlValue],
) -> Result<(String, Vec<SqlValue>)> {
    in_clause_query_with(
        BindStyle::Dollar,
        query,
        &[InArg::from(arg_one), InArg::from(arg_two)],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> SqlValue {
        SqlValue::from(s)
    }

    #[test]
    fn test_in_clause_query() {
        let (sql, args) =
            in_clause_query("select * from test where key = ?", &[text("aaa")]).unwrap();
        assert_eq!(sql, "select * from test where key = $1");
        assert_eq!(args, vec![text("aaa")]);
    }

    #[test]
    fn test_in_clause_query_expands_list() {
        let (sql, args) = in_clause_query(
            "select * from test where key in (?)",
            &[text("a"), text("b"), text("c")],
        )
        .unwrap();
        assert_eq!(sql, "select * from test where key in ($1, $2, $3)");
        assert_eq!(args.len(), 3);
    }

    #[test]
    fn test_in_clause_query_with_error() {
        let err = in_clause_query("select * from test where key = ?", &[]).unwrap_err();
        assert!(matches!(err, TxError::MissingArgsError));
    }

    #[test]
    fn test_in_clause_query_two_params() {
        let (sql, args) = in_clause_query_two_params(
            "select * from test where key = ? and p=?",
            &[text("aaa")],
            &[text("bbb")],
        )
        .unwrap();
        assert_eq!(sql, "select * from test where key = $1 and p=$2");
        assert_eq!(args, vec![text("aaa"), text("bbb")]);
    }

    #[test]
    fn test_two_params_numbering_continues_across_lists() {
        let (sql, args) = in_clause_query_two_params(
            "select * from t where a in (?) and b in (?)",
            &[text("1"), text("2")],
            &[text("3"), text("4"), text("5")],
        )
        .unwrap();
        assert_eq!(
            sql,
            "select * from t where a in ($1, $2) and b in ($3, $4, $5)"
        );
        assert_eq!(args.len(), 5);
    }

    #[test]
    fn test_mixed_scalar_and_list() {
        let (sql, args) = expand(
            "update t set flag = ? where id in (?)",
            &[
                InArg::Value(SqlValue::Bool(true)),
                InArg::List(vec![SqlValue::Int(1), SqlValue::Int(2)]),
            ],
        )
        .unwrap();
        assert_eq!(sql, "update t set flag = ? where id in (?, ?)");
        assert_eq!(
            args,
            vec![SqlValue::Bool(true), SqlValue::Int(1), SqlValue::Int(2)]
        );
    }

    #[test]
    fn test_placeholder_count_mismatch() {
        let err = expand("select ? , ?", &[InArg::List(vec![text("a")])]).unwrap_err();
        assert!(matches!(err, TxError::InClauseError(_)));

        let err = expand(
            "select ?",
            &[InArg::List(vec![text("a")]), InArg::List(vec![text("b")])],
        )
        .unwrap_err();
        assert!(matches!(err, TxError::InClauseError(_)));
    }

    #[test]
    fn test_no_list_passes_through() {
        let (sql, args) = expand("select ?", &[InArg::Value(SqlValue::Int(1))]).unwrap();
        assert_eq!(sql, "select ?");
        assert_eq!(args, vec![SqlValue::Int(1)]);
    }

    #[test]
    fn test_rebind_skips_literals_and_escapes() {
        assert_eq!(
            rebind(BindStyle::Dollar, "select '?' , ? where data ?? 'k' and x = ?"),
            "select '?' , $1 where data ? 'k' and x = $2"
        );
        assert_eq!(rebind(BindStyle::Question, "a = ?"), "a = ?");
    }

    #[test]
    fn test_rebind_escape_strings_and_quoted_identifiers() {
        assert_eq!(
            rebind(BindStyle::Dollar, r"select E'it\'s' , ? , ?"),
            r"select E'it\'s' , $1 , $2"
        );
        assert_eq!(
            rebind(BindStyle::Dollar, r#"select "a?" from t where b = ?"#),
            r#"select "a?" from t where b = $1"#
        );
        assert_eq!(
            rebind(BindStyle::Dollar, r"select 'it''s?' , e'\\' , ?"),
            r"select 'it''s?' , e'\\' , $1"
        );
        // backslash is an ordinary character in a plain literal
        assert_eq!(
            rebind(BindStyle::Dollar, r"where name='a\' and x = ?"),
            r"where name='a\' and x = $1"
        );
    }

    #[test]
    fn test_escape_string_prefix_must_stand_alone() {
        assert!(starts_escape_string(b"select E'", 8));
        assert!(starts_escape_string(b"e'", 1));
        assert!(!starts_escape_string(b"where type'", 10));
        assert!(!starts_escape_string(b"'", 0));
    }
}
