//! Engine-level building blocks: the SQLite value type, compiled statements,
//! and the code that runs a statement against a connection and shapes the
//! response.

use std::fmt::{self, Write as _};
use std::sync::Arc;

use rusqlite::types::{ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params_from_iter, Connection};

use crate::error::Result;

/// Core value types for SQLite operations
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Writes the value as a SQL literal.
    pub fn write_literal(&self, out: &mut String) {
        match self {
            SqlValue::Null => out.push_str("NULL"),
            SqlValue::Integer(n) => {
                let _ = write!(out, "{n}");
            }
            SqlValue::Real(f) if f.is_finite() => {
                let _ = write!(out, "{f:?}");
            }
            SqlValue::Real(_) => out.push_str("NULL"),
            SqlValue::Text(s) => {
                out.push('\'');
                out.push_str(&s.replace('\'', "''"));
                out.push('\'');
            }
            SqlValue::Blob(bytes) => {
                out.push_str("X'");
                for b in bytes {
                    let _ = write!(out, "{b:02X}");
                }
                out.push('\'');
            }
        }
    }

    pub fn to_literal(&self) -> String {
        let mut out = String::new();
        self.write_literal(&mut out);
        out
    }
}

impl From<i64> for SqlValue {
    fn from(n: i64) -> Self {
        SqlValue::Integer(n)
    }
}

impl From<f64> for SqlValue {
    fn from(f: f64) -> Self {
        SqlValue::Real(f)
    }
}

impl From<bool> for SqlValue {
    fn from(b: bool) -> Self {
        SqlValue::Integer(b as i64)
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

impl From<ValueRef<'_>> for SqlValue {
    fn from(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => SqlValue::Null,
            ValueRef::Integer(n) => SqlValue::Integer(n),
            ValueRef::Real(f) => SqlValue::Real(f),
            ValueRef::Text(t) => SqlValue::Text(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(b) => SqlValue::Blob(b.to_vec()),
        }
    }
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            SqlValue::Null => ToSqlOutput::Borrowed(ValueRef::Null),
            SqlValue::Integer(n) => ToSqlOutput::Borrowed(ValueRef::Integer(*n)),
            SqlValue::Real(f) => ToSqlOutput::Borrowed(ValueRef::Real(*f)),
            SqlValue::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            SqlValue::Blob(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
        })
    }
}

/// Positional parameter bindings for SQL statements
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Params {
    pub values: Vec<SqlValue>,
}

impl Params {
    /// Create a new Params object
    pub fn new() -> Self {
        Self::default()
    }
    /// Append a positional value
    pub fn with_value(mut self, value: impl Into<SqlValue>) -> Self {
        self.values.push(value.into());
        self
    }
    pub fn push(&mut self, value: SqlValue) {
        self.values.push(value);
    }
    pub fn len(&self) -> usize {
        self.values.len()
    }
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
    pub fn iter(&self) -> std::slice::Iter<'_, SqlValue> {
        self.values.iter()
    }
}

/// SQL statement with typed parameters
#[derive(Debug, Clone, PartialEq)]
pub struct SqlQuery {
    pub statement: String,
    pub params: Params,
}

impl SqlQuery {
    pub fn new(statement: &str) -> Self {
        Self {
            statement: statement.to_string(),
            params: Params::new(),
        }
    }
    pub fn with_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    /// First keyword of the statement, lowercased (`select`, `insert`, ...).
    pub fn action(&self) -> String {
        self.statement
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase()
    }

    /// True when the statement modifies rows and reports an affected count.
    pub fn is_mutation(&self) -> bool {
        matches!(self.action().as_str(), "insert" | "update" | "delete")
    }
}

/// Renders the statement with its parameters inlined as literals.
impl fmt::Display for SqlQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::with_capacity(self.statement.len());
        let mut params = self.params.iter();
        let mut quote: Option<char> = None;
        for c in self.statement.chars() {
            match (quote, c) {
                (Some(q), c) if c == q => {
                    quote = None;
                    out.push(c);
                }
                (Some(_), c) => out.push(c),
                (None, '\'' | '"') => {
                    quote = Some(c);
                    out.push(c);
                }
                (None, '?') => match params.next() {
                    Some(value) => value.write_literal(&mut out),
                    None => out.push('?'),
                },
                (None, c) => out.push(c),
            }
        }
        f.write_str(&out)
    }
}

/// What the caller expects back from a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseShape {
    /// A row set.
    Rows,
    /// An affected-row count.
    Affected,
    /// Whether the statement produced any row.
    Exists,
}

/// A single result row, keyed by column name.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<SqlValue>,
}

impl Row {
    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|i| &self.values[i])
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[SqlValue] {
        &self.values
    }

    /// Removes a column's value from the row, leaving `NULL` behind.
    pub fn take(&mut self, column: &str) -> Option<SqlValue> {
        let i = self.columns.iter().position(|c| c == column)?;
        Some(std::mem::replace(&mut self.values[i], SqlValue::Null))
    }

    pub fn into_pairs(self) -> Vec<(String, SqlValue)> {
        self.columns.iter().cloned().zip(self.values).collect()
    }
}

/// Columnar result of a query, as the engine hands it back.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub values: Vec<Vec<SqlValue>>,
}

impl ResultSet {
    /// Reshapes the columnar form into one record per row, in row order.
    pub fn into_rows(self) -> Vec<Row> {
        let columns: Arc<[String]> = self.columns.into();
        self.values
            .into_iter()
            .map(|values| Row {
                columns: Arc::clone(&columns),
                values,
            })
            .collect()
    }
}

/// The shaped answer to a statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Rows(Vec<Row>),
    Affected(usize),
    Exists(bool),
}

impl Response {
    pub fn into_rows(self) -> Vec<Row> {
        match self {
            Response::Rows(rows) => rows,
            _ => Vec::new(),
        }
    }

    pub fn affected(&self) -> usize {
        match self {
            Response::Affected(n) => *n,
            Response::Rows(rows) => rows.len(),
            Response::Exists(_) => 0,
        }
    }

    pub fn exists(&self) -> bool {
        match self {
            Response::Exists(b) => *b,
            Response::Rows(rows) => !rows.is_empty(),
            Response::Affected(n) => *n > 0,
        }
    }
}

/// Runs a row-returning statement and collects it in columnar form.
pub(crate) fn query_columnar(conn: &Connection, query: &SqlQuery) -> Result<ResultSet> {
    let mut stmt = conn.prepare(&query.statement)?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let mut rows = stmt.query(params_from_iter(query.params.iter()))?;

    let mut values = Vec::new();
    while let Some(row) = rows.next()? {
        let mut line = Vec::with_capacity(columns.len());
        for i in 0..columns.len() {
            line.push(SqlValue::from(row.get_ref(i)?));
        }
        values.push(line);
    }
    Ok(ResultSet { columns, values })
}

/// Executes `query` on `conn` and shapes the result as requested.
///
/// For non-row statements the affected count is only meaningful after
/// `insert`/`update`/`delete`; SQLite keeps reporting the previous statement's
/// count after DDL, so anything else reports zero.
pub(crate) fn execute_on(
    conn: &Connection,
    query: &SqlQuery,
    shape: ResponseShape,
) -> Result<Response> {
    match shape {
        ResponseShape::Rows => Ok(Response::Rows(query_columnar(conn, query)?.into_rows())),
        ResponseShape::Exists => Ok(Response::Exists(
            !query_columnar(conn, query)?.values.is_empty(),
        )),
        ResponseShape::Affected => {
            let changed = conn.execute(&query.statement, params_from_iter(query.params.iter()))?;
            Ok(Response::Affected(if query.is_mutation() { changed } else { 0 }))
        }
    }
}
