//! Backend Adapter Layer
//!
//! Provides the two storage surfaces a query can execute against: a local
//! relational store addressed by table name, and a remote content endpoint
//! addressed by `content://` resource identifiers.

pub mod content;
pub mod sqlite;

pub use content::{ContentUri, HttpContentResolver};
pub use sqlite::SqliteStore;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::error::{QueryError, Result};
use super::record::RowSchema;

/// Universal result type for adapter operations
pub type AdapterResult<T> = std::result::Result<T, AdapterError>;

/// Column name to value map written by INSERT and UPDATE
pub type RowValues = BTreeMap<String, SqlValue>;

/// Local relational backend, addressed by table name
pub trait LocalStore: Send + Sync {
    /// Create the table for a row schema if it does not exist yet
    fn ensure_table(&self, table: &str, schema: &RowSchema) -> AdapterResult<()>;

    /// Run a SELECT. `columns` of `None` selects every column.
    fn query(
        &self,
        table: &str,
        columns: Option<&[String]>,
        selection: Option<&str>,
        args: &[String],
        group_by: Option<&str>,
        sort: Option<&str>,
    ) -> AdapterResult<Cursor>;

    /// Insert a row and return the new row identity
    fn insert(&self, table: &str, values: &RowValues) -> AdapterResult<i64>;

    /// Update matching rows, returning the affected count
    fn update(
        &self,
        table: &str,
        values: &RowValues,
        selection: Option<&str>,
        args: &[String],
    ) -> AdapterResult<u64>;

    /// Delete matching rows, returning the affected count
    fn delete(&self, table: &str, selection: Option<&str>, args: &[String]) -> AdapterResult<u64>;
}

/// Remote content endpoint, addressed by resource identifier
pub trait ContentResolver: Send + Sync {
    /// Run a query. `None` means the provider produced no result at all.
    fn query(
        &self,
        uri: &ContentUri,
        projection: Option<&[String]>,
        selection: Option<&str>,
        args: &[String],
        sort: Option<&str>,
    ) -> AdapterResult<Option<Cursor>>;

    /// Insert a row. `None` means the provider refused it.
    fn insert(&self, uri: &ContentUri, values: &RowValues) -> AdapterResult<Option<ContentUri>>;

    fn update(
        &self,
        uri: &ContentUri,
        values: &RowValues,
        selection: Option<&str>,
        args: &[String],
    ) -> AdapterResult<u64>;

    fn delete(&self, uri: &ContentUri, selection: Option<&str>, args: &[String]) -> AdapterResult<u64>;
}

/// SQL value for parameterized statements and result cells
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Bool(bool),
    Blob(Vec<u8>),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::Integer(i) => Some(*i),
            SqlValue::Bool(b) => Some(i64::from(*b)),
            SqlValue::Real(f) => Some(*f as i64),
            SqlValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SqlValue::Integer(i) => Some(*i as f64),
            SqlValue::Real(f) => Some(*f),
            SqlValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            SqlValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SqlValue::Bool(b) => Some(*b),
            SqlValue::Integer(i) => Some(*i != 0),
            _ => None,
        }
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Integer(v)
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        SqlValue::Integer(i64::from(v))
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::Real(v)
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Bool(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<Vec<u8>> for SqlValue {
    fn from(v: Vec<u8>) -> Self {
        SqlValue::Blob(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(SqlValue::Null, Into::into)
    }
}

/// A fully materialized result set.
///
/// Rows are read while the backend handle is held and the handle is released
/// before the cursor is returned, so a cursor never pins a connection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Cursor {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<SqlValue>>,
}

impl Cursor {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<SqlValue>>) -> Self {
        Self { columns, rows }
    }

    pub fn count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn row(&self, position: usize) -> Option<CursorRow<'_>> {
        self.rows.get(position).map(|values| CursorRow {
            columns: &self.columns,
            values,
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = CursorRow<'_>> {
        self.rows.iter().map(|values| CursorRow {
            columns: &self.columns,
            values,
        })
    }
}

/// One row of a [`Cursor`]
#[derive(Debug, Clone, Copy)]
pub struct CursorRow<'a> {
    columns: &'a [String],
    values: &'a [SqlValue],
}

impl<'a> CursorRow<'a> {
    pub fn columns(&self) -> &'a [String] {
        self.columns
    }

    pub fn get(&self, column: &str) -> Option<&'a SqlValue> {
        let index = self.columns.iter().position(|c| c == column)?;
        self.values.get(index)
    }

    pub fn get_i64(&self, column: &str) -> Option<i64> {
        self.get(column).and_then(SqlValue::as_i64)
    }

    pub fn get_f64(&self, column: &str) -> Option<f64> {
        self.get(column).and_then(SqlValue::as_f64)
    }

    pub fn get_bool(&self, column: &str) -> Option<bool> {
        self.get(column).and_then(SqlValue::as_bool)
    }

    pub fn get_string(&self, column: &str) -> Option<String> {
        match self.get(column)? {
            SqlValue::Text(s) => Some(s.clone()),
            SqlValue::Integer(i) => Some(i.to_string()),
            SqlValue::Real(f) => Some(f.to_string()),
            _ => None,
        }
    }

    pub fn get_blob(&self, column: &str) -> Option<Vec<u8>> {
        match self.get(column)? {
            SqlValue::Blob(b) => Some(b.clone()),
            _ => None,
        }
    }

    pub fn require_i64(&self, column: &str) -> Result<i64> {
        self.get_i64(column)
            .ok_or_else(|| QueryError::Mapping(format!("column '{}' is missing or not an integer", column)))
    }

    pub fn require_string(&self, column: &str) -> Result<String> {
        self.get_string(column)
            .ok_or_else(|| QueryError::Mapping(format!("column '{}' is missing or not text", column)))
    }

    /// Every cell of this row keyed by column name
    pub fn to_values(&self) -> RowValues {
        self.columns
            .iter()
            .cloned()
            .zip(self.values.iter().cloned())
            .collect()
    }
}

/// Backend adapter errors
#[derive(Debug)]
pub enum AdapterError {
    Connection(String),
    Query(String),
    Schema(String),
    NotFound(String),
    Validation(String),
    Internal(String),
}

impl fmt::Display for AdapterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdapterError::Connection(e) => write!(f, "Connection error: {}", e),
            AdapterError::Query(e) => write!(f, "Query error: {}", e),
            AdapterError::Schema(e) => write!(f, "Schema error: {}", e),
            AdapterError::NotFound(e) => write!(f, "Not found: {}", e),
            AdapterError::Validation(e) => write!(f, "Validation error: {}", e),
            AdapterError::Internal(e) => write!(f, "Internal error: {}", e),
        }
    }
}

impl std::error::Error for AdapterError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_row_getters() {
        let cursor = Cursor::new(
            vec!["_id".to_string(), "name".to_string(), "active".to_string()],
            vec![vec![SqlValue::Integer(7), SqlValue::Text("Alice".into()), SqlValue::Integer(1)]],
        );

        let row = cursor.row(0).unwrap();
        assert_eq!(row.get_i64("_id"), Some(7));
        assert_eq!(row.get_string("name").as_deref(), Some("Alice"));
        assert_eq!(row.get_bool("active"), Some(true));
        assert!(row.get("missing").is_none());
        assert!(row.require_i64("name").is_err());
        assert!(cursor.row(1).is_none());
    }

    #[test]
    fn test_sql_value_json_shape() {
        let values = vec![SqlValue::Null, SqlValue::Integer(3), SqlValue::Real(1.5), SqlValue::Text("x".into())];
        let json = serde_json::to_string(&values).unwrap();
        assert_eq!(json, r#"[null,3,1.5,"x"]"#);

        let back: Vec<SqlValue> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, values);
    }
}
