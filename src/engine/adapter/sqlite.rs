//! SQLite Store
//!
//! Implements LocalStore for SQLite using rusqlite + r2d2 connection pooling.

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::{Value, ValueRef};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::{AdapterError, AdapterResult, Cursor, LocalStore, RowValues, SqlValue};
use crate::engine::record::RowSchema;

type DbPool = Pool<SqliteConnectionManager>;
type DbConn = PooledConnection<SqliteConnectionManager>;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub struct SqliteStore {
    pool: DbPool,
    db_path: PathBuf,
}

impl SqliteStore {
    pub fn new(db_path: &Path) -> AdapterResult<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let manager = SqliteConnectionManager::file(db_path).with_init(|conn| {
            conn.busy_timeout(BUSY_TIMEOUT)?;
            conn.execute_batch("PRAGMA foreign_keys=ON")
        });
        let pool = Pool::builder()
            .max_size(10)
            .build(manager)
            .map_err(|e| AdapterError::Connection(e.to_string()))?;

        let store = Self {
            pool,
            db_path: db_path.to_path_buf(),
        };
        store.init_journal()?;
        Ok(store)
    }

    /// A private in-memory database. The pool holds a single connection so
    /// every call sees the same data.
    pub fn in_memory() -> AdapterResult<Self> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(|e| AdapterError::Connection(e.to_string()))?;

        Ok(Self {
            pool,
            db_path: PathBuf::from(":memory:"),
        })
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn init_journal(&self) -> AdapterResult<()> {
        let conn = self.get_conn()?;
        let _: String = conn
            .query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))
            .map_err(|e| AdapterError::Schema(e.to_string()))?;
        Ok(())
    }

    fn get_conn(&self) -> AdapterResult<DbConn> {
        self.pool
            .get()
            .map_err(|e| AdapterError::Connection(e.to_string()))
    }

    fn value_ref_to_sql(val: ValueRef<'_>) -> SqlValue {
        match val {
            ValueRef::Null => SqlValue::Null,
            ValueRef::Integer(i) => SqlValue::Integer(i),
            ValueRef::Real(f) => SqlValue::Real(f),
            ValueRef::Text(t) => SqlValue::Text(String::from_utf8_lossy(t).to_string()),
            ValueRef::Blob(b) => SqlValue::Blob(b.to_vec()),
        }
    }

    fn sql_to_value(val: &SqlValue) -> Value {
        match val {
            SqlValue::Null => Value::Null,
            SqlValue::Integer(i) => Value::Integer(*i),
            SqlValue::Real(f) => Value::Real(*f),
            SqlValue::Text(s) => Value::Text(s.clone()),
            SqlValue::Bool(b) => Value::Integer(i64::from(*b)),
            SqlValue::Blob(b) => Value::Blob(b.clone()),
        }
    }

    fn bind_params<'a>(values: impl Iterator<Item = &'a SqlValue>, args: &[String]) -> Vec<Value> {
        values
            .map(Self::sql_to_value)
            .chain(args.iter().map(|a| Value::Text(a.clone())))
            .collect()
    }
}

fn non_blank(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}

/// Sort expressions may carry a trailing `LIMIT n`, or be only a limit
fn order_clause(sort: Option<&str>) -> String {
    match non_blank(sort) {
        None => String::new(),
        Some(s) if s.get(..6).is_some_and(|p| p.eq_ignore_ascii_case("limit ")) => format!(" {}", s),
        Some(s) => format!(" ORDER BY {}", s),
    }
}

fn where_clause(selection: Option<&str>) -> String {
    match non_blank(selection) {
        Some(s) => format!(" WHERE {}", s),
        None => String::new(),
    }
}

fn select_sql(
    table: &str,
    columns: Option<&[String]>,
    selection: Option<&str>,
    group_by: Option<&str>,
    sort: Option<&str>,
) -> String {
    let cols = match columns {
        Some(cols) if !cols.is_empty() => cols.join(", "),
        _ => "*".to_string(),
    };
    let mut sql = format!("SELECT {} FROM \"{}\"{}", cols, table, where_clause(selection));
    if let Some(group_by) = non_blank(group_by) {
        sql.push_str(" GROUP BY ");
        sql.push_str(group_by);
    }
    sql.push_str(&order_clause(sort));
    sql
}

impl LocalStore for SqliteStore {
    fn ensure_table(&self, table: &str, schema: &RowSchema) -> AdapterResult<()> {
        let mut defs = Vec::with_capacity(schema.columns.len() + 1);
        if let Some(identity) = schema.identity {
            defs.push(format!("\"{}\" INTEGER PRIMARY KEY AUTOINCREMENT", identity));
        }
        for col in schema.columns {
            if Some(col.name) == schema.identity {
                continue;
            }
            defs.push(format!("\"{}\" {}", col.name, col.kind.sql_type()));
        }
        if defs.is_empty() {
            return Err(AdapterError::Schema(format!(
                "row type '{}' declares no columns for table '{}'",
                schema.name, table
            )));
        }

        let conn = self.get_conn()?;
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS \"{}\" ({})",
            table,
            defs.join(", ")
        ))
        .map_err(|e| AdapterError::Schema(e.to_string()))
    }

    fn query(
        &self,
        table: &str,
        columns: Option<&[String]>,
        selection: Option<&str>,
        args: &[String],
        group_by: Option<&str>,
        sort: Option<&str>,
    ) -> AdapterResult<Cursor> {
        let conn = self.get_conn()?;
        let sql = select_sql(table, columns, selection, group_by, sort);

        let mut stmt = conn.prepare(&sql).map_err(|e| {
            let message = e.to_string();
            if message.contains("no such table") {
                AdapterError::NotFound(message)
            } else {
                AdapterError::Query(message)
            }
        })?;
        let column_names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
        let width = column_names.len();

        let rows = stmt
            .query_map(rusqlite::params_from_iter(args.iter()), |row| {
                let mut vals = Vec::with_capacity(width);
                for i in 0..width {
                    vals.push(Self::value_ref_to_sql(row.get_ref(i)?));
                }
                Ok(vals)
            })
            .map_err(|e| AdapterError::Query(e.to_string()))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| AdapterError::Query(e.to_string()))?;

        Ok(Cursor::new(column_names, rows))
    }

    fn insert(&self, table: &str, values: &RowValues) -> AdapterResult<i64> {
        let conn = self.get_conn()?;

        let sql = if values.is_empty() {
            format!("INSERT INTO \"{}\" DEFAULT VALUES", table)
        } else {
            let col_names: Vec<String> = values.keys().map(|c| format!("\"{}\"", c)).collect();
            let placeholders = vec!["?"; values.len()];
            format!(
                "INSERT INTO \"{}\" ({}) VALUES ({})",
                table,
                col_names.join(", "),
                placeholders.join(", ")
            )
        };

        let params = Self::bind_params(values.values(), &[]);
        conn.execute(&sql, rusqlite::params_from_iter(params.iter()))
            .map_err(|e| AdapterError::Query(e.to_string()))?;

        Ok(conn.last_insert_rowid())
    }

    fn update(
        &self,
        table: &str,
        values: &RowValues,
        selection: Option<&str>,
        args: &[String],
    ) -> AdapterResult<u64> {
        if values.is_empty() {
            return Ok(0);
        }
        let conn = self.get_conn()?;

        let set_clauses: Vec<String> = values.keys().map(|k| format!("\"{}\" = ?", k)).collect();
        let sql = format!(
            "UPDATE \"{}\" SET {}{}",
            table,
            set_clauses.join(", "),
            where_clause(selection)
        );

        let params = Self::bind_params(values.values(), args);
        let affected = conn
            .execute(&sql, rusqlite::params_from_iter(params.iter()))
            .map_err(|e| AdapterError::Query(e.to_string()))?;

        Ok(affected as u64)
    }

    fn delete(&self, table: &str, selection: Option<&str>, args: &[String]) -> AdapterResult<u64> {
        let conn = self.get_conn()?;
        let sql = format!("DELETE FROM \"{}\"{}", table, where_clause(selection));
        let affected = conn
            .execute(&sql, rusqlite::params_from_iter(args.iter()))
            .map_err(|e| AdapterError::Query(e.to_string()))?;
        Ok(affected as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::record::ColumnDef;

    static ITEM: RowSchema = RowSchema::new(
        "item",
        &[ColumnDef::integer("_id"), ColumnDef::text("name"), ColumnDef::integer("qty")],
    )
    .with_identity("_id");

    fn values(name: &str, qty: i64) -> RowValues {
        let mut v = RowValues::new();
        v.insert("name".into(), name.into());
        v.insert("qty".into(), qty.into());
        v
    }

    #[test]
    fn test_order_clause() {
        assert_eq!(order_clause(None), "");
        assert_eq!(order_clause(Some("  ")), "");
        assert_eq!(order_clause(Some("name ASC")), " ORDER BY name ASC");
        assert_eq!(order_clause(Some("name ASC LIMIT 2")), " ORDER BY name ASC LIMIT 2");
        assert_eq!(order_clause(Some("LIMIT 1")), " LIMIT 1");
    }

    #[test]
    fn test_crud_roundtrip() {
        let store = SqliteStore::in_memory().unwrap();
        store.ensure_table("items", &ITEM).unwrap();
        store.ensure_table("items", &ITEM).unwrap();

        let a = store.insert("items", &values("apple", 3)).unwrap();
        let b = store.insert("items", &values("pear", 5)).unwrap();
        assert!(a > 0 && b > a);

        // Text arguments compare against integer columns through affinity
        let cursor = store
            .query("items", None, Some("_id = ?"), &[b.to_string()], None, None)
            .unwrap();
        assert_eq!(cursor.count(), 1);
        assert_eq!(cursor.row(0).unwrap().get_string("name").as_deref(), Some("pear"));

        let updated = store
            .update("items", &values("plum", 9), Some("qty > ?"), &["4".to_string()])
            .unwrap();
        assert_eq!(updated, 1);

        let deleted = store.delete("items", None, &[]).unwrap();
        assert_eq!(deleted, 2);
    }

    #[test]
    fn test_missing_table_is_not_found() {
        let store = SqliteStore::in_memory().unwrap();
        let err = store.query("ghosts", None, None, &[], None, None).unwrap_err();
        assert!(matches!(err, AdapterError::NotFound(_)));
    }

    #[test]
    fn test_limit_only_sort() {
        let store = SqliteStore::in_memory().unwrap();
        store.ensure_table("items", &ITEM).unwrap();
        for i in 0..4 {
            store.insert("items", &values("x", i)).unwrap();
        }
        let cursor = store
            .query("items", Some(&["qty".to_string()]), None, &[], None, Some("LIMIT 2"))
            .unwrap();
        assert_eq!(cursor.count(), 2);
        assert_eq!(cursor.columns, vec!["qty"]);
    }

    #[test]
    fn test_file_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::new(&dir.path().join("data").join("q.db")).unwrap();
        store.ensure_table("items", &ITEM).unwrap();
        assert_eq!(store.insert("items", &values("fig", 1)).unwrap(), 1);
    }
}
