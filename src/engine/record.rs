//! Typed row records
//!
//! Row types describe themselves through a static [`RowSchema`] and the
//! [`Record`] trait instead of runtime field discovery. Foreign-key fields
//! hold their child rows in a [`Children`] value, which the cascade engine
//! reaches through the object-safe [`ForeignChildren`] trait.

use super::adapter::{CursorRow, RowValues, SqlValue};
use super::context::QueryContext;
use super::error::Result;

/// Storage class of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Integer,
    Real,
    Text,
    Blob,
    Boolean,
}

impl ColumnKind {
    pub fn sql_type(&self) -> &'static str {
        match self {
            ColumnKind::Integer | ColumnKind::Boolean => "INTEGER",
            ColumnKind::Real => "REAL",
            ColumnKind::Text => "TEXT",
            ColumnKind::Blob => "BLOB",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: &'static str,
    pub kind: ColumnKind,
}

impl ColumnDef {
    pub const fn new(name: &'static str, kind: ColumnKind) -> Self {
        Self { name, kind }
    }

    pub const fn integer(name: &'static str) -> Self {
        Self::new(name, ColumnKind::Integer)
    }

    pub const fn real(name: &'static str) -> Self {
        Self::new(name, ColumnKind::Real)
    }

    pub const fn text(name: &'static str) -> Self {
        Self::new(name, ColumnKind::Text)
    }

    pub const fn boolean(name: &'static str) -> Self {
        Self::new(name, ColumnKind::Boolean)
    }

    pub const fn blob(name: &'static str) -> Self {
        Self::new(name, ColumnKind::Blob)
    }
}

/// A one-to-many relation declared on a parent row type.
///
/// `field` names the parent's [`Children`] field, `table` the child table and
/// `column` the child column holding the parent identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForeignKey {
    pub field: &'static str,
    pub table: &'static str,
    pub column: &'static str,
}

impl ForeignKey {
    pub const fn new(field: &'static str, table: &'static str, column: &'static str) -> Self {
        Self { field, table, column }
    }
}

/// Static description of a row type
#[derive(Debug)]
pub struct RowSchema {
    pub name: &'static str,
    pub columns: &'static [ColumnDef],
    pub identity: Option<&'static str>,
    pub foreign_keys: &'static [ForeignKey],
}

impl RowSchema {
    pub const fn new(name: &'static str, columns: &'static [ColumnDef]) -> Self {
        Self {
            name,
            columns,
            identity: None,
            foreign_keys: &[],
        }
    }

    pub const fn with_identity(self, column: &'static str) -> Self {
        Self {
            identity: Some(column),
            ..self
        }
    }

    pub const fn with_foreign_keys(self, foreign_keys: &'static [ForeignKey]) -> Self {
        Self { foreign_keys, ..self }
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.to_string()).collect()
    }
}

/// A row type the engine can read and write
pub trait Record: Sized + Send + 'static {
    fn schema() -> &'static RowSchema;

    /// Column values of this row. Foreign-key fields are not columns.
    fn to_values(&self) -> RowValues;

    fn from_row(row: &CursorRow<'_>) -> Result<Self>;

    /// Identity value, 0 when the row was never stored
    fn identity(&self) -> i64 {
        0
    }

    fn set_identity(&mut self, _id: i64) {}

    /// Store a parent identity into the given column. Returns false when the
    /// row has no such integer column.
    fn set_foreign_key(&mut self, _column: &str, _parent_id: i64) -> bool {
        false
    }

    fn foreign_children(&mut self, _field: &str) -> Option<&mut dyn ForeignChildren> {
        None
    }
}

/// Columns selected when a query has no explicit projection
pub fn derive_projection(schema: &RowSchema) -> Vec<String> {
    schema.column_names()
}

pub fn derive_distinct_projection(columns: &[String]) -> Vec<String> {
    columns
        .iter()
        .enumerate()
        .map(|(i, c)| if i == 0 { format!("DISTINCT {}", c) } else { c.clone() })
        .collect()
}

/// Values written for a row. The identity column is never written by an
/// update and only written by an insert when it already holds a positive id.
pub fn row_values<R: Record>(row: &R, columns: Option<&[String]>, for_update: bool) -> RowValues {
    let mut values = row.to_values();
    if let Some(identity) = R::schema().identity {
        let assigned = values
            .get(identity)
            .and_then(SqlValue::as_i64)
            .is_some_and(|id| id > 0);
        if for_update || !assigned {
            values.remove(identity);
        }
    }
    if let Some(columns) = columns {
        values.retain(|k, _| columns.iter().any(|c| c == k));
    }
    values
}

/// Child rows held by a foreign-key field
#[derive(Debug, Clone, PartialEq)]
pub enum Children<C> {
    Empty,
    Single(C),
    Many(Vec<C>),
    Lazy(LazyChildren<C>),
}

impl<C> Children<C> {
    pub fn as_slice(&self) -> &[C] {
        match self {
            Children::Empty => &[],
            Children::Single(child) => std::slice::from_ref(child),
            Children::Many(rows) => rows,
            Children::Lazy(lazy) => &lazy.rows,
        }
    }

    pub fn as_mut_slice(&mut self) -> &mut [C] {
        match self {
            Children::Empty => &mut [],
            Children::Single(child) => std::slice::from_mut(child),
            Children::Many(rows) => rows,
            Children::Lazy(lazy) => &mut lazy.rows,
        }
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Take the child rows out, remembering the shape they came from
    fn take_rows(&mut self) -> (Vec<C>, Shape) {
        match std::mem::take(self) {
            Children::Empty => (Vec::new(), Shape::Empty),
            Children::Single(child) => (vec![child], Shape::Single),
            Children::Many(rows) => (rows, Shape::Many),
            Children::Lazy(lazy) => (lazy.rows, Shape::Lazy),
        }
    }

    fn rebuild(shape: Shape, mut rows: Vec<C>) -> Self {
        match shape {
            Shape::Empty => Children::Empty,
            Shape::Single => rows.pop().map_or(Children::Empty, Children::Single),
            Shape::Many => Children::Many(rows),
            Shape::Lazy => Children::Lazy(LazyChildren::loaded(rows)),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Shape {
    Empty,
    Single,
    Many,
    Lazy,
}

impl<C> Default for Children<C> {
    fn default() -> Self {
        Children::Empty
    }
}

impl<C> From<Vec<C>> for Children<C> {
    fn from(rows: Vec<C>) -> Self {
        Children::Many(rows)
    }
}

impl<C> From<Option<C>> for Children<C> {
    fn from(child: Option<C>) -> Self {
        child.map_or(Children::Empty, Children::Single)
    }
}

/// Child rows loaded on first access.
///
/// An unloaded list was never looked at, so an update cascade leaves the
/// stored children alone.
#[derive(Debug, Clone, PartialEq)]
pub struct LazyChildren<C> {
    rows: Vec<C>,
    loaded: bool,
}

impl<C> Default for LazyChildren<C> {
    fn default() -> Self {
        Self::unloaded()
    }
}

impl<C> LazyChildren<C> {
    pub fn unloaded() -> Self {
        Self {
            rows: Vec::new(),
            loaded: false,
        }
    }

    pub fn loaded(rows: Vec<C>) -> Self {
        Self { rows, loaded: true }
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn get(&self) -> Option<&[C]> {
        self.loaded.then_some(self.rows.as_slice())
    }

    pub fn get_mut(&mut self) -> Option<&mut Vec<C>> {
        if self.loaded {
            Some(&mut self.rows)
        } else {
            None
        }
    }
}

impl<C: Record> LazyChildren<C> {
    /// Load the children of `parent_id` unless already loaded
    pub fn load(&mut self, ctx: &QueryContext, key: &ForeignKey, parent_id: i64) -> Result<&mut Vec<C>> {
        if !self.loaded {
            self.rows = ctx
                .select::<C>(key.table)?
                .and_where(&format!("{} = ?", key.column), [parent_id])?
                .all()?
                .unwrap_or_default();
            self.loaded = true;
        }
        Ok(&mut self.rows)
    }
}

/// Type-erased access to a foreign-key field, used by the cascade engine
pub trait ForeignChildren: Send {
    fn child_schema(&self) -> &'static RowSchema;

    /// True for a lazy field that was never loaded
    fn is_untouched(&self) -> bool;

    /// Write the parent identity into every child, returning the child count
    fn stamp_parent(&mut self, column: &str, parent_id: i64) -> usize;

    /// Insert every child into `table`, writing back the new identities
    fn insert_children(&mut self, ctx: &QueryContext, table: &str) -> Result<()>;

    /// Delete every stored child of `parent_id`
    fn delete_children(&self, ctx: &QueryContext, key: &ForeignKey, parent_id: i64) -> Result<u64>;
}

impl<C: Record> ForeignChildren for Children<C> {
    fn child_schema(&self) -> &'static RowSchema {
        C::schema()
    }

    fn is_untouched(&self) -> bool {
        matches!(self, Children::Lazy(lazy) if !lazy.is_loaded())
    }

    fn stamp_parent(&mut self, column: &str, parent_id: i64) -> usize {
        let rows = self.as_mut_slice();
        for child in rows.iter_mut() {
            child.set_foreign_key(column, parent_id);
        }
        rows.len()
    }

    fn insert_children(&mut self, ctx: &QueryContext, table: &str) -> Result<()> {
        if self.is_empty() {
            return Ok(());
        }
        let (rows, shape) = self.take_rows();
        let mut query = ctx.insert_into::<C>(table)?.values(rows);
        let outcome = query.execute();
        *self = Children::rebuild(shape, query.into_payload().into_iter().flatten().collect());
        outcome.map(|_| ())
    }

    fn delete_children(&self, ctx: &QueryContext, key: &ForeignKey, parent_id: i64) -> Result<u64> {
        let outcome = ctx
            .delete_from::<C>(key.table)?
            .and_where(&format!("{} = ?", key.column), [parent_id])?
            .run()?;
        Ok(outcome.affected())
    }
}

static RAW_SCHEMA: RowSchema = RowSchema::new("raw", &[]);

/// An untyped row, used by raw queries that have no row type
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRow {
    pub values: RowValues,
}

impl Record for RawRow {
    fn schema() -> &'static RowSchema {
        &RAW_SCHEMA
    }

    fn to_values(&self) -> RowValues {
        self.values.clone()
    }

    fn from_row(row: &CursorRow<'_>) -> Result<Self> {
        Ok(Self {
            values: row.to_values(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Tag {
        id: i64,
        label: String,
    }

    static TAG_SCHEMA: RowSchema =
        RowSchema::new("tag", &[ColumnDef::integer("_id"), ColumnDef::text("label")]).with_identity("_id");

    impl Record for Tag {
        fn schema() -> &'static RowSchema {
            &TAG_SCHEMA
        }

        fn to_values(&self) -> RowValues {
            let mut values = RowValues::new();
            values.insert("_id".into(), self.id.into());
            values.insert("label".into(), self.label.as_str().into());
            values
        }

        fn from_row(row: &CursorRow<'_>) -> Result<Self> {
            Ok(Self {
                id: row.require_i64("_id")?,
                label: row.require_string("label")?,
            })
        }
    }

    #[test]
    fn test_row_values_identity_handling() {
        let fresh = Tag { id: 0, label: "a".into() };
        let stored = Tag { id: 4, label: "b".into() };

        assert!(!row_values(&fresh, None, false).contains_key("_id"));
        assert_eq!(row_values(&stored, None, false).get("_id"), Some(&SqlValue::Integer(4)));
        assert!(!row_values(&stored, None, true).contains_key("_id"));

        let only_label = row_values(&stored, Some(&["label".to_string()]), true);
        assert_eq!(only_label.len(), 1);
    }

    #[test]
    fn test_distinct_projection() {
        let cols = vec!["city".to_string(), "state".to_string()];
        assert_eq!(derive_distinct_projection(&cols), vec!["DISTINCT city", "state"]);
        assert_eq!(derive_projection(&TAG_SCHEMA), vec!["_id", "label"]);
    }

    #[test]
    fn test_children_shapes() {
        let single: Children<i32> = Some(1).into();
        assert_eq!(single.as_slice(), &[1]);

        let mut many: Children<i32> = vec![1, 2, 3].into();
        assert_eq!(many.len(), 3);
        let (rows, shape) = many.take_rows();
        assert!(many.is_empty());
        many = Children::rebuild(shape, rows);
        assert_eq!(many, Children::Many(vec![1, 2, 3]));

        let lazy: Children<Tag> = Children::Lazy(LazyChildren::unloaded());
        assert!(lazy.is_untouched());
        let loaded: Children<Tag> = Children::Lazy(LazyChildren::loaded(Vec::new()));
        assert!(!loaded.is_untouched());
    }
}
