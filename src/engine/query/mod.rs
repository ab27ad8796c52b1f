//! Fluent query builder
//!
//! A [`Query`] is created by a [`QueryContext`] for one kind of operation
//! against one target. Builder methods consume and return the query;
//! SELECT terminals live in `select`, write dispatch in `run`.

mod predicate;
mod run;
mod select;

pub use predicate::{count_placeholders, placeholder_list, Joiner, Predicate};
pub use run::RunResult;

use std::fmt;
use std::sync::Arc;

use predicate::stringify;

use super::adapter::{ContentResolver, ContentUri, Cursor, LocalStore};
use super::context::QueryContext;
use super::error::{QueryError, Result};
use super::record::{ForeignKey, Record};

/// Identity column assumed when a row type declares none
pub const DEFAULT_IDENTITY: &str = "_id";

/// Where a query executes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// A table in the local store
    Table(String),
    /// A remote content endpoint
    Endpoint(ContentUri),
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Table(table) => write!(f, "table '{}'", table),
            Target::Endpoint(uri) => write!(f, "endpoint {}", uri),
        }
    }
}

impl From<&str> for Target {
    fn from(table: &str) -> Self {
        Target::Table(table.to_string())
    }
}

impl From<String> for Target {
    fn from(table: String) -> Self {
        Target::Table(table)
    }
}

impl From<ContentUri> for Target {
    fn from(uri: ContentUri) -> Self {
        Target::Endpoint(uri)
    }
}

impl From<&ContentUri> for Target {
    fn from(uri: &ContentUri) -> Self {
        Target::Endpoint(uri.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    Select,
    Insert,
    Update,
    Delete,
}

impl fmt::Display for QueryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            QueryKind::Select => "select",
            QueryKind::Insert => "insert",
            QueryKind::Update => "update",
            QueryKind::Delete => "delete",
        };
        f.write_str(name)
    }
}

/// Resolved execution surface of a query
pub(crate) enum Backend {
    Local(Arc<dyn LocalStore>, String),
    Remote(Arc<dyn ContentResolver>, ContentUri),
}

/// A single query under construction
pub struct Query<R: Record> {
    ctx: QueryContext,
    target: Target,
    kind: QueryKind,
    typed: bool,
    projection: Option<Vec<String>>,
    distinct: Option<Vec<String>>,
    group_by: Option<String>,
    predicate: Predicate,
    sort: String,
    limit: usize,
    payload: Vec<Option<R>>,
    pending_foreign: Vec<(usize, &'static ForeignKey)>,
}

impl<R: Record> fmt::Debug for Query<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("context", &self.ctx.name())
            .field("target", &self.target)
            .field("kind", &self.kind)
            .field("selection", &self.predicate.expression())
            .field("args", &self.predicate.args())
            .field("sort", &self.sort)
            .field("limit", &self.limit)
            .field("payload", &self.payload.len())
            .finish()
    }
}

impl<R: Record> Query<R> {
    /// Typed local-table queries create their table up front. Row types
    /// without declared columns read whatever the table holds.
    pub(crate) fn new(ctx: QueryContext, target: Target, kind: QueryKind, typed: bool) -> Result<Self> {
        if let (Target::Table(table), false) = (&target, ctx.is_closed()) {
            let store = ctx
                .local_store()
                .ok_or_else(|| QueryError::NoBackendConfigured(target.to_string()))?;
            if typed && !R::schema().columns.is_empty() {
                store.ensure_table(table, R::schema())?;
            }
        }

        Ok(Self {
            ctx,
            target,
            kind,
            typed,
            projection: None,
            distinct: None,
            group_by: None,
            predicate: Predicate::new(),
            sort: String::new(),
            limit: 0,
            payload: Vec::new(),
            pending_foreign: Vec::new(),
        })
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn kind(&self) -> QueryKind {
        self.kind
    }

    pub fn context(&self) -> &QueryContext {
        &self.ctx
    }

    /// The accumulated where clause, if any
    pub fn selection(&self) -> Option<&str> {
        self.predicate.expression()
    }

    pub fn selection_args(&self) -> &[String] {
        self.predicate.args()
    }

    pub fn sort_order(&self) -> Option<&str> {
        let sort = self.sort.trim();
        (!sort.is_empty()).then_some(sort)
    }

    pub fn payload(&self) -> &[Option<R>] {
        &self.payload
    }

    /// Give back the payload, carrying any identities written by a run
    pub fn into_payload(self) -> Vec<Option<R>> {
        self.payload
    }

    // ------------------------------------------------------------------
    // Where clause
    // ------------------------------------------------------------------

    pub fn and_where<I>(mut self, fragment: &str, args: I) -> Result<Self>
    where
        I: IntoIterator,
        I::Item: ToString,
    {
        self.predicate.append(fragment, stringify(args), Joiner::And)?;
        Ok(self)
    }

    pub fn or_where<I>(mut self, fragment: &str, args: I) -> Result<Self>
    where
        I: IntoIterator,
        I::Item: ToString,
    {
        self.predicate.append(fragment, stringify(args), Joiner::Or)?;
        Ok(self)
    }

    pub fn where_in<I>(self, column: &str, args: I) -> Result<Self>
    where
        I: IntoIterator,
        I::Item: ToString,
    {
        self.append_in(column, args, false, Joiner::And)
    }

    pub fn or_where_in<I>(self, column: &str, args: I) -> Result<Self>
    where
        I: IntoIterator,
        I::Item: ToString,
    {
        self.append_in(column, args, false, Joiner::Or)
    }

    pub fn where_not_in<I>(self, column: &str, args: I) -> Result<Self>
    where
        I: IntoIterator,
        I::Item: ToString,
    {
        self.append_in(column, args, true, Joiner::And)
    }

    pub fn or_where_not_in<I>(self, column: &str, args: I) -> Result<Self>
    where
        I: IntoIterator,
        I::Item: ToString,
    {
        self.append_in(column, args, true, Joiner::Or)
    }

    fn append_in<I>(mut self, column: &str, args: I, negate: bool, joiner: Joiner) -> Result<Self>
    where
        I: IntoIterator,
        I::Item: ToString,
    {
        self.predicate.append_in(column, stringify(args), negate, joiner)?;
        Ok(self)
    }

    pub fn clear_where(mut self) -> Self {
        self.predicate.clear();
        self
    }

    // ------------------------------------------------------------------
    // Ordering, limit and shape
    // ------------------------------------------------------------------

    /// Append a raw ORDER BY expression
    pub fn sort(mut self, expression: &str) -> Self {
        let expression = expression.trim();
        if !expression.is_empty() {
            if !self.sort.is_empty() {
                self.sort.push_str(", ");
            }
            self.sort.push_str(expression);
        }
        self
    }

    pub fn sort_asc(self, columns: &[&str]) -> Self {
        self.sort_terms(columns, "ASC")
    }

    pub fn sort_desc(self, columns: &[&str]) -> Self {
        self.sort_terms(columns, "DESC")
    }

    fn sort_terms(self, columns: &[&str], direction: &str) -> Self {
        let terms: Vec<String> = columns
            .iter()
            .map(|c| format!("{} {}", c, direction))
            .collect();
        self.sort(&terms.join(", "))
    }

    pub fn clear_sort(mut self) -> Self {
        self.sort.clear();
        self
    }

    /// Cap the number of rows returned by `all`. Zero means no limit.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Restrict the columns read by a SELECT or written by an UPDATE
    pub fn projection(mut self, columns: &[&str]) -> Self {
        self.projection = Some(columns.iter().map(|c| c.to_string()).collect());
        self
    }

    /// Select distinct combinations of `columns`. Overrides the projection.
    pub fn distinct(mut self, columns: &[&str]) -> Self {
        self.distinct = Some(columns.iter().map(|c| c.to_string()).collect());
        self
    }

    /// GROUP BY expression, honored by local tables only
    pub fn group_by(mut self, expression: &str) -> Self {
        self.group_by = Some(expression.to_string());
        self
    }

    // ------------------------------------------------------------------
    // Payload
    // ------------------------------------------------------------------

    /// Replace the payload with a single row
    pub fn value(mut self, row: R) -> Self {
        self.payload = vec![Some(row)];
        self
    }

    pub fn values<I>(mut self, rows: I) -> Self
    where
        I: IntoIterator<Item = R>,
    {
        self.payload = rows.into_iter().map(Some).collect();
        self
    }

    /// Replace the payload with rows that may be absent. Absent rows are
    /// skipped by every write.
    pub fn values_opt<I>(mut self, rows: I) -> Self
    where
        I: IntoIterator<Item = Option<R>>,
    {
        self.payload = rows.into_iter().collect();
        self
    }

    // ------------------------------------------------------------------
    // Positional addressing
    // ------------------------------------------------------------------

    /// Narrow the query to the row at `position` of the current result.
    ///
    /// Runs the current where clause and sort, reads the identity of the
    /// row at `position` and appends `identity = <id>` to the where clause.
    /// A backend that produces no result leaves the query unchanged.
    pub fn at_position(mut self, position: usize) -> Result<Self> {
        let Some(cursor) = self.query_backend(None, self.sort_order())? else {
            return Ok(self);
        };

        let count = cursor.count();
        if position >= count {
            return Err(QueryError::OutOfRange { position, count });
        }

        let identity = self.identity_column();
        let id = cursor
            .row(position)
            .and_then(|row| row.get_i64(identity))
            .ok_or_else(|| {
                QueryError::MissingIdentityColumn(format!("result of {} has no '{}' column", self.target, identity))
            })?;

        self.predicate
            .append(&format!("{} = ?", identity), vec![id.to_string()], Joiner::And)?;
        Ok(self)
    }

    // ------------------------------------------------------------------
    // Shared execution helpers
    // ------------------------------------------------------------------

    pub(crate) fn identity_column(&self) -> &'static str {
        R::schema().identity.unwrap_or(DEFAULT_IDENTITY)
    }

    pub(crate) fn backend(&self) -> Result<Backend> {
        let missing = || QueryError::NoBackendConfigured(self.target.to_string());
        match &self.target {
            Target::Table(table) => {
                let store = self.ctx.local_store().ok_or_else(missing)?;
                Ok(Backend::Local(Arc::clone(store), table.clone()))
            }
            Target::Endpoint(uri) => {
                let resolver = self.ctx.resolver().ok_or_else(missing)?;
                Ok(Backend::Remote(Arc::clone(resolver), uri.clone()))
            }
        }
    }

    /// Run the current where clause against the backend
    pub(crate) fn query_backend(&self, columns: Option<&[String]>, sort: Option<&str>) -> Result<Option<Cursor>> {
        let selection = self.predicate.expression();
        let args = self.predicate.args();
        let cursor = match self.backend()? {
            Backend::Local(store, table) => Some(store.query(
                &table,
                columns,
                selection,
                args,
                self.group_by.as_deref(),
                sort,
            )?),
            Backend::Remote(resolver, uri) => resolver.query(&uri, columns, selection, args, sort)?,
        };
        Ok(cursor)
    }

    pub(crate) fn map_rows(cursor: &Cursor) -> Result<Vec<R>> {
        cursor.iter().map(|row| R::from_row(&row)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::adapter::SqliteStore;

    fn context() -> QueryContext {
        QueryContext::builder("query-tests")
            .local_store(SqliteStore::in_memory().unwrap())
            .build()
    }

    #[test]
    fn test_builder_accumulates_where_and_sort() {
        let query = context()
            .delete_raw("things")
            .unwrap()
            .and_where("a = ?", [1])
            .unwrap()
            .or_where_in("b", ["x", "y"])
            .unwrap()
            .sort_asc(&["a"])
            .sort_desc(&["b", "c"]);

        assert_eq!(query.selection(), Some("a = ? OR b IN (?,?)"));
        assert_eq!(query.selection_args(), &["1", "x", "y"]);
        assert_eq!(query.sort_order(), Some("a ASC, b DESC, c DESC"));

        let query = query.clear_where().clear_sort();
        assert_eq!(query.selection(), None);
        assert_eq!(query.sort_order(), None);
    }

    #[test]
    fn test_target_conversions() {
        assert_eq!(Target::from("people"), Target::Table("people".to_string()));
        let uri = ContentUri::parse("content://notes/items").unwrap();
        assert_eq!(Target::from(&uri), Target::Endpoint(uri.clone()));
        assert_eq!(Target::from(uri).to_string(), "endpoint content://notes/items");
    }

    #[test]
    fn test_table_query_without_store_fails() {
        let ctx = QueryContext::builder("empty").build();
        let err = ctx.delete_raw("things").unwrap_err();
        assert!(matches!(err, QueryError::NoBackendConfigured(_)));
    }
}
