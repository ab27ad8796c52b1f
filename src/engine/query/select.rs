//! SELECT terminals

use super::Query;
use crate::engine::error::Result;
use crate::engine::record::{derive_distinct_projection, derive_projection, Record};
use crate::engine::runner;

impl<R: Record> Query<R> {
    /// The first matching row, or `None` when nothing matches
    pub fn first(&self) -> Result<Option<R>> {
        Ok(self.fetch(Some(1))?.and_then(|rows| rows.into_iter().next()))
    }

    /// Every matching row, or `None` when nothing matches
    pub fn all(&self) -> Result<Option<Vec<R>>> {
        let limit = (self.limit > 0).then_some(self.limit);
        self.fetch(limit)
    }

    pub fn any(&self) -> Result<bool> {
        Ok(self.first()?.is_some())
    }

    pub fn any_match<F>(&self, predicate: F) -> Result<bool>
    where
        F: Fn(&R) -> bool,
    {
        Ok(self.all()?.is_some_and(|rows| rows.iter().any(predicate)))
    }

    pub fn none(&self) -> Result<bool> {
        Ok(!self.any()?)
    }

    pub fn none_match<F>(&self, predicate: F) -> Result<bool>
    where
        F: Fn(&R) -> bool,
    {
        Ok(!self.any_match(predicate)?)
    }

    /// Run [`all`](Self::all) off the calling thread and deliver the result
    /// through the context's completion queue
    pub fn all_async<F>(self, callback: F)
    where
        F: FnOnce(Result<Option<Vec<R>>>) + Send + 'static,
    {
        let ctx = self.ctx.clone();
        runner::dispatch(&ctx, "select", move || self.all(), callback);
    }

    fn fetch(&self, limit: Option<usize>) -> Result<Option<Vec<R>>> {
        if !self.typed || self.ctx.is_closed() {
            return Ok(None);
        }

        let columns = match (&self.distinct, &self.projection) {
            (Some(distinct), _) => derive_distinct_projection(distinct),
            (None, Some(projection)) => projection.clone(),
            (None, None) => derive_projection(R::schema()),
        };
        let sort = self.sort_with_limit(limit);

        tracing::debug!(
            context = %self.ctx.name(),
            target = %self.target,
            selection = ?self.selection(),
            sort = ?sort,
            "Executing select"
        );

        let Some(cursor) = self.query_backend(Some(&columns), sort.as_deref())? else {
            return Ok(None);
        };
        if cursor.is_empty() {
            return Ok(None);
        }
        Self::map_rows(&cursor).map(Some)
    }

    /// The sort expression with `LIMIT n` appended for a positive limit
    fn sort_with_limit(&self, limit: Option<usize>) -> Option<String> {
        let sort = self.sort_order();
        match (limit.filter(|n| *n > 0), sort) {
            (Some(n), Some(sort)) => Some(format!("{} LIMIT {}", sort, n)),
            (Some(n), None) => Some(format!("LIMIT {}", n)),
            (None, sort) => sort.map(str::to_string),
        }
    }
}
