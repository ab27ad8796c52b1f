//! INSERT, UPDATE and DELETE dispatch

use super::predicate::stringify;
use super::{Backend, Joiner, Query, QueryKind};
use crate::engine::adapter::{AdapterError, LocalStore};
use crate::engine::cascade;
use crate::engine::error::{QueryError, Result};
use crate::engine::record::{derive_projection, row_values, Record};
use crate::engine::runner;

/// Outcome of a write.
///
/// Foreign-key cascades only follow writes to a local table; a write to a
/// remote endpoint leaves child rows untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunResult {
    /// New identity per payload row, `None` for absent or failed rows
    Inserted(Vec<Option<i64>>),
    Updated(u64),
    Deleted(u64),
    /// The endpoint refused the row at `index`; later rows were not sent
    InsertRejected { index: usize },
}

impl RunResult {
    /// Rows written or removed
    pub fn affected(&self) -> u64 {
        match self {
            RunResult::Inserted(ids) => ids.iter().flatten().count() as u64,
            RunResult::Updated(n) | RunResult::Deleted(n) => *n,
            RunResult::InsertRejected { .. } => 0,
        }
    }

    pub fn inserted_ids(&self) -> Option<&[Option<i64>]> {
        match self {
            RunResult::Inserted(ids) => Some(ids),
            _ => None,
        }
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, RunResult::InsertRejected { .. })
    }
}

impl<R: Record> Query<R> {
    /// Execute an INSERT, UPDATE or DELETE. Writes to a remote endpoint do
    /// not cascade into child tables.
    pub fn run(mut self) -> Result<RunResult> {
        self.execute()
    }

    /// Execute and hand back the payload with the identities written to it
    pub fn run_returning(mut self) -> Result<(RunResult, Vec<Option<R>>)> {
        let outcome = self.execute()?;
        Ok((outcome, self.into_payload()))
    }

    /// Run off the calling thread and deliver the result through the
    /// context's completion queue
    pub fn run_async<F>(self, callback: F)
    where
        F: FnOnce(Result<RunResult>) + Send + 'static,
    {
        let ctx = self.ctx.clone();
        runner::dispatch(&ctx, "run", move || self.run(), callback);
    }

    /// Like [`run`](Self::run) but keeps the query, so the payload can be
    /// taken back afterwards
    pub(crate) fn execute(&mut self) -> Result<RunResult> {
        if self.kind == QueryKind::Select {
            return Err(QueryError::UnsupportedOperation(
                "select queries are read with first or all".to_string(),
            ));
        }
        if self.kind != QueryKind::Delete && self.payload.is_empty() {
            return Err(QueryError::NoValuesProvided);
        }
        if self.ctx.is_closed() {
            return Err(QueryError::NoBackendConfigured(format!("{} (context closed)", self.target)));
        }

        let backend = self.backend()?;
        tracing::debug!(
            context = %self.ctx.name(),
            kind = %self.kind,
            target = %self.target,
            rows = self.payload.len(),
            "Executing write"
        );

        match self.kind {
            QueryKind::Insert => self.run_insert(backend),
            QueryKind::Update => self.run_update(backend),
            _ => self.run_delete(backend),
        }
    }

    fn declares_foreign_keys(&self) -> bool {
        self.typed && !R::schema().foreign_keys.is_empty()
    }

    fn run_insert(&mut self, backend: Backend) -> Result<RunResult> {
        let mut ids = vec![None; self.payload.len()];
        let track_foreign = self.declares_foreign_keys();

        match backend {
            Backend::Local(store, table) => {
                for (index, slot) in self.payload.iter_mut().enumerate() {
                    let Some(row) = slot else { continue };
                    let values = row_values(row, None, false);
                    match store.insert(&table, &values) {
                        Ok(id) => {
                            row.set_identity(id);
                            ids[index] = Some(id);
                            if track_foreign {
                                self.pending_foreign
                                    .extend(R::schema().foreign_keys.iter().map(|key| (index, key)));
                            }
                        }
                        Err(e) => {
                            tracing::warn!(table = %table, index, error = %e, "Row insert failed, continuing with batch");
                        }
                    }
                }
                self.propagate_foreign(false)?;
            }
            Backend::Remote(resolver, uri) => {
                for (index, slot) in self.payload.iter_mut().enumerate() {
                    let Some(row) = slot else { continue };
                    let values = row_values(row, None, false);
                    let Some(resource) = resolver.insert(&uri, &values)? else {
                        tracing::warn!(uri = %uri, index, "Endpoint refused insert, stopping batch");
                        return Ok(RunResult::InsertRejected { index });
                    };
                    let id = resource
                        .last_path_segment()
                        .and_then(|segment| segment.parse::<i64>().ok())
                        .ok_or_else(|| {
                            AdapterError::Validation(format!("inserted resource {} carries no row id", resource))
                        })?;
                    row.set_identity(id);
                    ids[index] = Some(id);
                }
            }
        }

        Ok(RunResult::Inserted(ids))
    }

    fn run_update(&mut self, backend: Backend) -> Result<RunResult> {
        let last_present = self
            .payload
            .iter()
            .rposition(Option::is_some)
            .ok_or(QueryError::NoNonNullPayload)?;
        let track_foreign = self.declares_foreign_keys() && matches!(backend, Backend::Local(..));
        let identity = R::schema().identity.filter(|_| self.typed);
        let by_identity = identity.is_some() && self.payload.iter().flatten().all(|row| row.identity() > 0);

        let mut updated = 0;
        match identity.filter(|_| by_identity) {
            Some(identity) => {
                if self.predicate.is_set() {
                    return Err(QueryError::ConflictingAddressMode("update"));
                }
                let selection = format!("{} = ?", identity);
                for (index, slot) in self.payload.iter().enumerate() {
                    let Some(row) = slot else { continue };
                    let values = row_values(row, self.projection.as_deref(), true);
                    let args = [row.identity().to_string()];
                    updated += match &backend {
                        Backend::Local(store, table) => store.update(table, &values, Some(&selection), &args)?,
                        Backend::Remote(resolver, uri) => resolver.update(uri, &values, Some(&selection), &args)?,
                    };
                    if track_foreign {
                        self.pending_foreign
                            .extend(R::schema().foreign_keys.iter().map(|key| (index, key)));
                    }
                }
            }
            None => {
                let Some(row) = &self.payload[last_present] else {
                    return Err(QueryError::NoNonNullPayload);
                };
                let values = row_values(row, self.projection.as_deref(), true);
                let selection = self.predicate.expression();
                let args = self.predicate.args();
                updated = match &backend {
                    Backend::Local(store, table) => store.update(table, &values, selection, args)?,
                    Backend::Remote(resolver, uri) => resolver.update(uri, &values, selection, args)?,
                };
                if track_foreign {
                    self.pending_foreign
                        .extend(R::schema().foreign_keys.iter().map(|key| (last_present, key)));
                }
            }
        }

        self.propagate_foreign(true)?;
        Ok(RunResult::Updated(updated))
    }

    fn run_delete(&mut self, backend: Backend) -> Result<RunResult> {
        if let Some(ids) = self.identity_addressed_ids() {
            if self.predicate.is_set() {
                return Err(QueryError::ConflictingAddressMode("delete"));
            }
            let identity = self.identity_column();
            self.predicate.append_in(identity, stringify(ids), false, Joiner::And)?;
        }

        let selection = self.predicate.expression();
        let args = self.predicate.args();
        match backend {
            Backend::Local(store, table) => {
                // Children are found through the doomed parents, so read them first
                let doomed = if self.declares_foreign_keys() {
                    self.load_matching(store.as_ref(), &table)?
                } else {
                    Vec::new()
                };
                let deleted = store.delete(&table, selection, args)?;
                cascade::delete_children(&self.ctx, doomed)?;
                Ok(RunResult::Deleted(deleted))
            }
            Backend::Remote(resolver, uri) => Ok(RunResult::Deleted(resolver.delete(&uri, selection, args)?)),
        }
    }

    /// Identities of the payload rows when every present row has one
    fn identity_addressed_ids(&self) -> Option<Vec<i64>> {
        R::schema().identity.filter(|_| self.typed)?;
        let ids: Vec<i64> = self.payload.iter().flatten().map(R::identity).collect();
        if ids.is_empty() || ids.iter().any(|id| *id <= 0) {
            None
        } else {
            Some(ids)
        }
    }

    fn load_matching(&self, store: &dyn LocalStore, table: &str) -> Result<Vec<R>> {
        let columns = derive_projection(R::schema());
        let cursor = store.query(
            table,
            Some(&columns),
            self.predicate.expression(),
            self.predicate.args(),
            None,
            None,
        )?;
        Self::map_rows(&cursor)
    }

    fn propagate_foreign(&mut self, update_mode: bool) -> Result<()> {
        let pending = std::mem::take(&mut self.pending_foreign);
        if pending.is_empty() {
            return Ok(());
        }
        cascade::propagate(&self.ctx, &mut self.payload, pending, update_mode)
    }
}
